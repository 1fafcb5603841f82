//! Response caching for idempotent reads.
//!
//! # Data Flow
//! ```text
//! request → eligible? ──no──▶ handler (X-Cache: BYPASS)
//!              │yes
//!              ▼
//!           lookup(key) ──hit──▶ stored status/headers/body (X-Cache: HIT)
//!              │miss
//!              ▼
//!           handler → 2xx and ≤ max payload? → store(key, ttl) (X-Cache: MISS)
//! ```

pub mod middleware;
pub mod response_cache;

pub use middleware::cache_middleware;
pub use response_cache::{cache_key, CacheEntry, CacheOutcome, ResponseCache};
