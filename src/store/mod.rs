//! Shared counter / key-value store.
//!
//! # Data Flow
//! ```text
//! rate limiter ──increment(key, window)──▶ CounterStore ─┐
//!                                                        ├─▶ MemoryStore (DashMap + Clock)
//! response cache ──get/put(key, ttl)────▶ KeyValueStore ─┘
//! ```
//!
//! # Design Decisions
//! - Stores are injected into each component; there is no global instance
//! - Increment and get/put are atomic per key
//! - Time comes from a `Clock` so windows and TTLs are testable

pub mod clock;
pub mod memory;

use std::time::{Duration, Instant};
use thiserror::Error;

pub use clock::{Clock, MockClock, SystemClock};
pub use memory::MemoryStore;

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or refusing operations.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Snapshot of a counter bucket after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    /// Attempts recorded in the current window, including this one.
    pub attempts: u32,
    /// Instant at which the window closes.
    pub window_expires_at: Instant,
    /// True when this increment opened a fresh window.
    pub fresh: bool,
}

/// Atomic windowed counters.
pub trait CounterStore: Send + Sync {
    /// Increment `key`, opening a new window of length `window` when the bucket
    /// is absent or its window has elapsed.
    fn increment(&self, key: &str, window: Duration) -> Result<BucketState, StoreError>;

    /// Read a bucket without modifying it.
    fn peek(&self, key: &str) -> Result<Option<BucketState>, StoreError>;

    /// Current time as seen by the store.
    fn now(&self) -> Instant;
}

/// Byte-valued key-value store with per-entry TTL.
pub trait KeyValueStore: Send + Sync {
    /// Fetch a live value.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or replace a value that expires after `ttl`.
    fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Number of live entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
