//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (resolve caller: trusted user id, credentials, peer IP)
//!     → rate_limit.rs (per-class, per-caller window)
//!     → auth_failure.rs (failed-login budget, optional)
//!     → Pass to cache / upstream
//! ```
//!
//! # Design Decisions
//! - Counters live in an injected store, never a global
//! - Throttling is a policy decision rendered as a 429, not an error
//! - Store outages fail open

pub mod auth_failure;
pub mod identity;
pub mod rate_limit;

pub use auth_failure::AuthFailureGuard;
pub use identity::{Caller, IdentityResolver};
pub use rate_limit::{Decision, LimitPolicy, LimiterClass, PolicyTable, RateLimited, RateLimiter};
