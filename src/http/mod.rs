//! HTTP gateway subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, body limit)
//!     → security (identity → rate limit → auth-failure guard)
//!     → cache (HIT replays, MISS forwards and stores)
//!     → server.rs proxy handler → upstream marketplace API
//!     → response.rs (JSON error envelope on refusals)
//! ```

pub mod response;
pub mod server;

pub use response::ApiError;
pub use server::{AppState, HttpServer};
