//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → handed to the gateway or the backup command
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_config_or_default, parse_config, ConfigError};
pub use schema::{
    AppConfig, AuthFailureConfig, BackupConfig, CacheConfig, ClassRuleConfig, DatabaseConfig,
    DatabaseDriver, ListenerConfig, ObservabilityConfig, PolicyConfig, RateLimitConfig,
    StorageTargetConfig, TtlRuleConfig, UpstreamConfig,
};
