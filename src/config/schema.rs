//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway
//! and the backup command. All types derive Serde traits for deserialization
//! from config files.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Marketplace API the gateway forwards to.
    pub upstream: UpstreamConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Response cache configuration.
    pub cache: CacheConfig,

    /// Database the backup command dumps.
    pub database: DatabaseConfig,

    /// Backup command settings and storage targets.
    pub backup: BackupConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout in seconds, covering the upstream round trip.
    pub request_timeout_secs: u64,

    /// Maximum request body accepted from clients.
    pub max_body_bytes: usize,

    /// Peers allowed to assert `X-User-Id` / `X-User-Role`. Empty trusts nobody.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
            max_body_bytes: 10 * 1024 * 1024,
            trusted_proxies: Vec::new(),
        }
    }
}

/// Upstream application.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL, e.g. "http://127.0.0.1:8000".
    pub base_url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
        }
    }
}

/// Attempts allowed per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PolicyConfig {
    pub max_attempts: u32,
    pub window_secs: u64,
}

impl PolicyConfig {
    pub const fn new(max_attempts: u32, window_secs: u64) -> Self {
        Self {
            max_attempts,
            window_secs,
        }
    }
}

/// One ordered path rule: when `contains` is a substring of the path, `class` applies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClassRuleConfig {
    pub contains: String,
    pub class: String,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    pub auth: PolicyConfig,
    pub password_reset: PolicyConfig,
    pub upload: PolicyConfig,
    pub search: PolicyConfig,
    pub admin: PolicyConfig,
    pub default: PolicyConfig,

    /// Ordered path rules, first match wins. Empty means the built-in table.
    pub rules: Vec<ClassRuleConfig>,

    /// Secondary limiter for failed authentication attempts.
    pub auth_failure: AuthFailureConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auth: PolicyConfig::new(50, 60),
            password_reset: PolicyConfig::new(3, 3600),
            upload: PolicyConfig::new(20, 60),
            search: PolicyConfig::new(100, 60),
            admin: PolicyConfig::new(30, 60),
            default: PolicyConfig::new(60, 60),
            rules: Vec::new(),
            auth_failure: AuthFailureConfig::default(),
        }
    }
}

/// Failed-login limiter.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthFailureConfig {
    /// When false the guard always allows.
    pub enabled: bool,

    pub max_attempts: u32,

    pub window_secs: u64,
}

impl Default for AuthFailureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 5,
            window_secs: 900,
        }
    }
}

/// TTL for paths containing `contains`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TtlRuleConfig {
    pub contains: String,
    pub ttl_secs: u64,
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the response cache.
    pub enabled: bool,

    /// Bodies larger than this are served but never stored.
    pub max_payload_bytes: usize,

    /// TTL when no rule matches.
    pub default_ttl_secs: u64,

    /// Ordered TTL rules, first match wins.
    pub ttl_rules: Vec<TtlRuleConfig>,

    /// Path fragments that are never cached for authenticated callers.
    pub sensitive_paths: Vec<String>,

    /// Query parameters whose presence bypasses the cache.
    pub bypass_params: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let rule = |contains: &str, ttl_secs| TtlRuleConfig {
            contains: contains.to_string(),
            ttl_secs,
        };
        Self {
            enabled: true,
            max_payload_bytes: 1024 * 1024,
            default_ttl_secs: 120,
            ttl_rules: vec![
                rule("teachers", 300),
                rule("categories", 3600),
                rule("statistics", 600),
            ],
            sensitive_paths: ["admin", "profile", "reservations", "notifications", "ratings"]
                .into_iter()
                .map(String::from)
                .collect(),
            bypass_params: ["page", "per_page", "sort", "order", "sort_by", "sort_order", "limit", "offset"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Database engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    Sqlite,
    Mysql,
}

/// Database connection parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub driver: DatabaseDriver,

    /// SQLite file path.
    pub path: String,

    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::Sqlite,
            path: "database/database.sqlite".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3306,
            database: "marketplace".to_string(),
            username: "root".to_string(),
            password: String::new(),
        }
    }
}

/// Kind of storage target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageTargetConfig {
    /// Directory on local disk.
    Local { root: String },
    /// Process memory; contents vanish on exit, so `backup-cli` refuses it.
    Memory,
}

/// Backup command configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Scratch directory for dumps before upload.
    pub work_dir: String,

    /// Upper bound on the dump subprocess.
    pub dump_timeout_secs: u64,

    /// Retention used when the CLI does not override it.
    pub default_retention_days: u32,

    /// Gzip streaming chunk size.
    pub chunk_size: usize,

    /// Path of the dump binary for client/server databases.
    pub dump_binary: String,

    /// Named storage targets.
    pub storage: BTreeMap<String, StorageTargetConfig>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        let mut storage = BTreeMap::new();
        storage.insert(
            "local".to_string(),
            StorageTargetConfig::Local {
                root: "storage/app".to_string(),
            },
        );
        Self {
            work_dir: "storage/app/backup-tmp".to_string(),
            dump_timeout_secs: 300,
            default_retention_days: 30,
            chunk_size: 512 * 1024,
            dump_binary: "mysqldump".to_string(),
            storage,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy_table() {
        let config = AppConfig::default();
        assert_eq!(config.rate_limit.auth, PolicyConfig::new(50, 60));
        assert_eq!(config.rate_limit.password_reset, PolicyConfig::new(3, 3600));
        assert_eq!(config.rate_limit.default, PolicyConfig::new(60, 60));
        assert_eq!(config.cache.max_payload_bytes, 1024 * 1024);
        assert_eq!(config.backup.chunk_size, 512 * 1024);
        assert!(config.listener.trusted_proxies.is_empty());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [listener]
            trusted_proxies = ["10.0.0.2", "::1"]

            [rate_limit.auth_failure]
            enabled = true

            [database]
            driver = "mysql"
            database = "tutors"

            [backup.storage.archive]
            kind = "local"
            root = "/var/backups"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.trusted_proxies.len(), 2);
        assert_eq!(config.listener.request_timeout_secs, 30);
        assert!(config.rate_limit.auth_failure.enabled);
        assert_eq!(config.rate_limit.auth_failure.max_attempts, 5);
        assert_eq!(config.database.driver, DatabaseDriver::Mysql);
        assert_eq!(config.database.port, 3306);
        assert_eq!(
            config.backup.storage.get("archive"),
            Some(&StorageTargetConfig::Local {
                root: "/var/backups".to_string()
            })
        );
    }
}
