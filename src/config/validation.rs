//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, chunk sizes > 0)
//! - Check that rule classes and URLs are well-formed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::{AppConfig, DatabaseDriver, PolicyConfig, StorageTargetConfig};
use crate::security::rate_limit::LimiterClass;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: must be greater than zero")]
    Zero { field: String },

    #[error("upstream.base_url: invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("rate_limit.rules[{index}]: unknown class {class:?}")]
    UnknownClass { index: usize, class: String },

    #[error("{field}: must not be empty")]
    Empty { field: String },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = url::Url::parse(&config.upstream.base_url) {
        errors.push(ValidationError::InvalidUrl {
            url: config.upstream.base_url.clone(),
            reason: e.to_string(),
        });
    }

    if config.listener.request_timeout_secs == 0 {
        errors.push(zero("listener.request_timeout_secs"));
    }

    let rl = &config.rate_limit;
    let policies: [(&str, &PolicyConfig); 6] = [
        ("rate_limit.auth", &rl.auth),
        ("rate_limit.password_reset", &rl.password_reset),
        ("rate_limit.upload", &rl.upload),
        ("rate_limit.search", &rl.search),
        ("rate_limit.admin", &rl.admin),
        ("rate_limit.default", &rl.default),
    ];
    for (name, policy) in policies {
        if policy.max_attempts == 0 {
            errors.push(zero(&format!("{name}.max_attempts")));
        }
        if policy.window_secs == 0 {
            errors.push(zero(&format!("{name}.window_secs")));
        }
    }
    for (index, rule) in rl.rules.iter().enumerate() {
        if rule.class.parse::<LimiterClass>().is_err() {
            errors.push(ValidationError::UnknownClass {
                index,
                class: rule.class.clone(),
            });
        }
        if rule.contains.is_empty() {
            errors.push(ValidationError::Empty {
                field: format!("rate_limit.rules[{index}].contains"),
            });
        }
    }
    if rl.auth_failure.enabled {
        if rl.auth_failure.max_attempts == 0 {
            errors.push(zero("rate_limit.auth_failure.max_attempts"));
        }
        if rl.auth_failure.window_secs == 0 {
            errors.push(zero("rate_limit.auth_failure.window_secs"));
        }
    }

    if config.cache.default_ttl_secs == 0 {
        errors.push(zero("cache.default_ttl_secs"));
    }
    for (index, rule) in config.cache.ttl_rules.iter().enumerate() {
        if rule.ttl_secs == 0 {
            errors.push(zero(&format!("cache.ttl_rules[{index}].ttl_secs")));
        }
    }

    match config.database.driver {
        DatabaseDriver::Sqlite if config.database.path.is_empty() => {
            errors.push(ValidationError::Empty {
                field: "database.path".to_string(),
            });
        }
        DatabaseDriver::Mysql if config.database.database.is_empty() => {
            errors.push(ValidationError::Empty {
                field: "database.database".to_string(),
            });
        }
        _ => {}
    }

    if config.backup.chunk_size == 0 {
        errors.push(zero("backup.chunk_size"));
    }
    if config.backup.dump_timeout_secs == 0 {
        errors.push(zero("backup.dump_timeout_secs"));
    }
    for (name, target) in &config.backup.storage {
        if let StorageTargetConfig::Local { root } = target {
            if root.is_empty() {
                errors.push(ValidationError::Empty {
                    field: format!("backup.storage.{name}.root"),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn zero(field: &str) -> ValidationError {
    ValidationError::Zero {
        field: field.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ClassRuleConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = AppConfig::default();
        config.upstream.base_url = "not a url".to_string();
        config.rate_limit.search.window_secs = 0;
        config.rate_limit.rules.push(ClassRuleConfig {
            contains: "graphql".to_string(),
            class: "premium".to_string(),
        });
        config.backup.chunk_size = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::UnknownClass {
            index: 0,
            class: "premium".to_string()
        }));
        assert!(errors.contains(&zero("rate_limit.search.window_secs")));
    }
}
