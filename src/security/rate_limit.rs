//! Rate limiting middleware with per-class fixed windows.
//!
//! Each request is classified by an ordered list of path rules, then counted
//! in the bucket `<class>:<identity>`. Buckets live in an injected
//! `CounterStore` so every request handler sees the same counters.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::config::{PolicyConfig, RateLimitConfig};
use crate::http::response::ApiError;
use crate::observability::metrics;
use crate::security::identity::caller_of;
use crate::store::{CounterStore, StoreError};

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Named policy bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterClass {
    Auth,
    PasswordReset,
    Upload,
    Search,
    Admin,
    Default,
    /// Failed credential attempts, tracked apart from general traffic.
    AuthFailure,
}

impl LimiterClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimiterClass::Auth => "auth",
            LimiterClass::PasswordReset => "password-reset",
            LimiterClass::Upload => "upload",
            LimiterClass::Search => "search",
            LimiterClass::Admin => "admin",
            LimiterClass::Default => "default",
            LimiterClass::AuthFailure => "auth-failure",
        }
    }
}

impl fmt::Display for LimiterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown limiter class: {0}")]
pub struct UnknownClass(String);

impl FromStr for LimiterClass {
    type Err = UnknownClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auth" => Ok(LimiterClass::Auth),
            "password-reset" | "password_reset" => Ok(LimiterClass::PasswordReset),
            "upload" => Ok(LimiterClass::Upload),
            "search" => Ok(LimiterClass::Search),
            "admin" => Ok(LimiterClass::Admin),
            "default" => Ok(LimiterClass::Default),
            other => Err(UnknownClass(other.to_string())),
        }
    }
}

/// Attempts allowed per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    pub max_attempts: u32,
    pub window: Duration,
}

impl From<PolicyConfig> for LimitPolicy {
    fn from(c: PolicyConfig) -> Self {
        Self {
            max_attempts: c.max_attempts,
            window: Duration::from_secs(c.window_secs),
        }
    }
}

/// Path substring → class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRule {
    pub needle: String,
    pub class: LimiterClass,
}

impl ClassRule {
    fn new(needle: &str, class: LimiterClass) -> Self {
        Self {
            needle: needle.to_string(),
            class,
        }
    }
}

/// Rules plus the policy for each class.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    rules: Vec<ClassRule>,
    auth: LimitPolicy,
    password_reset: LimitPolicy,
    upload: LimitPolicy,
    search: LimitPolicy,
    admin: LimitPolicy,
    default: LimitPolicy,
}

impl PolicyTable {
    /// Built-in rule order. Overlapping paths resolve to the earliest rule.
    pub fn default_rules() -> Vec<ClassRule> {
        vec![
            ClassRule::new("login", LimiterClass::Auth),
            ClassRule::new("register", LimiterClass::Auth),
            ClassRule::new("password", LimiterClass::PasswordReset),
            ClassRule::new("upload", LimiterClass::Upload),
            ClassRule::new("search", LimiterClass::Search),
            ClassRule::new("admin", LimiterClass::Admin),
        ]
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        let rules = if config.rules.is_empty() {
            Self::default_rules()
        } else {
            config
                .rules
                .iter()
                .filter_map(|r| match r.class.parse() {
                    Ok(class) => Some(ClassRule::new(&r.contains, class)),
                    Err(e) => {
                        tracing::warn!(error = %e, needle = %r.contains, "Skipping rate limit rule");
                        None
                    }
                })
                .collect()
        };

        Self {
            rules,
            auth: config.auth.into(),
            password_reset: config.password_reset.into(),
            upload: config.upload.into(),
            search: config.search.into(),
            admin: config.admin.into(),
            default: config.default.into(),
        }
    }

    /// First rule whose needle occurs in `path`, else `Default`.
    pub fn classify(&self, path: &str) -> LimiterClass {
        self.rules
            .iter()
            .find(|r| path.contains(&r.needle))
            .map(|r| r.class)
            .unwrap_or(LimiterClass::Default)
    }

    pub fn policy(&self, class: LimiterClass) -> LimitPolicy {
        match class {
            LimiterClass::Auth => self.auth,
            LimiterClass::PasswordReset => self.password_reset,
            LimiterClass::Upload => self.upload,
            LimiterClass::Search => self.search,
            LimiterClass::Admin => self.admin,
            LimiterClass::Default | LimiterClass::AuthFailure => self.default,
        }
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the window resets; zero when allowed.
    pub retry_after_secs: u64,
}

impl Decision {
    /// Turn a throttle into an error.
    pub fn into_result(self) -> Result<Decision, RateLimited> {
        if self.allowed {
            Ok(self)
        } else {
            Err(RateLimited {
                retry_after_secs: self.retry_after_secs,
            })
        }
    }

    /// Annotate a response with the current limit and remaining count.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
    }
}

/// Policy decision: the caller exhausted its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limited, retry after {retry_after_secs}s")]
pub struct RateLimited {
    pub retry_after_secs: u64,
}

/// Count one hit against `key` and decide.
pub(crate) fn count_hit(
    store: &dyn CounterStore,
    key: &str,
    policy: LimitPolicy,
) -> Result<Decision, StoreError> {
    let bucket = store.increment(key, policy.window)?;
    Ok(decide(
        bucket.attempts,
        bucket.window_expires_at,
        store.now(),
        policy,
    ))
}

pub(crate) fn decide(attempts: u32, expires_at: Instant, now: Instant, policy: LimitPolicy) -> Decision {
    let allowed = attempts <= policy.max_attempts;
    let retry_after_secs = if allowed {
        0
    } else {
        let left = expires_at.saturating_duration_since(now);
        let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
        secs.max(1)
    };
    Decision {
        allowed,
        limit: policy.max_attempts,
        remaining: policy.max_attempts - attempts.min(policy.max_attempts),
        retry_after_secs,
    }
}

/// Shared limiter state.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    table: Arc<PolicyTable>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, table: PolicyTable) -> Self {
        Self {
            store,
            table: Arc::new(table),
        }
    }

    pub fn table(&self) -> &PolicyTable {
        &self.table
    }

    /// Record one attempt for `identity` under `class`.
    pub fn check_and_increment(
        &self,
        identity: &str,
        class: LimiterClass,
    ) -> Result<Decision, StoreError> {
        let key = format!("{}:{}", class.as_str(), identity);
        count_hit(self.store.as_ref(), &key, self.table.policy(class))
    }
}

/// Middleware function for per-class rate limiting.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let class = limiter.table.classify(request.uri().path());
    let identity = caller_of(&request).identity_key();
    metrics::record_rate_limit_check(class.as_str());

    let decision = match limiter.check_and_increment(&identity, class) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, class = %class, "Rate limit store unavailable, allowing request");
            return next.run(request).await;
        }
    };

    match decision.into_result() {
        Ok(decision) => {
            let mut response = next.run(request).await;
            decision.apply_headers(response.headers_mut());
            response
        }
        Err(limited) => {
            tracing::warn!(client = %identity, class = %class, retry_after = limited.retry_after_secs, "Rate limit exceeded");
            metrics::record_rate_limited(class.as_str());
            let mut response = ApiError::rate_limited(limited.retry_after_secs).into_response();
            decision.apply_headers(response.headers_mut());
            response
        }
    }
}
