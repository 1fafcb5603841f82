//! Failed-credential limiter.
//!
//! Counts 401/422 responses from auth-classed endpoints per caller in a bucket
//! separate from general traffic. Once the failure budget is spent, further
//! auth attempts are rejected until the window closes. When disabled the guard
//! always allows.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::AuthFailureConfig;
use crate::http::response::ApiError;
use crate::observability::metrics;
use crate::security::identity::caller_of;
use crate::security::rate_limit::{count_hit, decide, Decision, LimitPolicy, LimiterClass, PolicyTable};
use crate::store::{CounterStore, StoreError};

/// Guard state shared by the middleware.
#[derive(Clone)]
pub struct AuthFailureGuard {
    store: Arc<dyn CounterStore>,
    table: Arc<PolicyTable>,
    policy: LimitPolicy,
    enabled: bool,
}

impl AuthFailureGuard {
    pub fn new(store: Arc<dyn CounterStore>, table: PolicyTable, config: &AuthFailureConfig) -> Self {
        Self {
            store,
            table: Arc::new(table),
            policy: LimitPolicy {
                max_attempts: config.max_attempts,
                window: Duration::from_secs(config.window_secs),
            },
            enabled: config.enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn key(identity: &str) -> String {
        format!("{}:{}", LimiterClass::AuthFailure.as_str(), identity)
    }

    /// Whether `identity` may attempt to authenticate. Does not count.
    pub fn check(&self, identity: &str) -> Result<Decision, StoreError> {
        let max = self.policy.max_attempts;
        if !self.enabled {
            return Ok(Decision {
                allowed: true,
                limit: max,
                remaining: max,
                retry_after_secs: 0,
            });
        }

        match self.store.peek(&Self::key(identity))? {
            // One more than the recorded failures: blocked once failures reach the limit.
            Some(bucket) => Ok(decide(
                bucket.attempts.saturating_add(1),
                bucket.window_expires_at,
                self.store.now(),
                self.policy,
            )),
            None => Ok(Decision {
                allowed: true,
                limit: max,
                remaining: max,
                retry_after_secs: 0,
            }),
        }
    }

    /// Count one failed attempt. No-op when disabled.
    pub fn record_failure(&self, identity: &str) -> Result<(), StoreError> {
        if self.enabled {
            count_hit(self.store.as_ref(), &Self::key(identity), self.policy)?;
        }
        Ok(())
    }

    fn guards(&self, path: &str) -> bool {
        self.enabled && self.table.classify(path) == LimiterClass::Auth
    }
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::UNPROCESSABLE_ENTITY
}

/// Middleware rejecting callers that exhausted their failure budget.
pub async fn auth_failure_middleware(
    State(guard): State<AuthFailureGuard>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !guard.guards(request.uri().path()) {
        return next.run(request).await;
    }

    let identity = caller_of(&request).identity_key();
    match guard.check(&identity) {
        Ok(decision) if !decision.allowed => {
            tracing::warn!(client = %identity, retry_after = decision.retry_after_secs, "Too many failed auth attempts");
            metrics::record_rate_limited(LimiterClass::AuthFailure.as_str());
            return ApiError::rate_limited(decision.retry_after_secs).into_response();
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Auth failure store unavailable, allowing request");
            return next.run(request).await;
        }
    }

    let response = next.run(request).await;
    if is_auth_failure(response.status()) {
        if let Err(e) = guard.record_failure(&identity) {
            tracing::warn!(error = %e, "Failed to record auth failure");
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    use crate::store::{MemoryStore, MockClock};

    fn app(guard: AuthFailureGuard, calls: Arc<AtomicUsize>) -> Router {
        let rejecting = move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                StatusCode::UNAUTHORIZED
            }
        };
        Router::new()
            .route("/api/login", get(rejecting.clone()).post(rejecting.clone()))
            .route("/api/teachers", get(rejecting))
            .layer(middleware::from_fn_with_state(guard, auth_failure_middleware))
    }

    async fn status_of(app: &Router, method: &str, uri: &str) -> StatusCode {
        app.clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
    }

    fn guard(enabled: bool) -> (AuthFailureGuard, MockClock) {
        let clock = MockClock::default();
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        let config = AuthFailureConfig {
            enabled,
            max_attempts: 3,
            window_secs: 900,
        };
        (
            AuthFailureGuard::new(Arc::new(store), PolicyTable::default(), &config),
            clock,
        )
    }

    // Which setting should be the default is undecided; both are exercised here.
    #[test]
    fn test_disabled_guard_always_allows() {
        let (guard, _) = guard(false);
        for _ in 0..10 {
            guard.record_failure("ip:1.1.1.1").unwrap();
        }
        assert!(guard.check("ip:1.1.1.1").unwrap().allowed);
        assert!(!guard.guards("/api/login"));
    }

    #[test]
    fn test_enabled_guard_blocks_after_failures() {
        let (guard, clock) = guard(true);
        assert!(guard.guards("/api/login"));
        assert!(!guard.guards("/api/teachers"));

        for _ in 0..2 {
            guard.record_failure("ip:1.1.1.1").unwrap();
            assert!(guard.check("ip:1.1.1.1").unwrap().allowed);
        }
        guard.record_failure("ip:1.1.1.1").unwrap();
        let blocked = guard.check("ip:1.1.1.1").unwrap();
        assert!(!blocked.allowed);
        assert!(blocked.retry_after_secs <= 900);

        // Other callers are unaffected.
        assert!(guard.check("ip:2.2.2.2").unwrap().allowed);

        clock.advance(Duration::from_secs(900));
        assert!(guard.check("ip:1.1.1.1").unwrap().allowed);
    }

    #[test]
    fn test_failure_statuses() {
        assert!(is_auth_failure(StatusCode::UNAUTHORIZED));
        assert!(is_auth_failure(StatusCode::UNPROCESSABLE_ENTITY));
        assert!(!is_auth_failure(StatusCode::OK));
        assert!(!is_auth_failure(StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn test_middleware_blocks_after_rejected_logins() {
        let (guard, clock) = guard(true);
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(guard, calls.clone());

        for _ in 0..3 {
            assert_eq!(status_of(&app, "POST", "/api/login").await, StatusCode::UNAUTHORIZED);
        }
        assert_eq!(status_of(&app, "POST", "/api/login").await, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // 401s outside auth paths are neither counted nor blocked.
        for _ in 0..5 {
            assert_eq!(status_of(&app, "GET", "/api/teachers").await, StatusCode::UNAUTHORIZED);
        }

        clock.advance(Duration::from_secs(900));
        assert_eq!(status_of(&app, "POST", "/api/login").await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_disabled_middleware_passes_everything() {
        let (guard, _) = guard(false);
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(guard, calls.clone());

        for _ in 0..10 {
            assert_eq!(status_of(&app, "POST", "/api/login").await, StatusCode::UNAUTHORIZED);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }
}
