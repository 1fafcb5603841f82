//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the local health endpoint and the proxy fallback
//! - Wire up middleware (tracing, request ID, timeout, identity, rate limit,
//!   auth-failure guard, response cache)
//! - Forward requests to the upstream marketplace API
//! - Reap expired store entries in the background

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, Request, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::cache::{cache_middleware, ResponseCache};
use crate::config::AppConfig;
use crate::http::response::ApiError;
use crate::observability::metrics;
use crate::security::auth_failure::{auth_failure_middleware, AuthFailureGuard};
use crate::security::identity::{identity_middleware, IdentityResolver};
use crate::security::rate_limit::{rate_limit_middleware, PolicyTable, RateLimiter};
use crate::store::MemoryStore;

/// Headers that only make sense on a single hop.
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
];

/// Application state injected into the proxy handler.
#[derive(Clone)]
pub struct AppState {
    pub client: Client<HttpConnector, Body>,
    /// Upstream base without trailing slash.
    pub upstream_base: Arc<str>,
}

/// HTTP gateway.
pub struct HttpServer {
    router: Router,
    store: MemoryStore,
}

impl HttpServer {
    /// Create a gateway with a fresh in-memory store.
    pub fn new(config: AppConfig) -> Self {
        Self::with_store(config, MemoryStore::new())
    }

    /// Create a gateway sharing `store` for counters and cached responses.
    pub fn with_store(config: AppConfig, store: MemoryStore) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let state = AppState {
            client,
            upstream_base: Arc::from(config.upstream.base_url.trim_end_matches('/')),
        };

        let router = Self::build_router(&config, state, &store);
        Self { router, store }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &AppConfig, state: AppState, store: &MemoryStore) -> Router {
        let shared = Arc::new(store.clone());
        let table = PolicyTable::from_config(&config.rate_limit);

        let mut proxied = Router::new().fallback(proxy_handler).with_state(state);

        if config.cache.enabled {
            let cache = ResponseCache::new(shared.clone(), &config.cache);
            proxied = proxied.layer(middleware::from_fn_with_state(cache, cache_middleware));
        }
        if config.rate_limit.enabled && config.rate_limit.auth_failure.enabled {
            let guard = AuthFailureGuard::new(shared.clone(), table.clone(), &config.rate_limit.auth_failure);
            proxied = proxied.layer(middleware::from_fn_with_state(guard, auth_failure_middleware));
        }
        if config.rate_limit.enabled {
            let limiter = RateLimiter::new(shared, table);
            proxied = proxied.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
        }

        Router::new()
            .route("/healthz", get(healthz))
            .merge(proxied.layer(middleware::from_fn_with_state(
                IdentityResolver::from_config(&config.listener),
                identity_middleware,
            )))
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(config.listener.request_timeout_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The assembled router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let store = self.store.clone();
        let reaper = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            loop {
                tick.tick().await;
                let purged = store.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired store entries");
                }
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await;

        reaper.abort();
        tracing::info!("HTTP server stopped");
        result
    }
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Forward the request to the upstream API.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let method = request.method().clone();

    let (mut parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    parts.uri = match format!("{}{}", state.upstream_base, path_and_query).parse::<Uri>() {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Invalid upstream URI");
            return ApiError::upstream_unavailable().into_response();
        }
    };
    parts.headers.remove(header::HOST);
    for name in HOP_BY_HOP {
        parts.headers.remove(name);
    }

    tracing::debug!(request_id = %request_id, method = %method, uri = %parts.uri, "Proxying request");

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            metrics::record_request(method.as_str(), response.status().as_u16(), start_time);
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            metrics::record_request(method.as_str(), 502, start_time);
            ApiError::upstream_unavailable().into_response()
        }
    }
}
