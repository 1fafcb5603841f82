//! Cache hook around handler dispatch.

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::cache::response_cache::{cache_key, CacheEntry, CacheOutcome, ResponseCache};
use crate::http::response::ApiError;
use crate::observability::metrics;
use crate::security::identity::caller_of;

pub const X_CACHE: &str = "x-cache";
pub const X_CACHE_KEY: &str = "x-cache-key";

fn mark(response: &mut Response, outcome: CacheOutcome, key: Option<&str>) {
    let headers = response.headers_mut();
    headers.insert(X_CACHE, HeaderValue::from_static(outcome.as_str()));
    if let Some(value) = key.and_then(|k| HeaderValue::from_str(k).ok()) {
        headers.insert(X_CACHE_KEY, value);
    }
    metrics::record_cache(match outcome {
        CacheOutcome::Hit => "hit",
        CacheOutcome::Miss => "miss",
        CacheOutcome::Bypass => "bypass",
    });
}

fn replay(entry: CacheEntry) -> Response {
    let status = entry.status();
    let headers = entry.header_map();
    let mut response = Response::new(Body::from(entry.body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Serve eligible reads from the cache, store fresh successful ones.
pub async fn cache_middleware(
    State(cache): State<ResponseCache>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let caller = caller_of(&request);
    if !cache.is_eligible(request.method(), request.uri(), &caller) {
        let mut response = next.run(request).await;
        mark(&mut response, CacheOutcome::Bypass, None);
        return response;
    }

    let key = cache_key(request.method(), request.uri(), &caller);
    if let Some(entry) = cache.lookup(&key) {
        tracing::debug!(key = %key, "Cache hit");
        let mut response = replay(entry);
        mark(&mut response, CacheOutcome::Hit, Some(&key));
        return response;
    }

    let ttl = cache.ttl_for(request.uri().path());
    let response = next.run(request).await;

    // Only bodies of known size are buffered; streams pass straight through.
    let declared_len = response.body().size_hint().exact().or_else(|| {
        response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
    });
    let storable = declared_len.is_some_and(|len| len <= cache.max_payload_bytes() as u64);

    if !response.status().is_success() || !storable {
        let mut response = response;
        mark(&mut response, CacheOutcome::Miss, Some(&key));
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, cache.max_payload_bytes()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, key = %key, "Failed to read response body");
            return ApiError::upstream_unavailable().into_response();
        }
    };

    let entry = CacheEntry::new(parts.status, &parts.headers, bytes.to_vec());
    if cache.store(&key, &entry, ttl) {
        tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "Cached response");
    }

    let mut response = Response::from_parts(parts, Body::from(bytes));
    mark(&mut response, CacheOutcome::Miss, Some(&key));
    response
}
