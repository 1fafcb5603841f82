//! Caller identity middleware.
//!
//! An auth hop in front of the gateway may forward the resolved user as
//! `X-User-Id` / `X-User-Role`. Those headers are honoured only when the peer
//! is a configured trusted proxy; from anyone else they are stripped before
//! forwarding. A request carrying `Authorization` or a session cookie is
//! treated as authenticated even when no user id is known, so it is never
//! cached under an anonymous key.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::Response,
};

use crate::config::ListenerConfig;

pub const X_USER_ID: &str = "x-user-id";
pub const X_USER_ROLE: &str = "x-user-role";

/// Who is making the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    /// User id asserted by a trusted proxy.
    pub user_id: Option<String>,
    /// Role of the authenticated user (student, teacher, admin).
    pub role: Option<String>,
    /// Request carried credentials (bearer token or session cookie).
    pub credentialed: bool,
    /// Peer IP, or "unknown" when the transport did not provide one.
    pub ip: String,
}

impl Caller {
    pub fn anonymous(ip: impl Into<String>) -> Self {
        Self {
            user_id: None,
            role: None,
            credentialed: false,
            ip: ip.into(),
        }
    }

    pub fn user(id: impl Into<String>, role: Option<&str>, ip: impl Into<String>) -> Self {
        Self {
            user_id: Some(id.into()),
            role: role.map(str::to_string),
            credentialed: true,
            ip: ip.into(),
        }
    }

    /// Credentials present but no trusted user id.
    pub fn credentialed(ip: impl Into<String>) -> Self {
        Self {
            credentialed: true,
            ..Self::anonymous(ip)
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some() || self.credentialed
    }

    /// Per-user for trusted user ids, per-IP otherwise.
    pub fn identity_key(&self) -> String {
        match &self.user_id {
            Some(id) => format!("user:{id}"),
            None => format!("ip:{}", self.ip),
        }
    }
}

/// Resolves callers; shared by the identity middleware.
#[derive(Clone, Debug, Default)]
pub struct IdentityResolver {
    trusted_proxies: Arc<Vec<IpAddr>>,
}

impl IdentityResolver {
    pub fn new(trusted_proxies: Vec<IpAddr>) -> Self {
        Self {
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }

    pub fn from_config(config: &ListenerConfig) -> Self {
        Self::new(config.trusted_proxies.clone())
    }

    fn trusts(&self, peer: Option<SocketAddr>) -> bool {
        peer.is_some_and(|addr| self.trusted_proxies.contains(&addr.ip()))
    }

    /// Build the caller, removing identity headers the peer may not assert.
    pub fn resolve(&self, headers: &mut HeaderMap, peer: Option<SocketAddr>) -> Caller {
        let ip = peer
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if !self.trusts(peer) {
            if headers.contains_key(X_USER_ID) {
                tracing::debug!(peer = %ip, "Dropping identity headers from untrusted peer");
            }
            headers.remove(X_USER_ID);
            headers.remove(X_USER_ROLE);
        }

        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        match header(X_USER_ID) {
            Some(id) => Caller::user(id, header(X_USER_ROLE), ip),
            None if carries_credentials(headers) => Caller::credentialed(ip),
            None => Caller::anonymous(ip),
        }
    }
}

fn carries_credentials(headers: &HeaderMap) -> bool {
    if headers.contains_key(header::AUTHORIZATION) {
        return true;
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.split('=').next())
        .any(|name| name.trim().to_ascii_lowercase().contains("session"))
}

/// Attach a `Caller` extension to every request.
pub async fn identity_middleware(
    State(resolver): State<IdentityResolver>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let caller = resolver.resolve(request.headers_mut(), peer);
    request.extensions_mut().insert(caller);
    next.run(request).await
}

/// The caller attached by `identity_middleware`, or an anonymous one.
pub fn caller_of(request: &Request<Body>) -> Caller {
    request
        .extensions()
        .get::<Caller>()
        .cloned()
        .unwrap_or_else(|| Caller::anonymous("unknown"))
}
