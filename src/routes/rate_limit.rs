//! Sliding-window rate limiting for the HTTP surface.

use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use serde_json::json;
use tracing::warn;

use crate::state::SharedState;

/// Requests allowed per client within [`WINDOW`].
pub const MAX_REQUESTS: usize = 100;
/// Length of the sliding window.
pub const WINDOW: Duration = Duration::from_secs(15 * 60);

/// Per-client sliding window of request timestamps.
pub struct HttpRateLimiter {
    hits: DashMap<String, Vec<Instant>>,
}

impl Default for HttpRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRateLimiter {
    pub fn new() -> Self {
        Self {
            hits: DashMap::new(),
        }
    }

    /// Record a request for `key`; returns whether it is within the limit.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut requests = self.hits.entry(key.to_string()).or_default();

        requests.retain(|at| now.duration_since(*at) < WINDOW);
        if requests.len() >= MAX_REQUESTS {
            return false;
        }
        requests.push(now);
        true
    }
}

/// Axum middleware enforcing the per-IP limit on the REST surface.
pub async fn limit(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    let client = client_ip(&request);
    if !state.http_limiter().check(&client) {
        warn!(client = %client, "request rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "message": "too many requests",
                "code": "RATE_LIMITED",
            })),
        )
            .into_response();
    }
    next.run(request).await
}

/// Best-effort client identity: forwarded header first, then the socket
/// address.
fn client_ip(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}
