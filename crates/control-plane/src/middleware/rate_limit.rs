// Fixed-window rate limiter keyed by client IP
// Decision: The window starts at the first request; its expiry is armed only then
// Decision: Admission is decided on the value INCR returns, so concurrent requests cannot overshoot
// Decision: Fail open when the cache is unreachable

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;

use crate::api::common::ApiError;
use crate::cache::{rate_limit_key, CacheBackend};
use crate::config::RateLimitConfig;

/// Paths that are never rate limited
const EXEMPT_PATHS: &[&str] = &["/health"];

#[derive(Clone)]
pub struct RateLimitState {
    pub cache: CacheBackend,
    pub config: RateLimitConfig,
}

/// Client IP: first X-Forwarded-For entry, then X-Real-IP, then the peer address
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Count one request; false when it lands beyond the window's limit
async fn admit(state: &RateLimitState, key: &str) -> anyhow::Result<bool> {
    let count = state.cache.incr(key, state.config.window).await?;
    Ok(count <= state.config.limit)
}

pub async fn rate_limit(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.enabled || EXEMPT_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);

    match admit(&state, &rate_limit_key(&ip)).await {
        Ok(true) => next.run(request).await,
        Ok(false) => {
            tracing::info!(ip = %ip, limit = state.config.limit, "Rate limit exceeded");
            ApiError::too_many_requests("Too many requests").into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, ip = %ip, "Rate limit check failed, allowing request");
            next.run(request).await
        }
    }
}
