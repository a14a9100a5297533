//! Tiered rate limiting middleware.
//!
//! Maps a denied [`RateDecision`] to `429 Too Many Requests` with a
//! `Retry-After` header; allowed responses carry the `X-RateLimit-*` headers.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;

use crate::http::server::AppState;
use crate::rate_limit::RateDecision;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const TIER_HEADER: &str = "x-subscription-tier";

/// Caller identity: API key if present, else client IP.
fn client_key(request: &Request<Body>) -> String {
    if let Some(key) = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return format!("key:{key}");
    }
    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => format!("ip:{}", addr.ip()),
        None => "anonymous".to_string(),
    }
}

fn set_limit_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_at));
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = client_key(&request);
    let tier = request
        .headers()
        .get(TIER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let decision = state.limiter.check(&key, tier.as_deref());

    if decision.allowed {
        let mut response = next.run(request).await;
        set_limit_headers(response.headers_mut(), &decision);
        return response;
    }

    let retry_after = state.limiter.limiter().retry_after_secs(&decision);
    let body = Json(json!({
        "error": "rate limit exceeded",
        "limit": decision.limit,
        "reset_at": decision.reset_at,
    }));
    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    let headers = response.headers_mut();
    set_limit_headers(headers, &decision);
    headers.insert("retry-after", HeaderValue::from(retry_after));
    response
}
