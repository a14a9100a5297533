//! HTTP surface tests: health endpoints, breaker admin routes, 429 mapping.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tower::ServiceExt;

use resilience_core::http::router;
use resilience_core::lifecycle::Services;
use resilience_core::ResilienceConfig;

mod common;

fn limited_config(default_quota: &str) -> ResilienceConfig {
    let mut config = ResilienceConfig::default();
    config.rate_limit.default = default_quota.to_string();
    config.rate_limit.tiers = HashMap::from([("pro".to_string(), "5/hour".to_string())]);
    config
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn header(response: &axum::response::Response, name: &str) -> u64 {
    response.headers()[name].to_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_liveness_and_readiness_over_tcp() {
    let service = common::spawn_service(ResilienceConfig::default()).await;
    let client = common::client();

    let live = client
        .get(format!("{}/health/live", service.base_url))
        .send()
        .await
        .expect("service unreachable");
    assert_eq!(live.status(), 200);
    let body: Value = live.json().await.unwrap();
    assert_eq!(body["status"], "healthy");

    let ready = client
        .get(format!("{}/health/ready", service.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(ready.status(), 200);
    let body: Value = ready.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["cache"]["healthy"], true);
    assert_eq!(body["checks"]["circuit_breakers"]["healthy"], true);
}

#[tokio::test]
async fn test_readiness_reports_failing_probe() {
    let service = common::spawn_service(ResilienceConfig::default()).await;
    service
        .services
        .health
        .register_fn("database", || async { Err("connection refused".to_string()) });

    let ready = common::client()
        .get(format!("{}/health/ready", service.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(ready.status(), 503);

    let body: Value = ready.json().await.unwrap();
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["checks"]["database"]["healthy"], false);
    assert_eq!(body["checks"]["database"]["error"], "connection refused");
    assert_eq!(body["checks"]["cache"]["healthy"], true);
}

#[tokio::test]
async fn test_open_breaker_fails_readiness_until_reset() {
    let mut config = ResilienceConfig::default();
    config.circuit_breaker.failure_threshold = 1;
    let service = common::spawn_service(config).await;
    let client = common::client();

    let breaker = service.services.breakers.get("payments");
    breaker.try_acquire().unwrap().failure();

    let ready = client
        .get(format!("{}/health/ready", service.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(ready.status(), 503);
    let body: Value = ready.json().await.unwrap();
    assert_eq!(body["checks"]["circuit_breakers"]["error"], "open circuits: payments");

    let breakers: Value = client
        .get(format!("{}/v1/breakers", service.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(breakers[0]["resource_name"], "payments");
    assert_eq!(breakers[0]["status"], "open");

    let reset = client
        .post(format!("{}/v1/breakers/payments/reset", service.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(reset.status(), 200);

    let missing = client
        .post(format!("{}/v1/breakers/ledger/reset", service.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    let ready = client
        .get(format!("{}/health/ready", service.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(ready.status(), 200);
}

#[tokio::test]
async fn test_rate_limit_maps_to_429_with_retry_after() {
    let services = Services::from_config(&limited_config("2/hour")).unwrap();
    let app = router(services.app_state(), Duration::from_secs(5));

    let first = app.clone().oneshot(get("/v1/breakers")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header(&first, "x-ratelimit-limit"), 2);
    assert_eq!(header(&first, "x-ratelimit-remaining"), 1);

    let second = app.clone().oneshot(get("/v1/breakers")).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(header(&second, "x-ratelimit-remaining"), 0);

    let third = app.clone().oneshot(get("/v1/breakers")).await.unwrap();
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after = header(&third, "retry-after");
    assert!((1..=3600).contains(&retry_after), "retry-after was {retry_after}");
    assert_eq!(header(&third, "x-ratelimit-remaining"), 0);

    let body = body_json(third).await;
    assert_eq!(body["error"], "rate limit exceeded");
    assert_eq!(body["limit"], 2);

    // Health endpoints bypass the limiter
    for _ in 0..5 {
        let live = app.clone().oneshot(get("/health/live")).await.unwrap();
        assert_eq!(live.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_rate_limit_is_per_api_key_and_tier() {
    let services = Services::from_config(&limited_config("1/hour")).unwrap();
    let app = router(services.app_state(), Duration::from_secs(5));

    let with_key = |key: &str, tier: Option<&str>| {
        let mut builder = Request::builder().uri("/v1/breakers").header("x-api-key", key);
        if let Some(tier) = tier {
            builder = builder.header("x-subscription-tier", tier);
        }
        builder.body(Body::empty()).unwrap()
    };

    let alice = app.clone().oneshot(with_key("alice", None)).await.unwrap();
    assert_eq!(alice.status(), StatusCode::OK);
    let alice = app.clone().oneshot(with_key("alice", None)).await.unwrap();
    assert_eq!(alice.status(), StatusCode::TOO_MANY_REQUESTS);

    let bob = app.clone().oneshot(with_key("bob", None)).await.unwrap();
    assert_eq!(bob.status(), StatusCode::OK);

    let carol = app
        .clone()
        .oneshot(with_key("carol", Some("pro")))
        .await
        .unwrap();
    assert_eq!(carol.status(), StatusCode::OK);
    assert_eq!(header(&carol, "x-ratelimit-limit"), 5);
    assert_eq!(header(&carol, "x-ratelimit-remaining"), 4);

    // Unknown tiers get the default quota
    let dave = app
        .clone()
        .oneshot(with_key("dave", Some("platinum")))
        .await
        .unwrap();
    assert_eq!(header(&dave, "x-ratelimit-limit"), 1);
}

#[tokio::test]
async fn test_disabled_rate_limit_always_allows() {
    let mut config = limited_config("1/hour");
    config.rate_limit.enabled = false;
    let services = Services::from_config(&config).unwrap();
    let app = router(services.app_state(), Duration::from_secs(5));

    for _ in 0..5 {
        let res = app.clone().oneshot(get("/v1/breakers")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_clear_cache_drops_only_the_resource_namespace() {
    let services = Services::from_config(&ResilienceConfig::default()).unwrap();
    let cache = services.cache.clone();
    let ttl = Duration::from_secs(60);
    let quotes = cache.namespace("quotes");
    cache.set(&format!("{quotes}a"), &1, ttl).await.unwrap();
    cache.set(&format!("{quotes}b"), &2, ttl).await.unwrap();
    cache.set(&format!("{}c", cache.namespace("accounts")), &3, ttl).await.unwrap();

    let app = router(services.app_state(), Duration::from_secs(5));
    let request = Request::builder()
        .method("DELETE")
        .uri("/v1/cache/quotes")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["removed"], 2);
    assert_eq!(cache.len(), 1);
}
