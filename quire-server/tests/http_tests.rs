// HTTP surface tests
// Drive the router in-process with tower's `oneshot`

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use quire_server::{
    AppState, ManualClock, QueryCache, QueryCacheConfig, RateLimitConfig, RateLimiter,
    create_router,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

fn app_with(config: RateLimitConfig) -> Router {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let cache = Arc::new(QueryCache::volatile(&QueryCacheConfig::default(), clock.clone()));
    let limiter = RateLimiter::with_clock(config, clock);
    create_router(AppState { cache, limiter })
}

/// Limiter keyed by `X-Forwarded-For`, as deployed behind a proxy
fn app_with_limit(max_requests: u64) -> Router {
    app_with(RateLimitConfig {
        enabled: true,
        max_requests,
        window_ms: 60_000,
        trust_proxy_headers: true,
        ..Default::default()
    })
}

fn app() -> Router {
    app_with_limit(1_000)
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "203.0.113.7");
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let response = app().oneshot(request("GET", "/health", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-ratelimit-limit"));
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_set_then_get() {
    let app = app();

    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            "/cache/durable/profile:1",
            Some(json!({"value": {"name": "Ada"}, "ttl_secs": 60})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(request("GET", "/cache/durable/profile:1", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["value"], json!({"name": "Ada"}));
    assert_eq!(body["backend"], "durable");
}

#[tokio::test]
async fn test_miss_is_404() {
    let response = app()
        .oneshot(request("GET", "/cache/memory/nothing", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["code"], "cache_miss");
}

#[tokio::test]
async fn test_unknown_backend_is_400() {
    let response = app()
        .oneshot(request("GET", "/cache/disk/k", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "invalid_backend");
}

#[tokio::test]
async fn test_zero_ttl_rejected() {
    let response = app()
        .oneshot(request(
            "PUT",
            "/cache/memory/k",
            Some(json!({"value": 1, "ttl_secs": 0})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalidate_hits_both_backends() {
    let app = app();

    for backend in ["memory", "durable"] {
        app.clone()
            .oneshot(request(
                "PUT",
                &format!("/cache/{backend}/feed"),
                Some(json!({"value": [1, 2, 3]})),
            ))
            .await
            .unwrap();
    }

    let response = app
        .clone()
        .oneshot(request("DELETE", "/cache/keys/feed", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    for backend in ["memory", "durable"] {
        let response = app
            .clone()
            .oneshot(request("GET", &format!("/cache/{backend}/feed"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn test_stats_and_clear() {
    let app = app();

    app.clone()
        .oneshot(request("PUT", "/cache/memory/a", Some(json!({"value": "x"}))))
        .await
        .unwrap();
    app.clone()
        .oneshot(request("GET", "/cache/memory/a", None))
        .await
        .unwrap();

    let stats = json_body(
        app.clone()
            .oneshot(request("GET", "/cache/stats", None))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(stats["memory"]["hits"], 1);
    assert_eq!(stats["memory"]["sets"], 1);

    let response = app
        .clone()
        .oneshot(request("POST", "/cache/clear", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(request("GET", "/cache/memory/a", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rate_limit_rejection() {
    let app = app_with_limit(3);

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(request("GET", "/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(request("GET", "/health", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    let body = json_body(response).await;
    assert_eq!(
        body,
        json!({"error": "Too many requests", "code": "rate_limit_exceeded"})
    );

    // A different client is unaffected
    let other = Request::builder()
        .uri("/health")
        .header("x-forwarded-for", "198.51.100.1")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(other).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_disabled_limiter_passes_through() {
    let app = app_with(RateLimitConfig {
        enabled: false,
        max_requests: 1,
        ..Default::default()
    });

    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(request("GET", "/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_rotating_forwarded_for_is_ignored_by_default() {
    let app = app_with(RateLimitConfig {
        enabled: true,
        max_requests: 2,
        ..Default::default()
    });

    let mut statuses = Vec::new();
    for spoofed in ["1.1.1.1", "2.2.2.2", "3.3.3.3"] {
        let request = Request::builder()
            .uri("/health")
            .header("x-forwarded-for", spoofed)
            .body(Body::empty())
            .unwrap();
        statuses.push(app.clone().oneshot(request).await.unwrap().status());
    }

    assert_eq!(
        statuses,
        vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
    );
}

#[tokio::test]
async fn test_huge_ttl_is_stored() {
    let app = app();

    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            "/cache/memory/forever",
            Some(json!({"value": 1, "ttl_secs": 2_305_843_009_213_693_952u64})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(request("GET", "/cache/memory/forever", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["value"], 1);
}

#[tokio::test]
async fn test_keys_named_like_routes_can_be_invalidated() {
    let app = app();

    for key in ["stats", "clear"] {
        app.clone()
            .oneshot(request(
                "PUT",
                &format!("/cache/memory/{key}"),
                Some(json!({"value": key})),
            ))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request("DELETE", &format!("/cache/keys/{key}"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request("GET", &format!("/cache/memory/{key}"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
