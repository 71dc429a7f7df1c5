// Rate-limiter chains observed through the HTTP surface.

use crate::helpers;
use axum::http::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn test_per_biz_limit_enforced() {
    let ctx = helpers::create_test_context().await;
    let token = helpers::setup_admin(&ctx.server).await;
    let auth = format!("Bearer {token}");
    helpers::publish_echo_backend(&ctx.state, "tight");
    helpers::publish_echo_backend(&ctx.state, "roomy");

    // Biz "tight" gets 2 req/s with burst 2; "roomy" keeps the default.
    let response = ctx
        .server
        .put("/api/v1/admin/security/rate-limiting/biz/tight")
        .add_header("Authorization", auth.clone())
        .json(&json!({"rate_per_second": 2.0, "burst": 2}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let mut statuses = Vec::new();
    for _ in 0..4 {
        let response = ctx
            .server
            .post("/api/v1/data/query")
            .add_header("Authorization", auth.clone())
            .json(&json!({"biz_name": "tight", "query": {}}))
            .await;
        statuses.push(response.status_code().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 429, 429]);

    // The exhausted biz bucket does not affect another biz.
    let response = ctx
        .server
        .post("/api/v1/data/query")
        .add_header("Authorization", auth.clone())
        .json(&json!({"biz_name": "roomy", "query": {}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_rejection_names_the_gate() {
    let ctx = helpers::create_test_context().await;
    let token = helpers::setup_admin(&ctx.server).await;
    let auth = format!("Bearer {token}");
    helpers::publish_echo_backend(&ctx.state, "tight");

    ctx.server
        .put("/api/v1/admin/security/rate-limiting/biz/tight")
        .add_header("Authorization", auth.clone())
        .json(&json!({"rate_per_second": 1.0, "burst": 1}))
        .await;

    ctx.server
        .post("/api/v1/data/query")
        .add_header("Authorization", auth.clone())
        .json(&json!({"biz_name": "tight", "query": {}}))
        .await;
    let response = ctx
        .server
        .post("/api/v1/data/query")
        .add_header("Authorization", auth)
        .json(&json!({"biz_name": "tight", "query": {}}))
        .await;

    assert_eq!(response.status_code(), StatusCode::TOO_MANY_REQUESTS);
    let body = response.json::<Value>();
    assert_eq!(body["error"]["type"], "rate_limited");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("per_biz"));
}

#[tokio::test]
async fn test_per_ip_gate_on_lightweight_chain() {
    // Tighten the per-IP fallback so the lightweight chain trips fast.
    let ctx = helpers::create_test_context_with(|config| {
        config.rate_limiting.ip_rate_per_minute = 60.0;
        config.rate_limiting.ip_burst = 3;
    })
    .await;

    let mut last_status = StatusCode::OK;
    for _ in 0..5 {
        let response = ctx
            .server
            .get("/api/v1/system/status")
            .add_header("X-Forwarded-For", "203.0.113.50")
            .await;
        last_status = response.status_code();
    }
    assert_eq!(last_status, StatusCode::TOO_MANY_REQUESTS);

    // A different client IP has its own bucket.
    let response = ctx
        .server
        .get("/api/v1/system/status")
        .add_header("X-Forwarded-For", "203.0.113.51")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_ip_defaults_admin_roundtrip() {
    let ctx = helpers::create_test_context().await;
    let token = helpers::setup_admin(&ctx.server).await;
    let auth = format!("Bearer {token}");

    // Nothing stored yet: the config fallbacks are reported.
    let response = ctx
        .server
        .get("/api/v1/admin/security/rate-limiting/global")
        .add_header("Authorization", auth.clone())
        .await;
    assert_eq!(response.json::<Value>()["source"], "defaults");

    let response = ctx
        .server
        .put("/api/v1/admin/security/rate-limiting/global")
        .add_header("Authorization", auth.clone())
        .json(&json!({"rate_per_minute": 120.0, "burst": 25}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let response = ctx
        .server
        .get("/api/v1/admin/security/rate-limiting/global")
        .add_header("Authorization", auth.clone())
        .await;
    let body = response.json::<Value>();
    assert_eq!(body["rate_per_minute"], 120.0);
    assert_eq!(body["burst"], 25);

    // Invalid values are rejected.
    let response = ctx
        .server
        .put("/api/v1/admin/security/rate-limiting/global")
        .add_header("Authorization", auth)
        .json(&json!({"rate_per_minute": 0.0, "burst": 0}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}
