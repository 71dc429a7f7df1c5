// Login failure counting and temporary lockout.

use crate::helpers;
use axum::http::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn test_lockout_short_circuits_correct_password() {
    let ctx = helpers::create_test_context().await;
    helpers::setup_admin(&ctx.server).await;

    // Five consecutive failures from one IP for one username.
    for _ in 0..5 {
        let response = ctx
            .server
            .post("/api/v1/auth/login")
            .add_header("X-Forwarded-For", "203.0.113.9")
            .json(&json!({"user": "root", "pass": "wrong"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    // The sixth attempt with the *correct* password is still rejected.
    let response = ctx
        .server
        .post("/api/v1/auth/login")
        .add_header("X-Forwarded-For", "203.0.113.9")
        .json(&json!({"user": "root", "pass": "p@ssw0rd"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert!(response.json::<Value>()["error"]["message"]
        .as_str()
        .unwrap()
        .contains("locked"));

    // The lock is scoped to the (IP, username) pair.
    let response = ctx
        .server
        .post("/api/v1/auth/login")
        .add_header("X-Forwarded-For", "203.0.113.10")
        .json(&json!({"user": "root", "pass": "p@ssw0rd"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_success_resets_failure_streak() {
    let ctx = helpers::create_test_context().await;
    helpers::setup_admin(&ctx.server).await;

    for _ in 0..4 {
        ctx.server
            .post("/api/v1/auth/login")
            .add_header("X-Forwarded-For", "203.0.113.20")
            .json(&json!({"user": "root", "pass": "wrong"}))
            .await;
    }

    // A success within the streak clears the counter.
    let response = ctx
        .server
        .post("/api/v1/auth/login")
        .add_header("X-Forwarded-For", "203.0.113.20")
        .json(&json!({"user": "root", "pass": "p@ssw0rd"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    // Four more failures still do not lock (streak restarted at zero).
    for _ in 0..4 {
        ctx.server
            .post("/api/v1/auth/login")
            .add_header("X-Forwarded-For", "203.0.113.20")
            .json(&json!({"user": "root", "pass": "wrong"}))
            .await;
    }
    let response = ctx
        .server
        .post("/api/v1/auth/login")
        .add_header("X-Forwarded-For", "203.0.113.20")
        .json(&json!({"user": "root", "pass": "p@ssw0rd"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
}
