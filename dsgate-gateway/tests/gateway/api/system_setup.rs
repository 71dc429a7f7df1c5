// First-run setup flow.

use crate::helpers;
use axum::http::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn test_first_run_setup_flow() {
    let ctx = helpers::create_test_context().await;
    let server = &ctx.server;

    // Empty store: setup is open.
    let response = server.get("/api/v1/system/status").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["status"], "needs_setup");

    // The setup token is stable until consumed.
    let first = server.get("/api/v1/system/setup").await.json::<Value>();
    let second = server.get("/api/v1/system/setup").await.json::<Value>();
    assert_eq!(first["token"], second["token"]);
    let token = first["token"].as_str().unwrap().to_string();

    // Wrong setup token is rejected and does not create the admin.
    let response = server
        .post("/api/v1/system/setup")
        .json(&json!({"token": "wrong", "user": "root", "pass": "p@ss"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

    // Correct token creates the first admin and returns a usable JWT.
    let response = server
        .post("/api/v1/system/setup")
        .json(&json!({"token": token, "user": "root", "pass": "p@ss"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["user"]["role"], "admin");
    let jwt = body["token"].as_str().unwrap();

    let response = server
        .get("/api/v1/meta/biz")
        .add_header("Authorization", format!("Bearer {jwt}"))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    // Setup is closed from now on.
    let response = server.get("/api/v1/system/setup").await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    let response = server
        .post("/api/v1/system/setup")
        .json(&json!({"token": token, "user": "again", "pass": "p@ss"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

    let response = server.get("/api/v1/system/status").await;
    assert_eq!(response.json::<Value>()["status"], "ready_for_login");
}

#[tokio::test]
async fn test_login_after_setup() {
    let ctx = helpers::create_test_context().await;
    helpers::setup_admin(&ctx.server).await;

    let response = ctx
        .server
        .post("/api/v1/auth/login")
        .json(&json!({"user": "root", "pass": "p@ssw0rd"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["user"]["username"], "root");
    assert!(body["token"].is_string());

    let response = ctx
        .server
        .post("/api/v1/auth/login")
        .json(&json!({"user": "root", "pass": "nope"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    let body = response.json::<Value>();
    assert_eq!(body["error"]["type"], "unauthenticated");
}

#[tokio::test]
async fn test_admin_routes_reject_plain_users() {
    let ctx = helpers::create_test_context().await;
    let admin_token = helpers::setup_admin(&ctx.server).await;

    // Mint a non-admin user directly in the store, then log in.
    let hash = bcrypt::hash("reader", 4).unwrap();
    ctx.state
        .store
        .create_user("u-reader", "reader", &hash, "user")
        .await
        .unwrap();
    let response = ctx
        .server
        .post("/api/v1/auth/login")
        .json(&json!({"user": "reader", "pass": "reader"}))
        .await;
    let user_token = response.json::<Value>()["token"].as_str().unwrap().to_string();

    // Plain user: meta works, admin does not.
    let response = ctx
        .server
        .get("/api/v1/meta/biz")
        .add_header("Authorization", format!("Bearer {user_token}"))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let response = ctx
        .server
        .get("/api/v1/admin/metrics")
        .add_header("Authorization", format!("Bearer {user_token}"))
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

    let response = ctx
        .server
        .get("/api/v1/admin/metrics")
        .add_header("Authorization", format!("Bearer {admin_token}"))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
}
