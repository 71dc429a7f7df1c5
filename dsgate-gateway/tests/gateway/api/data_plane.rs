// Data-plane dispatch through the routing registry.

use crate::helpers;
use axum::http::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn test_query_routes_to_backend() {
    let ctx = helpers::create_test_context().await;
    let token = helpers::setup_admin(&ctx.server).await;
    helpers::publish_echo_backend(&ctx.state, "library");

    let response = ctx
        .server
        .post("/api/v1/data/query")
        .add_header("Authorization", format!("Bearer {token}"))
        .json(&json!({"biz_name": "library", "query": {"title": {"contains": "dune"}}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["source"], "echo");
    assert_eq!(body["result"]["echo"]["title"]["contains"], "dune");
}

#[tokio::test]
async fn test_query_without_route_is_bad_gateway() {
    let ctx = helpers::create_test_context().await;
    let token = helpers::setup_admin(&ctx.server).await;

    let response = ctx
        .server
        .post("/api/v1/data/query")
        .add_header("Authorization", format!("Bearer {token}"))
        .json(&json!({"biz_name": "ghost", "query": {}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        response.json::<Value>()["error"]["type"],
        "backend_unavailable"
    );
}

#[tokio::test]
async fn test_mutate_forwards_operation_tag() {
    let ctx = helpers::create_test_context().await;
    let token = helpers::setup_admin(&ctx.server).await;
    helpers::publish_echo_backend(&ctx.state, "library");

    let response = ctx
        .server
        .post("/api/v1/data/mutate")
        .add_header("Authorization", format!("Bearer {token}"))
        .json(&json!({
            "biz_name": "library",
            "operation": "create",
            "payload": {"title": "Dune"}
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["result"]["applied"], "create");

    // Plugin-unknown operation strings are rejected at the gateway.
    let response = ctx
        .server
        .post("/api/v1/data/mutate")
        .add_header("Authorization", format!("Bearer {token}"))
        .json(&json!({"biz_name": "library", "operation": "truncate", "payload": {}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_meta_biz_and_schema() {
    let ctx = helpers::create_test_context().await;
    let token = helpers::setup_admin(&ctx.server).await;
    helpers::publish_echo_backend(&ctx.state, "library");

    let response = ctx
        .server
        .get("/api/v1/meta/biz")
        .add_header("Authorization", format!("Bearer {token}"))
        .await;
    assert_eq!(response.json::<Value>()["data"], json!(["library"]));

    let response = ctx
        .server
        .get("/api/v1/meta/schema/library")
        .add_header("Authorization", format!("Bearer {token}"))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert!(body["tables"]["books"]["fields"].is_array());

    let response = ctx
        .server
        .get("/api/v1/meta/schema/ghost")
        .add_header("Authorization", format!("Bearer {token}"))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_presentations_default_view() {
    let ctx = helpers::create_test_context().await;
    let token = helpers::setup_admin(&ctx.server).await;

    // No views yet: 404.
    let response = ctx
        .server
        .get("/api/v1/meta/presentations?biz=library&table=books")
        .add_header("Authorization", format!("Bearer {token}"))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let response = ctx
        .server
        .put("/api/v1/admin/biz-config/library/views")
        .add_header("Authorization", format!("Bearer {token}"))
        .json(&json!({"views": {"books": [
            {"view_name": "grid", "view_type": "grid", "display_name": "Grid",
             "is_default": true, "binding": {"columns": ["title"]}}
        ]}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let response = ctx
        .server
        .get("/api/v1/meta/presentations?biz=library&table=books")
        .add_header("Authorization", format!("Bearer {token}"))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["view_name"], "grid");
}
