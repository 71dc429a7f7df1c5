// Biz-configuration CRUD and cache invalidation through the admin API.

use crate::helpers;
use axum::http::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn test_write_invalidates_cached_read() {
    let ctx = helpers::create_test_context().await;
    let token = helpers::setup_admin(&ctx.server).await;

    let response = ctx
        .server
        .put("/api/v1/admin/biz-config/library/settings")
        .add_header("Authorization", format!("Bearer {token}"))
        .json(&json!({"is_publicly_searchable": true, "default_query_table": "books"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    // Warm the cache.
    let response = ctx
        .server
        .get("/api/v1/admin/biz-config/library")
        .add_header("Authorization", format!("Bearer {token}"))
        .await;
    assert_eq!(response.json::<Value>()["is_publicly_searchable"], true);

    // Write, then read again: the next read reflects the new value.
    ctx.server
        .put("/api/v1/admin/biz-config/library/settings")
        .add_header("Authorization", format!("Bearer {token}"))
        .json(&json!({"is_publicly_searchable": false}))
        .await;
    let response = ctx
        .server
        .get("/api/v1/admin/biz-config/library")
        .add_header("Authorization", format!("Bearer {token}"))
        .await;
    let body = response.json::<Value>();
    assert_eq!(body["is_publicly_searchable"], false);
    assert!(body["default_query_table"].is_null());
}

#[tokio::test]
async fn test_unconfigured_biz_is_404() {
    let ctx = helpers::create_test_context().await;
    let token = helpers::setup_admin(&ctx.server).await;

    let response = ctx
        .server
        .get("/api/v1/admin/biz-config/ghost")
        .add_header("Authorization", format!("Bearer {token}"))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["error"]["type"], "not_found");
}

#[tokio::test]
async fn test_tables_fields_permissions_roundtrip() {
    let ctx = helpers::create_test_context().await;
    let token = helpers::setup_admin(&ctx.server).await;
    let auth = format!("Bearer {token}");

    ctx.server
        .put("/api/v1/admin/biz-config/library/settings")
        .add_header("Authorization", auth.clone())
        .json(&json!({"is_publicly_searchable": true}))
        .await;
    ctx.server
        .put("/api/v1/admin/biz-config/library/tables")
        .add_header("Authorization", auth.clone())
        .json(&json!({"tables": [
            {"table_name": "books", "is_searchable": true},
            {"table_name": "authors", "is_searchable": false}
        ]}))
        .await;
    ctx.server
        .put("/api/v1/admin/biz-config/library/tables/books/fields")
        .add_header("Authorization", auth.clone())
        .json(&json!({"fields": {
            "title": {"is_searchable": true, "is_returnable": true, "data_type": "string"},
            "published": {"is_searchable": true, "is_returnable": false, "data_type": "date"}
        }}))
        .await;
    ctx.server
        .put("/api/v1/admin/biz-config/library/tables/books/permissions")
        .add_header("Authorization", auth.clone())
        .json(&json!({"allow_create": true, "allow_update": true, "allow_delete": false}))
        .await;

    let response = ctx
        .server
        .get("/api/v1/admin/biz-config/library")
        .add_header("Authorization", auth)
        .await;
    let body = response.json::<Value>();
    let books = &body["tables"]["books"];
    assert_eq!(books["is_searchable"], true);
    assert_eq!(books["allow_create"], true);
    assert_eq!(books["allow_delete"], false);
    assert_eq!(books["fields"]["published"]["data_type"], "date");
    assert_eq!(body["tables"]["authors"]["is_searchable"], false);
}

#[tokio::test]
async fn test_views_bulk_replace_roundtrip() {
    let ctx = helpers::create_test_context().await;
    let token = helpers::setup_admin(&ctx.server).await;
    let auth = format!("Bearer {token}");

    let views = json!({"views": {
        "books": [
            {"view_name": "grid", "view_type": "grid", "display_name": "Grid",
             "is_default": false, "binding": {"columns": ["title"]}},
            {"view_name": "cards", "view_type": "cards", "display_name": "Cards",
             "is_default": true, "binding": {"image_field": "cover"}}
        ]
    }});
    let response = ctx
        .server
        .put("/api/v1/admin/biz-config/library/views")
        .add_header("Authorization", auth.clone())
        .json(&views)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let response = ctx
        .server
        .get("/api/v1/admin/biz-config/library/views")
        .add_header("Authorization", auth.clone())
        .await;
    let body = response.json::<Value>();
    assert_eq!(body["books"].as_array().unwrap().len(), 2);

    // Two defaults in one table fail validation; nothing changes.
    let response = ctx
        .server
        .put("/api/v1/admin/biz-config/library/views")
        .add_header("Authorization", auth.clone())
        .json(&json!({"views": {"books": [
            {"view_name": "a", "view_type": "grid", "display_name": "A", "is_default": true},
            {"view_name": "b", "view_type": "grid", "display_name": "B", "is_default": true}
        ]}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = ctx
        .server
        .get("/api/v1/admin/biz-config/library/views")
        .add_header("Authorization", auth)
        .await;
    assert_eq!(response.json::<Value>()["books"].as_array().unwrap().len(), 2);
}
