// Plugin lifecycle through the admin API: catalog, install, instances.

use crate::helpers;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;

fn make_artifact(script_body: &str) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        let executable = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
        writer.start_file("bin/backend", executable).unwrap();
        writer.write_all(script_body.as_bytes()).unwrap();
        writer.finish().unwrap();
    }
    buf.into_inner()
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Write an artifact and a manifest declaring it into `dir`; return the
/// manifest's file:// URL.
fn write_repository(dir: &Path, artifact: &[u8], checksum: Option<String>) -> String {
    let artifact_path = dir.join("demo.zip");
    std::fs::write(&artifact_path, artifact).unwrap();

    let manifest = json!({
        "plugins": [{
            "id": "demo.sqlite",
            "name": "Demo SQLite backend",
            "author": "tests",
            "supported_biz_names": ["library"],
            "versions": [{
                "version": "1.0.0",
                "changelog": "initial",
                "source": {
                    "url": format!("file://{}", artifact_path.display()),
                    "checksum": checksum,
                },
                "exec": {
                    "entrypoint": "bin/backend",
                    "args": ["--port", "{port}", "--biz", "{biz}"]
                }
            }]
        }]
    });
    let manifest_path = dir.join("manifest.json");
    std::fs::write(&manifest_path, manifest.to_string()).unwrap();
    format!("file://{}", manifest_path.display())
}

/// Serve the plugin RPC contract on `port` so the supervisor handshake
/// and data plane succeed against the spawned (inert) child.
async fn serve_plugin_rpc(port: u16) {
    let app = Router::new()
        .route(
            "/rpc/v1/plugin_info",
            get(|| async {
                Json(json!({
                    "type": "sqlite",
                    "version": "1.0.0",
                    "supported_biz_names": ["library"]
                }))
            }),
        )
        .route(
            "/rpc/v1/query",
            post(|Json(req): Json<Value>| async move {
                Json(json!({"result": {"rows": [], "for": req["biz_name"]}, "source": "sqlite"}))
            }),
        )
        .route(
            "/rpc/v1/health",
            get(|| async { Json(json!({"status": "ok"})) }),
        );
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
}

#[tokio::test]
async fn test_checksum_mismatch_leaves_no_state() {
    let artifact = make_artifact("#!/bin/sh\nsleep 30\n");
    let bad_checksum = Some(format!("sha256:{}", "0".repeat(64)));

    let dir = tempfile::tempdir().unwrap();
    let url = write_repository(dir.path(), &artifact, bad_checksum);
    let ctx = helpers::create_test_context_with(|config| {
        config.plugin_management.repositories = vec![dsgate_gateway::config::RepositoryConfig {
            name: "local".to_string(),
            url,
            enabled: true,
        }];
    })
    .await;
    let token = helpers::setup_admin(&ctx.server).await;
    let auth = format!("Bearer {token}");

    ctx.server
        .post("/api/v1/admin/plugins/catalog/refresh")
        .add_header("Authorization", auth.clone())
        .await;

    let response = ctx
        .server
        .post("/api/v1/admin/plugins/install")
        .add_header("Authorization", auth.clone())
        .json(&json!({"plugin_id": "demo.sqlite", "version": "1.0.0"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json::<Value>()["error"]["type"], "integrity");

    // No installed row, no directory.
    let response = ctx
        .server
        .get("/api/v1/admin/plugins/installed")
        .add_header("Authorization", auth)
        .await;
    assert!(response.json::<Value>()["plugins"].as_array().unwrap().is_empty());
    assert!(!ctx
        .state
        .config
        .plugin_management
        .install_directory
        .join("demo.sqlite/1.0.0")
        .exists());
}

#[tokio::test]
async fn test_catalog_listing_after_refresh() {
    let artifact = make_artifact("#!/bin/sh\nsleep 30\n");
    let checksum = Some(format!("sha256:{}", sha256_hex(&artifact)));

    let dir = tempfile::tempdir().unwrap();
    let url = write_repository(dir.path(), &artifact, checksum);
    let ctx = helpers::create_test_context_with(|config| {
        config.plugin_management.repositories = vec![dsgate_gateway::config::RepositoryConfig {
            name: "local".to_string(),
            url,
            enabled: true,
        }];
    })
    .await;
    let token = helpers::setup_admin(&ctx.server).await;
    let auth = format!("Bearer {token}");

    let response = ctx
        .server
        .post("/api/v1/admin/plugins/catalog/refresh")
        .add_header("Authorization", auth.clone())
        .await;
    assert_eq!(response.json::<Value>()["repositories_merged"], 1);

    let response = ctx
        .server
        .get("/api/v1/admin/plugins/catalog")
        .add_header("Authorization", auth)
        .await;
    let body = response.json::<Value>();
    assert_eq!(body["plugins"][0]["id"], "demo.sqlite");
    assert_eq!(body["plugins"][0]["versions"][0]["version"], "1.0.0");
}

#[cfg(unix)]
#[tokio::test]
async fn test_install_route_and_stop_flow() {
    let artifact = make_artifact("#!/bin/sh\nsleep 30\n");
    let checksum = Some(format!("sha256:{}", sha256_hex(&artifact)));

    let dir = tempfile::tempdir().unwrap();
    let url = write_repository(dir.path(), &artifact, checksum);
    let ctx = helpers::create_test_context_with(|config| {
        config.plugin_management.repositories = vec![dsgate_gateway::config::RepositoryConfig {
            name: "local".to_string(),
            url,
            enabled: true,
        }];
        config.plugin_management.instance_port_range = (52400, 52450);
    })
    .await;
    let token = helpers::setup_admin(&ctx.server).await;
    let auth = format!("Bearer {token}");

    // Refresh the catalog and install.
    ctx.server
        .post("/api/v1/admin/plugins/catalog/refresh")
        .add_header("Authorization", auth.clone())
        .await;
    let response = ctx
        .server
        .post("/api/v1/admin/plugins/install")
        .add_header("Authorization", auth.clone())
        .json(&json!({"plugin_id": "demo.sqlite", "version": "1.0.0"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK, "{}", response.text());

    // Create the instance: 201 with a server-minted id and port.
    let response = ctx
        .server
        .post("/api/v1/admin/plugins/instances")
        .add_header("Authorization", auth.clone())
        .json(&json!({
            "display_name": "demo",
            "plugin_id": "demo.sqlite",
            "version": "1.0.0",
            "biz_name": "library"
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let body = response.json::<Value>();
    let instance_id = body["instance_id"].as_str().unwrap().to_string();
    let port = body["instance"]["port"].as_u64().unwrap() as u16;

    // A duplicate biz claim conflicts.
    let response = ctx
        .server
        .post("/api/v1/admin/plugins/instances")
        .add_header("Authorization", auth.clone())
        .json(&json!({
            "display_name": "demo2",
            "plugin_id": "demo.sqlite",
            "version": "1.0.0",
            "biz_name": "library"
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);

    // The handshake target: the RPC surface on the instance's port.
    serve_plugin_rpc(port).await;

    let response = ctx
        .server
        .post(&format!("/api/v1/admin/plugins/instances/{instance_id}/start"))
        .add_header("Authorization", auth.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK, "{}", response.text());
    assert_eq!(response.json::<Value>()["instance"]["status"], "running");

    // The biz is routable and queries flow through.
    let response = ctx
        .server
        .get("/api/v1/meta/biz")
        .add_header("Authorization", auth.clone())
        .await;
    assert_eq!(response.json::<Value>()["data"], json!(["library"]));

    let response = ctx
        .server
        .post("/api/v1/data/query")
        .add_header("Authorization", auth.clone())
        .json(&json!({"biz_name": "library", "query": {"all": true}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["source"], "sqlite");

    // Stop: the routing entry disappears.
    let response = ctx
        .server
        .post(&format!("/api/v1/admin/plugins/instances/{instance_id}/stop"))
        .add_header("Authorization", auth.clone())
        .await;
    assert_eq!(response.json::<Value>()["instance"]["status"], "stopped");

    let response = ctx
        .server
        .get("/api/v1/meta/biz")
        .add_header("Authorization", auth.clone())
        .await;
    assert_eq!(response.json::<Value>()["data"], json!([]));

    // Create-then-delete leaves no instance behind.
    let response = ctx
        .server
        .delete(&format!("/api/v1/admin/plugins/instances/{instance_id}"))
        .add_header("Authorization", auth.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let response = ctx
        .server
        .get("/api/v1/admin/plugins/instances")
        .add_header("Authorization", auth)
        .await;
    assert!(response.json::<Value>()["instances"]
        .as_array()
        .unwrap()
        .is_empty());
}
