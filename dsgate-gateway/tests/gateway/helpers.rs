// Shared helpers for the integration tests.

use axum_test::TestServer;
use dsgate_backend_sdk::error::BackendError;
use dsgate_backend_sdk::models::*;
use dsgate_backend_sdk::DataBackend;
use dsgate_gateway::config::Config;
use dsgate_gateway::server::{create_server_with_store, AppState};
use dsgate_gateway::store::SystemStore;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct TestContext {
    pub server: TestServer,
    pub state: AppState,
    // Keeps the temp instance directory alive for the test's duration.
    pub _dir: tempfile::TempDir,
}

/// Build a gateway over an in-memory store and a temp instance directory.
pub async fn create_test_context() -> TestContext {
    create_test_context_with(|_| {}).await
}

/// Same as [`create_test_context`], with a config hook.
pub async fn create_test_context_with(customize: impl FnOnce(&mut Config)) -> TestContext {
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.database.path = dir.path().join("system.db");
    config.plugin_management.install_directory = dir.path().join("plugins");
    customize(&mut config);

    let store = SystemStore::connect_in_memory().await.unwrap();
    let (app, state) = create_server_with_store(config, store).await.unwrap();

    TestContext {
        server: TestServer::new(app).unwrap(),
        state,
        _dir: dir,
    }
}

/// Run first-run setup and return an admin bearer token.
pub async fn setup_admin(server: &TestServer) -> String {
    let token = server.get("/api/v1/system/setup").await.json::<Value>()["token"]
        .as_str()
        .unwrap()
        .to_string();

    let response = server
        .post("/api/v1/system/setup")
        .json(&json!({"token": token, "user": "root", "pass": "p@ssw0rd"}))
        .await;
    assert_eq!(response.status_code(), 200, "{}", response.text());
    response.json::<Value>()["token"].as_str().unwrap().to_string()
}

/// An in-process backend that echoes queries, used to exercise the data
/// plane without child processes.
pub struct EchoBackend {
    pub source: &'static str,
}

#[async_trait::async_trait]
impl DataBackend for EchoBackend {
    fn backend_type(&self) -> &str {
        "echo"
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, BackendError> {
        Ok(QueryResponse {
            result: json!({"biz": request.biz_name, "echo": request.query}),
            source: self.source.to_string(),
        })
    }

    async fn mutate(&self, request: MutateRequest) -> Result<MutateResponse, BackendError> {
        Ok(MutateResponse {
            result: json!({"applied": request.operation.tag()}),
            source: self.source.to_string(),
        })
    }

    async fn get_schema(&self, _request: SchemaRequest) -> Result<SchemaResponse, BackendError> {
        let mut tables = std::collections::HashMap::new();
        tables.insert(
            "books".to_string(),
            TableSchema {
                fields: vec![FieldSchema {
                    name: "title".to_string(),
                    data_type: "string".to_string(),
                    is_searchable: true,
                    is_returnable: true,
                    is_primary: false,
                    description: String::new(),
                }],
            },
        );
        Ok(SchemaResponse { tables })
    }

    async fn health_check(&self) -> Result<HealthStatus, BackendError> {
        Ok(HealthStatus::ok())
    }
}

/// Publish an in-process echo backend for a biz, as the supervisor would
/// after a successful handshake.
pub fn publish_echo_backend(state: &AppState, biz: &str) {
    state
        .registry
        .publish(biz, Arc::new(EchoBackend { source: "echo" }));
}
