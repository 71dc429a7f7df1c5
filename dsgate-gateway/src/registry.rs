//! # Routing Registry Module
//!
//! This module provides the concurrent map from business-group name to an
//! active backend handle.
//!
//! ## Invariants
//!
//! - A routing entry exists iff the owning instance is in state `running`.
//! - At most one entry per biz name at any instant.
//! - The registry is mutated exclusively by the instance supervisor on
//!   state transitions; handlers only read.
//!
//! Writes for a given biz are total-ordered by the underlying map:
//! readers observe the old handle, no handle, or the new handle, never a
//! stale handle after a completed stop.

use dashmap::DashMap;
use dsgate_backend_sdk::DataBackend;
use std::sync::Arc;

/// Concurrent mapping `biz_name -> backend handle`.
#[derive(Default)]
pub struct BackendRegistry {
    entries: DashMap<String, Arc<dyn DataBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// The backend serving one biz, if any.
    pub fn lookup(&self, biz: &str) -> Option<Arc<dyn DataBackend>> {
        self.entries.get(biz).map(|entry| entry.value().clone())
    }

    /// Publish a handle for one biz, replacing any previous handle.
    pub fn publish(&self, biz: &str, backend: Arc<dyn DataBackend>) {
        tracing::info!(biz, backend_type = backend.backend_type(), "Routing entry published");
        self.entries.insert(biz.to_string(), backend);
    }

    /// Remove the handle for one biz. Idempotent.
    pub fn remove(&self, biz: &str) {
        if self.entries.remove(biz).is_some() {
            tracing::info!(biz, "Routing entry removed");
        }
    }

    /// Snapshot of every routable biz name, sorted.
    pub fn biz_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of live routing entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no biz is currently routable.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsgate_backend_sdk::error::BackendError;
    use dsgate_backend_sdk::models::*;
    use serde_json::json;

    struct StubBackend(&'static str);

    #[async_trait::async_trait]
    impl DataBackend for StubBackend {
        fn backend_type(&self) -> &str {
            self.0
        }

        async fn query(&self, _request: QueryRequest) -> Result<QueryResponse, BackendError> {
            Ok(QueryResponse {
                result: json!([]),
                source: self.0.to_string(),
            })
        }

        async fn mutate(&self, _request: MutateRequest) -> Result<MutateResponse, BackendError> {
            Ok(MutateResponse {
                result: json!({}),
                source: self.0.to_string(),
            })
        }

        async fn get_schema(
            &self,
            _request: SchemaRequest,
        ) -> Result<SchemaResponse, BackendError> {
            Ok(SchemaResponse::default())
        }

        async fn health_check(&self) -> Result<HealthStatus, BackendError> {
            Ok(HealthStatus::ok())
        }
    }

    #[tokio::test]
    async fn test_publish_lookup_remove() {
        let registry = BackendRegistry::new();
        assert!(registry.lookup("library").is_none());
        assert!(registry.is_empty());

        registry.publish("library", Arc::new(StubBackend("stub")));
        let handle = registry.lookup("library").unwrap();
        assert_eq!(handle.backend_type(), "stub");
        assert_eq!(registry.biz_names(), vec!["library".to_string()]);

        registry.remove("library");
        assert!(registry.lookup("library").is_none());
        // Removing again is a no-op.
        registry.remove("library");
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_publish_replaces_previous_handle() {
        let registry = BackendRegistry::new();
        registry.publish("library", Arc::new(StubBackend("old")));
        registry.publish("library", Arc::new(StubBackend("new")));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("library").unwrap().backend_type(), "new");
    }

    #[tokio::test]
    async fn test_biz_names_sorted_snapshot() {
        let registry = BackendRegistry::new();
        registry.publish("zoo", Arc::new(StubBackend("a")));
        registry.publish("archive", Arc::new(StubBackend("b")));
        assert_eq!(
            registry.biz_names(),
            vec!["archive".to_string(), "zoo".to_string()]
        );
    }
}
