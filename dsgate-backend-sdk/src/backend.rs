//! # Backend Trait Module
//!
//! This module defines `DataBackend`, the polymorphic handle the gateway's
//! routing registry stores per business group.
//!
//! ## Overview
//!
//! A backend is anything that can answer the four data-plane operations:
//!
//! - **Query**: evaluate an opaque query object for one biz
//! - **Mutate**: apply a create/update/delete operation
//! - **GetSchema**: describe the tables and fields the backend exposes
//! - **HealthCheck**: report liveness
//!
//! The standard implementation is [`RpcBackend`](crate::rpc::RpcBackend),
//! which forwards each operation to an out-of-process plugin over HTTP on
//! localhost. In-process implementations (test stubs, embedded engines)
//! satisfy the same trait and are interchangeable behind the registry.
//!
//! ## Example
//!
//! ```rust
//! use dsgate_backend_sdk::backend::DataBackend;
//! use dsgate_backend_sdk::error::BackendError;
//! use dsgate_backend_sdk::models::*;
//! use async_trait::async_trait;
//! use serde_json::json;
//!
//! struct StaticBackend;
//!
//! #[async_trait]
//! impl DataBackend for StaticBackend {
//!     fn backend_type(&self) -> &str {
//!         "static"
//!     }
//!
//!     async fn query(&self, request: QueryRequest) -> Result<QueryResponse, BackendError> {
//!         Ok(QueryResponse { result: json!([]), source: "static".to_string() })
//!     }
//!
//!     async fn mutate(&self, _request: MutateRequest) -> Result<MutateResponse, BackendError> {
//!         Err(BackendError::Unauthorized { message: "read-only".to_string() })
//!     }
//!
//!     async fn get_schema(&self, _request: SchemaRequest) -> Result<SchemaResponse, BackendError> {
//!         Ok(SchemaResponse::default())
//!     }
//!
//!     async fn health_check(&self) -> Result<HealthStatus, BackendError> {
//!         Ok(HealthStatus::ok())
//!     }
//! }
//! ```

use crate::error::BackendError;
use crate::models::{
    HealthStatus, MutateRequest, MutateResponse, QueryRequest, QueryResponse, SchemaRequest,
    SchemaResponse,
};

/// The capability set every routable backend implements.
///
/// Handles are stored as `Arc<dyn DataBackend>` in the routing registry
/// and shared across request tasks; implementations must be `Send + Sync`.
#[async_trait::async_trait]
pub trait DataBackend: Send + Sync {
    /// Backend type tag, used for logging only.
    fn backend_type(&self) -> &str;

    /// Evaluate an opaque query for the request's biz.
    ///
    /// The gateway neither parses nor rewrites `request.query`; errors
    /// carry one of the standard kinds.
    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, BackendError>;

    /// Apply a create/update/delete operation.
    async fn mutate(&self, request: MutateRequest) -> Result<MutateResponse, BackendError>;

    /// Describe the tables this backend exposes for the biz, optionally
    /// narrowed to a single table.
    async fn get_schema(&self, request: SchemaRequest) -> Result<SchemaResponse, BackendError>;

    /// Probe backend liveness.
    async fn health_check(&self) -> Result<HealthStatus, BackendError>;
}
