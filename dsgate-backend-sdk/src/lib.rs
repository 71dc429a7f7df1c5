//! # DSGate Backend SDK
//!
//! The wire contract between the DSGate gateway and its data-source plugin
//! backends, plus the RPC client the gateway uses to drive them.
//!
//! ## Overview
//!
//! A DSGate backend is an out-of-process plugin serving one business group.
//! The gateway spawns it, performs a `GetPluginInfo` handshake, and then
//! routes data-plane traffic to it through the four-operation capability
//! set defined here. This crate contains everything both sides must agree
//! on:
//!
//! - **`models`**: repository manifest types and the RPC payloads
//! - **`backend`**: the [`DataBackend`] trait — the polymorphic handle the
//!   gateway's routing registry stores
//! - **`rpc`**: [`RpcBackend`], the HTTP/JSON client implementation bound
//!   to `127.0.0.1:port`
//! - **`error`**: the [`BackendError`] kind set preserved across the RPC
//!   boundary
//!
//! ## The RPC Contract
//!
//! Five operations: `GetPluginInfo`, `Query`, `Mutate`, `GetSchema`,
//! `HealthCheck`. `GetPluginInfo.supported_biz_names` is authoritative for
//! handshake validation; query and mutate payloads are opaque structured
//! values the gateway forwards verbatim.
//!
//! ## Quick Start
//!
//! ```rust
//! use dsgate_backend_sdk::{RpcBackend, QueryRequest};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), dsgate_backend_sdk::BackendError> {
//! let backend = RpcBackend::connect(50051, Duration::from_secs(5))?;
//! let info = backend.get_plugin_info().await?;
//! assert!(info.supported_biz_names.contains(&"library".to_string()));
//! # Ok(())
//! # }
//! ```
//!
//! ## Implementing a Backend In-Process
//!
//! Test stubs and embedded engines implement [`DataBackend`] directly; the
//! gateway treats them identically to RPC-connected plugins. See the trait
//! documentation for a complete example.

pub mod backend;
pub mod error;
pub mod models;
pub mod rpc;

pub use backend::DataBackend;
pub use error::BackendError;
pub use models::{
    ArtifactSource, ExecInfo, FieldSchema, HealthStatus, MutateOperation, MutateRequest,
    MutateResponse, PluginDescriptor, PluginInfo, PluginVersion, QueryRequest, QueryResponse,
    RepositoryManifest, SchemaRequest, SchemaResponse, TableSchema,
};
pub use rpc::RpcBackend;

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, BackendError>;
