//! # RPC Client Module
//!
//! This module implements the HTTP/JSON RPC client the gateway uses to talk
//! to a plugin backend child process listening on `127.0.0.1:port`.
//!
//! ## Overview
//!
//! Each running plugin instance serves five endpoints under `/rpc/v1`:
//!
//! | Endpoint | Operation |
//! |---|---|
//! | `GET  /rpc/v1/plugin_info` | Handshake identity |
//! | `POST /rpc/v1/query` | Query |
//! | `POST /rpc/v1/mutate` | Mutate |
//! | `POST /rpc/v1/schema` | GetSchema |
//! | `GET  /rpc/v1/health` | HealthCheck |
//!
//! `RpcBackend` wraps a `reqwest::Client` with a per-call timeout and
//! implements [`DataBackend`], so a connected instance can be published
//! into the routing registry directly.
//!
//! ## Timeouts
//!
//! The per-call timeout is fixed at construction (the supervisor uses two
//! seconds for the handshake `GetPluginInfo` and the configured request
//! deadline for data-plane calls). A timeout surfaces as
//! `BackendError::Timeout` so callers can distinguish it from a refused
//! connection.
//!
//! ## Usage
//!
//! ```rust
//! use dsgate_backend_sdk::rpc::RpcBackend;
//! use std::time::Duration;
//!
//! let backend = RpcBackend::connect(50051, Duration::from_secs(2)).unwrap();
//! // supervisor handshake:
//! // let info = backend.get_plugin_info().await?;
//! ```

use crate::backend::DataBackend;
use crate::error::{map_error_response, BackendError};
use crate::models::{
    HealthStatus, MutateRequest, MutateResponse, PluginInfo, QueryRequest, QueryResponse,
    SchemaRequest, SchemaResponse,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// HTTP/JSON client for one plugin backend on localhost.
///
/// Cloning is cheap; the underlying `reqwest::Client` is a handle over a
/// shared connection pool.
#[derive(Debug, Clone)]
pub struct RpcBackend {
    http: reqwest::Client,
    base_url: String,
    port: u16,
}

impl RpcBackend {
    /// Build a client for a backend on `127.0.0.1:port`.
    ///
    /// The timeout applies to every call made through this client,
    /// including connection establishment.
    pub fn connect(port: u16, timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Internal {
                message: format!("failed to build RPC client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: format!("http://127.0.0.1:{port}"),
            port,
        })
    }

    /// The localhost port this client dials.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Handshake call: fetch the backend's identity.
    ///
    /// The supervisor validates `supported_biz_names` from the result
    /// before promoting the instance to `running`.
    pub async fn get_plugin_info(&self) -> Result<PluginInfo, BackendError> {
        self.get_json("/rpc/v1/plugin_info").await
    }

    async fn post_json<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TResp, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "Backend RPC call");
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        resp.json::<TResp>()
            .await
            .map_err(classify_transport_error)
    }

    async fn get_json<TResp: DeserializeOwned>(&self, path: &str) -> Result<TResp, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(classify_transport_error)?;

        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        resp.json::<TResp>()
            .await
            .map_err(classify_transport_error)
    }
}

/// Fold reqwest failures into the SDK error kinds.
///
/// Timeouts get their own variant; connection failures become
/// `Unavailable` because the child may simply not be listening yet.
fn classify_transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else if err.is_connect() {
        BackendError::Unavailable {
            message: format!("connection failed: {err}"),
        }
    } else {
        BackendError::Http(err)
    }
}

#[async_trait::async_trait]
impl DataBackend for RpcBackend {
    fn backend_type(&self) -> &str {
        "rpc"
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, BackendError> {
        self.post_json("/rpc/v1/query", &request).await
    }

    async fn mutate(&self, request: MutateRequest) -> Result<MutateResponse, BackendError> {
        self.post_json("/rpc/v1/mutate", &request).await
    }

    async fn get_schema(&self, request: SchemaRequest) -> Result<SchemaResponse, BackendError> {
        self.post_json("/rpc/v1/schema", &request).await
    }

    async fn health_check(&self) -> Result<HealthStatus, BackendError> {
        self.get_json("/rpc/v1/health").await
    }
}
