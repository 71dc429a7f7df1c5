//! # Gateway Error Types Module
//!
//! This module defines the error types for the DSGate gateway, providing
//! standardized error handling and HTTP response mapping for all gateway
//! operations.
//!
//! ## Overview
//!
//! Every error carries a machine-readable kind echoed in the JSON body and
//! mapped to an HTTP status:
//!
//! | Kind | Status |
//! |---|---|
//! | `validation` | 400 |
//! | `unauthenticated` | 401 |
//! | `unauthorized` | 403 |
//! | `not_found` | 404 |
//! | `conflict` | 409 |
//! | `rate_limited` | 429 |
//! | `integrity` | 500 |
//! | `backend_unavailable` | 502 |
//! | `internal` | 500 |
//!
//! Backend errors forwarded from the data plane keep their original kind;
//! installer and supervisor failures never reach the public data plane and
//! are surfaced only to admin callers.
//!
//! ## Usage
//!
//! ```rust
//! use dsgate_gateway::gateway_error::GatewayError;
//! use axum::Json;
//! use serde_json::{json, Value};
//!
//! async fn handler(found: bool) -> Result<Json<Value>, GatewayError> {
//!     if !found {
//!         return Err(GatewayError::NotFound {
//!             message: "biz not configured".to_string(),
//!         });
//!     }
//!     Ok(Json(json!({"status": "ok"})))
//! }
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dsgate_backend_sdk::error::BackendError;
use serde_json::json;
use thiserror::Error;

/// Error types for the DSGate gateway.
///
/// Each variant maps to one kind of the error table and converts into an
/// HTTP response with a `{"error": {"message", "type", "code"}}` body.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Malformed input, missing field, impossible value
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Missing/invalid token or bad credentials
    #[error("unauthenticated: {message}")]
    Unauthenticated { message: String },

    /// Authenticated but lacking the required role or permission
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// Biz, table, view, plugin, or instance absent
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Biz already claimed, duplicate install, state conflict
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// A rate-limiter gate rejected the request; `gate` names it
    #[error("rate limited by {gate} gate")]
    RateLimited { gate: &'static str },

    /// Checksum mismatch or archive path escape during install
    #[error("integrity error: {message}")]
    Integrity { message: String },

    /// Routing registry miss or a failing backend
    #[error("backend unavailable: {message}")]
    BackendUnavailable { message: String },

    /// Errors forwarded from a backend, kind preserved
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Store failures with context attached
    #[error("store error: {message}")]
    Store { message: String },

    /// JSON serialization and deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unclassified internal errors
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    /// Attach biz context to a store error.
    pub fn store_for_biz(biz: &str, err: sqlx::Error) -> Self {
        GatewayError::Store {
            message: format!("biz {biz}: {err}"),
        }
    }

    /// The machine-readable kind echoed in responses.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation { .. } => "validation",
            GatewayError::Unauthenticated { .. } => "unauthenticated",
            GatewayError::Unauthorized { .. } => "unauthorized",
            GatewayError::NotFound { .. } => "not_found",
            GatewayError::Conflict { .. } => "conflict",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::Integrity { .. } => "integrity",
            GatewayError::BackendUnavailable { .. } => "backend_unavailable",
            GatewayError::Backend(e) => e.kind(),
            GatewayError::Store { .. }
            | GatewayError::Serialization(_)
            | GatewayError::Internal { .. } => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self.kind() {
            "validation" => StatusCode::BAD_REQUEST,
            "unauthenticated" => StatusCode::UNAUTHORIZED,
            "unauthorized" => StatusCode::FORBIDDEN,
            "not_found" => StatusCode::NOT_FOUND,
            "conflict" => StatusCode::CONFLICT,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            "backend_unavailable" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        GatewayError::Store {
            message: err.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.kind(),
                "code": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}
