//! # Error Handling Module
//!
//! This module defines the error types shared between the gateway's data
//! plane and the RPC client used to talk to plugin backends.
//!
//! ## Overview
//!
//! Every failure a backend can surface is classified into one of a small
//! set of kinds. The gateway maps kinds to HTTP status codes at its own
//! boundary; the SDK never renders HTTP responses itself.
//!
//! ## Error Kinds
//!
//! - **Validation**: malformed input, missing field, impossible value
//! - **Unauthenticated / Unauthorized**: auth failures forwarded by a backend
//! - **NotFound**: biz, table, or row absent
//! - **Conflict**: duplicate or state conflict
//! - **RateLimited**: a backend-side limiter rejected
//! - **Integrity**: data failed a checksum or consistency check
//! - **Unavailable**: the backend is unreachable or unhealthy
//! - **Internal**: everything unclassified
//!
//! Transport-level failures (`Http`, `Timeout`, `Serialization`) are kept
//! distinct so callers can decide whether a retry makes sense.
//!
//! ## Usage
//!
//! ```rust
//! use dsgate_backend_sdk::error::BackendError;
//!
//! fn classify(err: &BackendError) -> &'static str {
//!     match err {
//!         BackendError::Unavailable { .. } | BackendError::Timeout => "retryable",
//!         _ => "terminal",
//!     }
//! }
//! ```

use thiserror::Error;

/// Errors produced by backend operations and the RPC transport.
///
/// The variants mirror the gateway's error-kind table so a backend failure
/// can cross the RPC boundary without losing its classification.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Malformed input, missing field, impossible value
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Missing or invalid credentials forwarded by the backend
    #[error("unauthenticated: {message}")]
    Unauthenticated { message: String },

    /// Authenticated but lacking permission for the operation
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// Biz, table, view, or row absent
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Duplicate entity or conflicting state
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// The backend's own limiter rejected the request
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    /// Checksum mismatch or failed consistency check
    #[error("integrity error: {message}")]
    Integrity { message: String },

    /// Backend unreachable, not running, or failing its health check
    #[error("backend unavailable: {message}")]
    Unavailable { message: String },

    /// HTTP transport errors from the RPC client
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The RPC call exceeded its deadline
    #[error("rpc timeout")]
    Timeout,

    /// JSON serialization and deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend answered with a non-success status the client could not classify
    #[error("backend api error: {code} - {message}")]
    Api { code: u16, message: String },

    /// Unclassified backend failure
    #[error("internal backend error: {message}")]
    Internal { message: String },
}

impl BackendError {
    /// Stable machine-readable kind string for this error.
    ///
    /// The gateway echoes this in its JSON error bodies and uses it for the
    /// HTTP status mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Validation { .. } => "validation",
            BackendError::Unauthenticated { .. } => "unauthenticated",
            BackendError::Unauthorized { .. } => "unauthorized",
            BackendError::NotFound { .. } => "not_found",
            BackendError::Conflict { .. } => "conflict",
            BackendError::RateLimited { .. } => "rate_limited",
            BackendError::Integrity { .. } => "integrity",
            BackendError::Unavailable { .. }
            | BackendError::Http(_)
            | BackendError::Timeout
            | BackendError::Api { .. } => "backend_unavailable",
            BackendError::Serialization(_) | BackendError::Internal { .. } => "internal",
        }
    }

    /// Whether a retry of the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Unavailable { .. } | BackendError::Http(_) | BackendError::Timeout
        )
    }
}

/// Map a non-success RPC response to a `BackendError`.
///
/// Backends report failures as `{"error": {"message", "type"}}`; when the
/// `type` matches a known kind the classification is preserved, otherwise
/// the status code decides.
pub async fn map_error_response(resp: reqwest::Response) -> BackendError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();

    let parsed = serde_json::from_str::<serde_json::Value>(&body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| {
            if body.is_empty() {
                format!("backend returned status {status}")
            } else {
                body.clone()
            }
        });
    let kind = parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|e| e.get("type"))
        .and_then(|t| t.as_str())
        .map(|s| s.to_string());

    match kind.as_deref() {
        Some("validation") => BackendError::Validation { message },
        Some("unauthenticated") => BackendError::Unauthenticated { message },
        Some("unauthorized") => BackendError::Unauthorized { message },
        Some("not_found") => BackendError::NotFound { message },
        Some("conflict") => BackendError::Conflict { message },
        Some("rate_limited") => BackendError::RateLimited { message },
        Some("integrity") => BackendError::Integrity { message },
        _ => match status {
            400 => BackendError::Validation { message },
            401 => BackendError::Unauthenticated { message },
            403 => BackendError::Unauthorized { message },
            404 => BackendError::NotFound { message },
            409 => BackendError::Conflict { message },
            429 => BackendError::RateLimited { message },
            502 | 503 => BackendError::Unavailable { message },
            code => BackendError::Api { code, message },
        },
    }
}
