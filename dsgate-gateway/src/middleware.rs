//! # HTTP Middleware Module
//!
//! Middleware for the DSGate gateway: request logging, metrics capture,
//! authentication, the admin-role check, and the two rate-limiter chains.
//!
//! ## Stack Order
//!
//! Data-plane routes run, outermost first:
//!
//! 1. **Logging**: request/response logging with latency
//! 2. **Metrics**: per-request sample capture
//! 3. **Authentication**: bearer-token validation, claims into extensions
//! 4. **Rate limiting**: the full business chain (global, per-IP,
//!    per-user, per-biz)
//! 5. **Timeout**: request deadline
//!
//! System and auth routes swap step 3 out and use the lightweight chain
//! (global, per-IP) for step 4; admin routes add the admin-role check
//! after authentication.
//!
//! ## Biz Extraction
//!
//! The per-biz gate needs the request's biz before the handler runs. It
//! reads the `biz` query parameter first and otherwise buffers a JSON
//! body and reads its `biz_name` field, rebuilding the request body for
//! the handler. Requests with no biz context skip the gate.

use crate::auth::{AuthContext, AuthService};
use crate::gateway_error::GatewayError;
use crate::rate_limit::client_ip;
use crate::server::AppState;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::time::Instant;

/// Request/response logging with latency and request id.
pub async fn logging_middleware(
    State(_state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let request_id = uuid::Uuid::new_v4().to_string();

    let response = next.run(req).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %status,
        latency_ms = latency.as_millis(),
        "Request processed"
    );

    response
}

/// Per-request metrics capture. Health and metrics endpoints are skipped
/// so scraping does not pollute the window.
pub async fn metrics_middleware(
    State(_state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let should_record = !path.ends_with("/health") && !path.ends_with("/admin/metrics");
    if should_record {
        crate::metrics::record_request(crate::metrics::RequestSample::new(
            method.to_string(),
            path,
            response.status().as_u16(),
            start.elapsed(),
        ))
        .await;
    }

    response
}

/// Require a valid bearer token; inject the claims into the request
/// extensions as [`AuthContext`].
pub async fn require_user(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    let Some(token) = AuthService::extract_bearer(auth_header) else {
        return GatewayError::Unauthenticated {
            message: "missing bearer token".to_string(),
        }
        .into_response();
    };

    match state.auth.verify_token(token) {
        Ok(claims) => {
            req.extensions_mut().insert(AuthContext::from(claims));
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

/// Require the `admin` role. Must run after [`require_user`].
pub async fn require_admin(
    State(_state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match req.extensions().get::<AuthContext>() {
        Some(ctx) if ctx.role == "admin" => next.run(req).await,
        Some(_) => GatewayError::Unauthorized {
            message: "admin role required".to_string(),
        }
        .into_response(),
        None => GatewayError::Unauthenticated {
            message: "missing authentication".to_string(),
        }
        .into_response(),
    }
}

/// The lightweight chain: global and per-IP gates.
pub async fn lightweight_rate_limit(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = request_ip(&req);
    if let Err(e) = state.rate_limiter.check_lightweight(&ip) {
        return e.into_response();
    }
    next.run(req).await
}

/// The full business chain: global, per-IP, per-user, per-biz.
pub async fn full_rate_limit(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = request_ip(&req);
    let user_id = req
        .extensions()
        .get::<AuthContext>()
        .map(|ctx| ctx.user_id.clone());

    let (req, biz) = match extract_biz(req, state.config.server.max_body_size).await {
        Ok(pair) => pair,
        Err(e) => return e.into_response(),
    };

    if let Err(e) = state
        .rate_limiter
        .check_full(&ip, user_id.as_deref(), biz.as_deref())
        .await
    {
        return e.into_response();
    }
    next.run(req).await
}

fn request_ip(req: &Request<Body>) -> String {
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    client_ip(req.headers(), remote)
}

/// Pull the request's biz from the `biz` query parameter or a JSON body's
/// `biz_name` field, rebuilding the body for the handler.
async fn extract_biz(
    req: Request<Body>,
    max_body_size: usize,
) -> Result<(Request<Body>, Option<String>), GatewayError> {
    let query_biz = req.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            pair.strip_prefix("biz=")
                .filter(|value| !value.is_empty())
                .map(|value| value.to_string())
        })
    });
    if let Some(value) = query_biz {
        return Ok((req, Some(value)));
    }

    let is_json = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return Ok((req, None));
    }

    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, max_body_size)
        .await
        .map_err(|e| GatewayError::Validation {
            message: format!("failed to read request body: {e}"),
        })?;

    let biz = serde_json::from_slice::<serde_json::Value>(&bytes)
        .ok()
        .and_then(|v| v.get("biz_name").cloned())
        .and_then(|b| b.as_str().map(|s| s.to_string()));

    let req = Request::from_parts(parts, Body::from(bytes));
    Ok((req, biz))
}
