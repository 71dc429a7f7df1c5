//! # HTTP Request Handlers Module
//!
//! All HTTP handlers of the DSGate API, mounted under `/api/v1`.
//!
//! ## Surface
//!
//! | Method & Path | Purpose | Auth |
//! |---|---|---|
//! | `GET  /system/status` | Setup state probe | none |
//! | `GET/POST /system/setup` | First-run admin creation | none |
//! | `POST /auth/login` | Credential login | none |
//! | `GET  /health` | Liveness probe | none |
//! | `GET  /meta/biz` | Routable biz list | user |
//! | `GET  /meta/schema/{biz}` | Backend schema | user |
//! | `GET  /meta/presentations` | Default view config | user |
//! | `POST /data/query` | Backend query | user |
//! | `POST /data/mutate` | Backend mutation | user |
//! | `/admin/biz-config/...` | Biz configuration CRUD | admin |
//! | `/admin/plugins/...` | Catalog, install, instances | admin |
//! | `/admin/security/rate-limiting/...` | Limit settings | admin |
//! | `GET  /admin/metrics` | Process metrics | admin |
//!
//! Handlers stay thin: they decode the request, delegate to the owning
//! subsystem (config service, supervisor, catalog, installer, registry),
//! and map the opaque result into the response body. Backend errors pass
//! through with their kind preserved.

use crate::config_service::{FieldSetting, ViewsByTable};
use crate::gateway_error::GatewayError;
use crate::plugins::supervisor::InstanceSnapshot;
use crate::server::AppState;
use crate::store::IpLimitSettings;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use dsgate_backend_sdk::models::{
    MutateOperation, MutateRequest, QueryRequest, SchemaRequest,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// System & health
// ---------------------------------------------------------------------------

/// `GET /system/status`: whether first-run setup is still open.
pub async fn system_status(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    let users = state.store.count_users().await?;
    let status = if users == 0 {
        "needs_setup"
    } else {
        "ready_for_login"
    };
    Ok(Json(json!({ "status": status })))
}

/// `GET /system/setup`: hand out the setup token while no admin exists.
pub async fn setup_token(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    if state.store.count_users().await? > 0 {
        return Err(GatewayError::Unauthorized {
            message: "setup is closed".to_string(),
        });
    }
    Ok(Json(json!({ "token": state.auth.setup_token() })))
}

#[derive(Debug, Deserialize)]
pub struct SetupRequest {
    pub token: String,
    pub user: String,
    pub pass: String,
}

/// `POST /system/setup`: create the first admin.
pub async fn setup_admin(
    State(state): State<AppState>,
    Json(req): Json<SetupRequest>,
) -> Result<Json<Value>, GatewayError> {
    if state.store.count_users().await? > 0 {
        return Err(GatewayError::Unauthorized {
            message: "setup is closed".to_string(),
        });
    }
    if req.user.is_empty() || req.pass.is_empty() {
        return Err(GatewayError::Validation {
            message: "user and pass are required".to_string(),
        });
    }

    state.auth.consume_setup_token(&req.token)?;
    let (token, user) = state.auth.create_admin(&req.user, &req.pass).await?;

    tracing::info!(username = %user.username, "First admin created");
    Ok(Json(json!({
        "token": token,
        "user": { "id": user.id, "username": user.username, "role": user.role }
    })))
}

/// `GET /health`: liveness probe.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user: String,
    pub pass: String,
}

/// `POST /auth/login`.
pub async fn login(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Value>, GatewayError> {
    let ip = crate::rate_limit::client_ip(&headers, None);
    let (token, user) = state.auth.login(&ip, &req.user, &req.pass).await?;

    Ok(Json(json!({
        "token": token,
        "user": { "id": user.id, "username": user.username, "role": user.role }
    })))
}

// ---------------------------------------------------------------------------
// Meta
// ---------------------------------------------------------------------------

/// `GET /meta/biz`: every currently routable biz.
pub async fn list_biz(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "data": state.registry.biz_names() }))
}

/// `GET /meta/schema/{biz_name}`: the backend's schema for one biz.
pub async fn get_schema(
    State(state): State<AppState>,
    Path(biz_name): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let backend =
        state
            .registry
            .lookup(&biz_name)
            .ok_or_else(|| GatewayError::BackendUnavailable {
                message: format!("no running backend for biz {biz_name}"),
            })?;

    let schema = backend
        .get_schema(SchemaRequest {
            biz_name: biz_name.clone(),
            table_name: None,
        })
        .await?;
    Ok(Json(serde_json::to_value(schema)?))
}

#[derive(Debug, Deserialize)]
pub struct PresentationQuery {
    pub biz: String,
    pub table: String,
}

/// `GET /meta/presentations?biz=&table=`: the table's default view.
pub async fn get_presentation(
    State(state): State<AppState>,
    Query(query): Query<PresentationQuery>,
) -> Result<Json<Value>, GatewayError> {
    let view = state
        .config_service
        .get_default_view_config(&query.biz, &query.table)
        .await?
        .ok_or_else(|| GatewayError::NotFound {
            message: format!("no default view for {}/{}", query.biz, query.table),
        })?;
    Ok(Json(serde_json::to_value(view)?))
}

// ---------------------------------------------------------------------------
// Data plane
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DataQueryRequest {
    pub biz_name: String,
    pub query: Value,
}

/// `POST /data/query`: forward an opaque query to the biz's backend.
pub async fn data_query(
    State(state): State<AppState>,
    Json(req): Json<DataQueryRequest>,
) -> Result<Json<Value>, GatewayError> {
    if req.biz_name.is_empty() {
        return Err(GatewayError::Validation {
            message: "biz_name is required".to_string(),
        });
    }

    let backend =
        state
            .registry
            .lookup(&req.biz_name)
            .ok_or_else(|| GatewayError::BackendUnavailable {
                message: format!("no running backend for biz {}", req.biz_name),
            })?;

    let response = backend
        .query(QueryRequest {
            biz_name: req.biz_name,
            query: req.query,
        })
        .await?;
    Ok(Json(json!({ "result": response.result, "source": response.source })))
}

#[derive(Debug, Deserialize)]
pub struct DataMutateRequest {
    pub biz_name: String,
    pub operation: String,
    #[serde(default)]
    pub payload: Value,
}

/// `POST /data/mutate`: forward a create/update/delete to the backend.
pub async fn data_mutate(
    State(state): State<AppState>,
    Json(req): Json<DataMutateRequest>,
) -> Result<Json<Value>, GatewayError> {
    if req.biz_name.is_empty() {
        return Err(GatewayError::Validation {
            message: "biz_name is required".to_string(),
        });
    }
    let operation = MutateOperation::from_parts(&req.operation, req.payload).ok_or_else(|| {
        GatewayError::Validation {
            message: format!("unknown mutate operation: {}", req.operation),
        }
    })?;

    let backend =
        state
            .registry
            .lookup(&req.biz_name)
            .ok_or_else(|| GatewayError::BackendUnavailable {
                message: format!("no running backend for biz {}", req.biz_name),
            })?;

    let response = backend
        .mutate(MutateRequest {
            biz_name: req.biz_name,
            operation,
        })
        .await?;
    Ok(Json(json!({ "result": response.result, "source": response.source })))
}

// ---------------------------------------------------------------------------
// Admin: biz configuration
// ---------------------------------------------------------------------------

/// `GET /admin/biz-config/{biz}`.
pub async fn get_biz_config(
    State(state): State<AppState>,
    Path(biz): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let config = state
        .config_service
        .get_biz_query_config(&biz)
        .await?
        .ok_or_else(|| GatewayError::NotFound {
            message: format!("biz {biz} is not configured"),
        })?;
    Ok(Json(serde_json::to_value(config)?))
}

#[derive(Debug, Deserialize)]
pub struct OverallSettingsRequest {
    pub is_publicly_searchable: bool,
    #[serde(default)]
    pub default_query_table: Option<String>,
}

/// `PUT /admin/biz-config/{biz}/settings`.
pub async fn put_biz_settings(
    State(state): State<AppState>,
    Path(biz): Path<String>,
    Json(req): Json<OverallSettingsRequest>,
) -> Result<Json<Value>, GatewayError> {
    state
        .config_service
        .update_biz_overall_settings(&biz, req.is_publicly_searchable, req.default_query_table.as_deref())
        .await?;
    Ok(Json(json!({ "status": "updated" })))
}

#[derive(Debug, Deserialize)]
pub struct SearchableTablesRequest {
    pub tables: Vec<SearchableTableEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SearchableTableEntry {
    pub table_name: String,
    pub is_searchable: bool,
}

/// `PUT /admin/biz-config/{biz}/tables`.
pub async fn put_biz_tables(
    State(state): State<AppState>,
    Path(biz): Path<String>,
    Json(req): Json<SearchableTablesRequest>,
) -> Result<Json<Value>, GatewayError> {
    let tables: Vec<(String, bool)> = req
        .tables
        .into_iter()
        .map(|t| (t.table_name, t.is_searchable))
        .collect();
    state
        .config_service
        .update_biz_searchable_tables(&biz, &tables)
        .await?;
    Ok(Json(json!({ "status": "updated" })))
}

#[derive(Debug, Deserialize)]
pub struct FieldSettingsRequest {
    pub fields: HashMap<String, FieldSetting>,
}

/// `PUT /admin/biz-config/{biz}/tables/{table}/fields`.
pub async fn put_table_fields(
    State(state): State<AppState>,
    Path((biz, table)): Path<(String, String)>,
    Json(req): Json<FieldSettingsRequest>,
) -> Result<Json<Value>, GatewayError> {
    state
        .config_service
        .update_table_field_settings(&biz, &table, &req.fields)
        .await?;
    Ok(Json(json!({ "status": "updated" })))
}

#[derive(Debug, Deserialize)]
pub struct WritePermissionsRequest {
    pub allow_create: bool,
    pub allow_update: bool,
    pub allow_delete: bool,
}

/// `PUT /admin/biz-config/{biz}/tables/{table}/permissions`.
pub async fn put_table_permissions(
    State(state): State<AppState>,
    Path((biz, table)): Path<(String, String)>,
    Json(req): Json<WritePermissionsRequest>,
) -> Result<Json<Value>, GatewayError> {
    state
        .config_service
        .update_table_write_permissions(
            &biz,
            &table,
            req.allow_create,
            req.allow_update,
            req.allow_delete,
        )
        .await?;
    Ok(Json(json!({ "status": "updated" })))
}

/// `GET /admin/biz-config/{biz}/views`.
pub async fn get_biz_views(
    State(state): State<AppState>,
    Path(biz): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let views = state.config_service.get_all_view_configs_for_biz(&biz).await?;
    Ok(Json(serde_json::to_value(views)?))
}

#[derive(Debug, Deserialize)]
pub struct ViewsRequest {
    pub views: ViewsByTable,
}

/// `PUT /admin/biz-config/{biz}/views`: total replacement of the biz's
/// view set.
pub async fn put_biz_views(
    State(state): State<AppState>,
    Path(biz): Path<String>,
    Json(req): Json<ViewsRequest>,
) -> Result<Json<Value>, GatewayError> {
    state
        .config_service
        .update_all_views_for_biz(&biz, &req.views)
        .await?;
    Ok(Json(json!({ "status": "updated" })))
}

/// `POST /admin/biz-config/{biz}/cache/invalidate`.
pub async fn invalidate_biz_cache(
    State(state): State<AppState>,
    Path(biz): Path<String>,
) -> Json<Value> {
    state.config_service.invalidate_cache_for_biz(&biz);
    Json(json!({ "status": "invalidated" }))
}

/// `POST /admin/biz-config/cache/invalidate`.
pub async fn invalidate_all_caches(State(state): State<AppState>) -> Json<Value> {
    state.config_service.invalidate_all_caches();
    Json(json!({ "status": "invalidated" }))
}

// ---------------------------------------------------------------------------
// Admin: plugins
// ---------------------------------------------------------------------------

/// `GET /admin/plugins/catalog`.
pub async fn list_catalog(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    let plugins = state.catalog.snapshot().await;
    Ok(Json(json!({ "plugins": plugins })))
}

/// `POST /admin/plugins/catalog/refresh`: run a refresh pass now.
pub async fn refresh_catalog(State(state): State<AppState>) -> Json<Value> {
    let merged = state.catalog.refresh().await;
    Json(json!({ "repositories_merged": merged }))
}

/// `GET /admin/plugins/installed`.
pub async fn list_installed(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    let rows = state.store.list_installed_plugins().await?;
    let plugins: Vec<Value> = rows
        .into_iter()
        .map(|row| {
            json!({
                "plugin_id": row.plugin_id,
                "version": row.version,
                "install_path": row.install_path,
                "installed_at": row.installed_at,
            })
        })
        .collect();
    Ok(Json(json!({ "plugins": plugins })))
}

#[derive(Debug, Deserialize)]
pub struct InstallRequest {
    pub plugin_id: String,
    pub version: String,
}

/// `POST /admin/plugins/install`.
pub async fn install_plugin(
    State(state): State<AppState>,
    Json(req): Json<InstallRequest>,
) -> Result<Json<Value>, GatewayError> {
    let row = state.installer.install(&req.plugin_id, &req.version).await?;
    Ok(Json(json!({
        "plugin_id": row.plugin_id,
        "version": row.version,
        "install_path": row.install_path,
    })))
}

/// `DELETE /admin/plugins/installed/{plugin_id}/{version}`.
pub async fn uninstall_plugin(
    State(state): State<AppState>,
    Path((plugin_id, version)): Path<(String, String)>,
) -> Result<Json<Value>, GatewayError> {
    state.installer.uninstall(&plugin_id, &version).await?;
    Ok(Json(json!({ "status": "uninstalled" })))
}

/// `GET /admin/plugins/instances`.
pub async fn list_instances(State(state): State<AppState>) -> Json<Value> {
    let instances: Vec<InstanceSnapshot> = state.supervisor.list_instances().await;
    Json(json!({ "instances": instances }))
}

#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    pub display_name: String,
    pub plugin_id: String,
    pub version: String,
    pub biz_name: String,
}

/// `POST /admin/plugins/instances`: returns 201 with the new instance.
pub async fn create_instance(
    State(state): State<AppState>,
    Json(req): Json<CreateInstanceRequest>,
) -> Result<(StatusCode, Json<Value>), GatewayError> {
    let snapshot = state
        .supervisor
        .create_instance(&req.display_name, &req.plugin_id, &req.version, &req.biz_name)
        .await?;
    let instance_id = snapshot.instance_id.clone();
    Ok((
        StatusCode::CREATED,
        Json(json!({ "instance": snapshot, "instance_id": instance_id })),
    ))
}

/// `DELETE /admin/plugins/instances/{instance_id}`.
pub async fn delete_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    state.supervisor.delete_instance(&instance_id).await?;
    Ok(Json(json!({ "status": "deleted" })))
}

/// `POST /admin/plugins/instances/{instance_id}/start`.
pub async fn start_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let snapshot = state.supervisor.start(&instance_id).await?;
    Ok(Json(json!({ "instance": snapshot })))
}

/// `POST /admin/plugins/instances/{instance_id}/stop`.
pub async fn stop_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let snapshot = state.supervisor.stop(&instance_id).await?;
    Ok(Json(json!({ "instance": snapshot })))
}

// ---------------------------------------------------------------------------
// Admin: rate limiting & metrics
// ---------------------------------------------------------------------------

/// `GET /admin/security/rate-limiting/global`: stored IP defaults.
pub async fn get_ip_limits(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    let settings = state.config_service.get_ip_limit_settings().await?;
    match settings {
        Some(settings) => Ok(Json(serde_json::to_value(settings)?)),
        None => Ok(Json(json!({
            "rate_per_minute": state.config.rate_limiting.ip_rate_per_minute,
            "burst": state.config.rate_limiting.ip_burst,
            "source": "defaults",
        }))),
    }
}

/// `PUT /admin/security/rate-limiting/global`.
///
/// Live per-IP buckets keep their limits until idle eviction; new buckets
/// pick the stored values up after the next restart.
pub async fn put_ip_limits(
    State(state): State<AppState>,
    Json(settings): Json<IpLimitSettings>,
) -> Result<Json<Value>, GatewayError> {
    if settings.rate_per_minute <= 0.0 || settings.burst == 0 {
        return Err(GatewayError::Validation {
            message: "rate_per_minute and burst must be positive".to_string(),
        });
    }
    state.config_service.update_ip_limit_settings(&settings).await?;
    Ok(Json(json!({ "status": "updated" })))
}

#[derive(Debug, Deserialize)]
pub struct EntityLimitRequest {
    pub rate_per_second: f64,
    pub burst: u32,
}

/// `GET /admin/security/rate-limiting/users/{user_id}`.
pub async fn get_user_limits(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let row = state
        .config_service
        .get_user_limit_settings(&user_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound {
            message: format!("no rate-limit override for user {user_id}"),
        })?;
    Ok(Json(json!({
        "user_id": row.entity,
        "rate_per_second": row.rate_per_second,
        "burst": row.burst,
    })))
}

/// `PUT /admin/security/rate-limiting/users/{user_id}`.
pub async fn put_user_limits(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<EntityLimitRequest>,
) -> Result<Json<Value>, GatewayError> {
    if req.rate_per_second <= 0.0 || req.burst == 0 {
        return Err(GatewayError::Validation {
            message: "rate_per_second and burst must be positive".to_string(),
        });
    }
    state
        .config_service
        .update_user_limit_settings(&user_id, req.rate_per_second, req.burst)
        .await?;
    Ok(Json(json!({ "status": "updated" })))
}

/// `GET /admin/security/rate-limiting/biz/{biz}`.
pub async fn get_biz_limits(
    State(state): State<AppState>,
    Path(biz): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let row = state
        .config_service
        .get_biz_limit_settings(&biz)
        .await?
        .ok_or_else(|| GatewayError::NotFound {
            message: format!("no rate-limit override for biz {biz}"),
        })?;
    Ok(Json(json!({
        "biz_name": row.entity,
        "rate_per_second": row.rate_per_second,
        "burst": row.burst,
    })))
}

/// `PUT /admin/security/rate-limiting/biz/{biz}`.
pub async fn put_biz_limits(
    State(state): State<AppState>,
    Path(biz): Path<String>,
    Json(req): Json<EntityLimitRequest>,
) -> Result<Json<Value>, GatewayError> {
    if req.rate_per_second <= 0.0 || req.burst == 0 {
        return Err(GatewayError::Validation {
            message: "rate_per_second and burst must be positive".to_string(),
        });
    }
    state
        .config_service
        .update_biz_limit_settings(&biz, req.rate_per_second, req.burst)
        .await?;
    Ok(Json(json!({ "status": "updated" })))
}

/// `GET /admin/metrics`: aggregated process metrics.
pub async fn admin_metrics() -> Json<Value> {
    let aggregated = crate::metrics::get_aggregated_metrics().await;
    Json(serde_json::to_value(aggregated).unwrap_or_else(|_| json!({})))
}
