//! # HTTP Server Module
//!
//! Server setup for the DSGate gateway: application state, route table,
//! and the middleware stacks.
//!
//! ## Route Groups
//!
//! Three groups with distinct middleware stacks, merged into one router:
//!
//! - **Public** (`/system/*`, `/auth/login`, `/health`): no
//!   authentication, lightweight rate-limit chain.
//! - **User** (`/meta/*`, `/data/*`): bearer-token authentication, full
//!   business rate-limit chain.
//! - **Admin** (`/admin/*`): bearer-token authentication plus the
//!   admin-role check, lightweight chain.
//!
//! Global layers wrap all three: CORS, logging, metrics, and the request
//! timeout.
//!
//! ## Startup Order
//!
//! `create_server` initializes the process-wide singletons in dependency
//! order: store, config service, rate limiter (which reads the store's IP
//! defaults), auth service, metrics, downloaders, catalog (first refresh
//! pass scheduled immediately), installer, registry, and finally the
//! supervisor with its persisted instance configurations.

use crate::auth::AuthService;
use crate::config::Config;
use crate::config_service::BizConfigService;
use crate::gateway_error::GatewayError;
use crate::handlers;
use crate::middleware::{
    full_rate_limit, lightweight_rate_limit, logging_middleware, metrics_middleware, require_admin,
    require_user,
};
use crate::plugins::{DownloaderSet, InstanceSupervisor, PluginCatalog, PluginInstaller};
use crate::rate_limit::RateLimiter;
use crate::registry::BackendRegistry;
use crate::store::SystemStore;
use axum::routing::{delete, get, post, put};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

/// Application state shared across all HTTP handlers.
///
/// Every field is an `Arc` (or an internally shared handle) so cloning
/// the state per request is cheap.
pub struct AppState {
    pub config: Arc<Config>,
    pub store: SystemStore,
    pub config_service: Arc<BizConfigService>,
    pub registry: Arc<BackendRegistry>,
    pub supervisor: Arc<InstanceSupervisor>,
    pub catalog: Arc<PluginCatalog>,
    pub installer: Arc<PluginInstaller>,
    pub auth: Arc<AuthService>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            store: self.store.clone(),
            config_service: self.config_service.clone(),
            registry: self.registry.clone(),
            supervisor: self.supervisor.clone(),
            catalog: self.catalog.clone(),
            installer: self.installer.clone(),
            auth: self.auth.clone(),
            rate_limiter: self.rate_limiter.clone(),
        }
    }
}

/// Create the HTTP application and its state.
///
/// Opens (or creates) the system database at the configured path, then
/// delegates to [`create_server_with_store`].
pub async fn create_server(config: Config) -> anyhow::Result<(Router, AppState)> {
    let store = SystemStore::connect(&config.database.path).await?;
    create_server_with_store(config, store).await
}

/// Create the HTTP application over an existing store handle.
///
/// Tests use this entry point with an in-memory store.
pub async fn create_server_with_store(
    config: Config,
    store: SystemStore,
) -> anyhow::Result<(Router, AppState)> {
    let config = Arc::new(config);

    let config_service = Arc::new(BizConfigService::new(store.clone()));

    let rate_limiter = Arc::new(
        RateLimiter::new(&config.rate_limiting, config_service.clone())
            .await
            .map_err(|e: GatewayError| anyhow::anyhow!(e.to_string()))?,
    );
    rate_limiter.start_eviction_tasks();

    let auth = Arc::new(AuthService::new(config.auth.clone(), store.clone()));
    auth.start_cleanup_task();

    crate::metrics::initialize_metrics(crate::metrics::MetricsConfig {
        enabled: config.metrics.enabled,
        max_requests: config.metrics.max_requests,
        retention_duration: config.metrics.retention_duration,
    })
    .await;

    let downloaders = Arc::new(DownloaderSet::with_defaults());
    let catalog = Arc::new(PluginCatalog::new(
        config.plugin_management.repositories.clone(),
        downloaders.clone(),
    ));
    catalog.start_refresh_task(config.plugin_management.refresh_interval);

    let installer = Arc::new(PluginInstaller::new(
        catalog.clone(),
        downloaders,
        store.clone(),
        config.plugin_management.install_directory.clone(),
    ));

    let registry = Arc::new(BackendRegistry::new());
    let instance_data_root = config
        .plugin_management
        .install_directory
        .parent()
        .map(|p| p.join("instances"))
        .unwrap_or_else(|| config.plugin_management.install_directory.join("instances"));
    let supervisor = Arc::new(InstanceSupervisor::new(
        store.clone(),
        registry.clone(),
        config.plugin_management.instance_port_range,
        instance_data_root,
    ));
    let loaded = supervisor
        .load_existing()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    if loaded > 0 {
        tracing::info!(instances = loaded, "Loaded persisted instance configurations");
    }

    let state = AppState {
        config: config.clone(),
        store,
        config_service,
        registry,
        supervisor,
        catalog,
        installer,
        auth,
        rate_limiter,
    };

    let public_routes = Router::new()
        .route("/api/v1/system/status", get(handlers::system_status))
        .route(
            "/api/v1/system/setup",
            get(handlers::setup_token).post(handlers::setup_admin),
        )
        .route("/api/v1/auth/login", post(handlers::login))
        .route("/api/v1/health", get(handlers::health_check))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            lightweight_rate_limit,
        ));

    let user_routes = Router::new()
        .route("/api/v1/meta/biz", get(handlers::list_biz))
        .route("/api/v1/meta/schema/{biz_name}", get(handlers::get_schema))
        .route("/api/v1/meta/presentations", get(handlers::get_presentation))
        .route("/api/v1/data/query", post(handlers::data_query))
        .route("/api/v1/data/mutate", post(handlers::data_mutate))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    require_user,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    full_rate_limit,
                )),
        );

    let admin_routes = Router::new()
        .route("/api/v1/admin/biz-config/{biz}", get(handlers::get_biz_config))
        .route(
            "/api/v1/admin/biz-config/{biz}/settings",
            put(handlers::put_biz_settings),
        )
        .route(
            "/api/v1/admin/biz-config/{biz}/tables",
            put(handlers::put_biz_tables),
        )
        .route(
            "/api/v1/admin/biz-config/{biz}/tables/{table}/fields",
            put(handlers::put_table_fields),
        )
        .route(
            "/api/v1/admin/biz-config/{biz}/tables/{table}/permissions",
            put(handlers::put_table_permissions),
        )
        .route(
            "/api/v1/admin/biz-config/{biz}/views",
            get(handlers::get_biz_views).put(handlers::put_biz_views),
        )
        .route(
            "/api/v1/admin/biz-config/{biz}/cache/invalidate",
            post(handlers::invalidate_biz_cache),
        )
        .route(
            "/api/v1/admin/biz-config/cache/invalidate",
            post(handlers::invalidate_all_caches),
        )
        .route("/api/v1/admin/plugins/catalog", get(handlers::list_catalog))
        .route(
            "/api/v1/admin/plugins/catalog/refresh",
            post(handlers::refresh_catalog),
        )
        .route("/api/v1/admin/plugins/installed", get(handlers::list_installed))
        .route("/api/v1/admin/plugins/install", post(handlers::install_plugin))
        .route(
            "/api/v1/admin/plugins/installed/{plugin_id}/{version}",
            delete(handlers::uninstall_plugin),
        )
        .route(
            "/api/v1/admin/plugins/instances",
            get(handlers::list_instances).post(handlers::create_instance),
        )
        .route(
            "/api/v1/admin/plugins/instances/{instance_id}",
            delete(handlers::delete_instance),
        )
        .route(
            "/api/v1/admin/plugins/instances/{instance_id}/start",
            post(handlers::start_instance),
        )
        .route(
            "/api/v1/admin/plugins/instances/{instance_id}/stop",
            post(handlers::stop_instance),
        )
        .route(
            "/api/v1/admin/security/rate-limiting/global",
            get(handlers::get_ip_limits).put(handlers::put_ip_limits),
        )
        .route(
            "/api/v1/admin/security/rate-limiting/users/{user_id}",
            get(handlers::get_user_limits).put(handlers::put_user_limits),
        )
        .route(
            "/api/v1/admin/security/rate-limiting/biz/{biz}",
            get(handlers::get_biz_limits).put(handlers::put_biz_limits),
        )
        .route("/api/v1/admin/metrics", get(handlers::admin_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    require_user,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    require_admin,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    lightweight_rate_limit,
                )),
        );

    let app = Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .merge(admin_routes)
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    logging_middleware,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                ))
                .layer(TimeoutLayer::new(state.config.server.timeout)),
        )
        .with_state(state.clone());

    Ok((app, state))
}
