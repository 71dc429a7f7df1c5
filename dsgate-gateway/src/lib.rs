//! # DSGate Gateway Library
//!
//! A data-source gateway: one long-running process that accepts
//! authenticated HTTP/JSON requests, routes each request to a
//! business-group-specific backend, and returns the backend's response.
//! Backends are out-of-process plugins speaking a small RPC contract,
//! supervised by the gateway as child processes.
//!
//! ## Architecture
//!
//! The library is organized into these modules:
//!
//! - **`config`**: TOML configuration, env overrides, validation
//! - **`store`**: the system SQLite database (users, biz configuration,
//!   rate limits, installed plugins, instances)
//! - **`config_service`**: cached read/write facade over biz
//!   configuration with strict invalidation on writes
//! - **`rate_limit`**: four composable token-bucket gates with idle
//!   eviction
//! - **`auth`**: JWT validation, credential login, failure lockout
//! - **`registry`**: the concurrent biz-to-backend routing map
//! - **`plugins`**: downloaders, catalog refresher, installer, and the
//!   instance supervisor
//! - **`handlers` / `middleware` / `server`**: the HTTP surface
//! - **`metrics`**: in-memory request metrics
//! - **`gateway_error`**: the error-kind table and HTTP mapping
//!
//! ## Request Flow
//!
//! client → auth gate → rate-limiter chain → dispatcher → routing
//! registry lookup → backend RPC → response. Admin operations instead
//! reach the config service and the supervisor; plugin lifecycle
//! (catalog → installer → supervisor) feeds the routing registry.
//!
//! ## Quick Start
//!
//! ```rust
//! use dsgate_gateway::{config::Config, server::create_server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml")?;
//!     let (app, _state) = create_server(config).await?;
//!     // Serve `app` with axum.
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod config_service;
pub mod gateway_error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod plugins;
pub mod rate_limit;
pub mod registry;
pub mod server;
pub mod store;

pub use server::create_server;
