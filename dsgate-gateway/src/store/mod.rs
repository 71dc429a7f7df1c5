//! # System Store Module
//!
//! This module owns the gateway's single system database: a SQLite file
//! holding users, business-group configuration, rate-limit settings,
//! installed plugins, and plugin instances.
//!
//! ## Overview
//!
//! `SystemStore` wraps a `sqlx` connection pool and exposes typed
//! operations grouped by concern:
//!
//! - **`users`**: account rows and the first-run admin count
//! - **`biz`**: overall settings, searchable tables, field settings, views
//! - **`limits`**: IP defaults and per-user / per-biz rate-limit overrides
//! - **`plugins`**: installed-plugin records and instance configurations
//!
//! ## Failure Semantics
//!
//! "No rows" on a read is translated to `Ok(None)`, never an error. Write
//! operations that touch multiple rows run inside a transaction; the
//! transaction rolls back when any statement fails or the future is
//! dropped before commit.
//!
//! ## Schema
//!
//! The schema is created with `CREATE TABLE IF NOT EXISTS` on startup, so
//! a fresh instance directory bootstraps itself and existing files are
//! left untouched.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

pub mod biz;
pub mod limits;
pub mod plugins;
pub mod users;

pub use biz::{FieldSettingRow, OverallSettingsRow, TableSettingsRow, ViewRow};
pub use limits::{EntityLimitRow, IpLimitSettings};
pub use plugins::{InstalledPluginRow, PluginInstanceRow};
pub use users::UserRecord;

/// Handle over the system database pool.
///
/// Cloning is cheap; all clones share one pool. The pool is closed
/// explicitly during shutdown after every running instance has stopped.
#[derive(Debug, Clone)]
pub struct SystemStore {
    pool: SqlitePool,
}

impl SystemStore {
    /// Open (creating if missing) the system database at `path` and ensure
    /// the schema exists.
    pub async fn connect(path: &Path) -> Result<Self, sqlx::Error> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    sqlx::Error::Io(std::io::Error::other(format!(
                        "failed to create database directory {}: {e}",
                        parent.display()
                    )))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// In-memory database for tests.
    ///
    /// A single connection keeps every query on the same memory database.
    pub async fn connect_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// The underlying pool, for transaction scopes in submodules.
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool. Called once during shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        let statements = [
            r#"CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS biz_overall_settings (
                biz_name TEXT PRIMARY KEY,
                is_publicly_searchable INTEGER NOT NULL DEFAULT 0,
                default_query_table TEXT
            )"#,
            r#"CREATE TABLE IF NOT EXISTS biz_searchable_tables (
                biz_name TEXT NOT NULL,
                table_name TEXT NOT NULL,
                is_searchable INTEGER NOT NULL DEFAULT 1,
                allow_create INTEGER NOT NULL DEFAULT 0,
                allow_update INTEGER NOT NULL DEFAULT 0,
                allow_delete INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (biz_name, table_name)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS biz_field_settings (
                biz_name TEXT NOT NULL,
                table_name TEXT NOT NULL,
                field_name TEXT NOT NULL,
                is_searchable INTEGER NOT NULL DEFAULT 0,
                is_returnable INTEGER NOT NULL DEFAULT 1,
                data_type TEXT NOT NULL DEFAULT 'string',
                PRIMARY KEY (biz_name, table_name, field_name)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS biz_view_definitions (
                biz_name TEXT NOT NULL,
                table_name TEXT NOT NULL,
                view_name TEXT NOT NULL,
                config TEXT NOT NULL,
                PRIMARY KEY (biz_name, table_name, view_name)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS global_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS user_rate_limits (
                user_id TEXT PRIMARY KEY,
                rate_per_second REAL NOT NULL,
                burst INTEGER NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS biz_rate_limits (
                biz_name TEXT PRIMARY KEY,
                rate_per_second REAL NOT NULL,
                burst INTEGER NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS installed_plugins (
                plugin_id TEXT NOT NULL,
                version TEXT NOT NULL,
                install_path TEXT NOT NULL,
                installed_at TEXT NOT NULL,
                PRIMARY KEY (plugin_id, version)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS plugin_instances (
                instance_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                plugin_id TEXT NOT NULL,
                version TEXT NOT NULL,
                biz_name TEXT NOT NULL,
                port INTEGER NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                last_started_at TEXT
            )"#,
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}
