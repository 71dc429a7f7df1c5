//! Installed-plugin and plugin-instance rows.
//!
//! An installed plugin is the record of an unpacked artifact; an instance
//! is the configuration for running one installed plugin for one business
//! group. Transient runtime status is never persisted: every instance
//! loads as `stopped` after a restart.

use super::SystemStore;
use chrono::{DateTime, Utc};

/// One installed artifact, keyed by `(plugin_id, version)`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InstalledPluginRow {
    pub plugin_id: String,
    pub version: String,
    /// Absolute directory the artifact unpacked into
    pub install_path: String,
    pub installed_at: DateTime<Utc>,
}

/// Persisted configuration of one plugin instance.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PluginInstanceRow {
    /// Server-minted instance id
    pub instance_id: String,
    pub display_name: String,
    pub plugin_id: String,
    pub version: String,
    /// Routing key; unique among enabled instances (supervisor-enforced)
    pub biz_name: String,
    /// Localhost port the child listens on
    pub port: u16,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_started_at: Option<DateTime<Utc>>,
}

impl SystemStore {
    /// Record an install, replacing any previous row for the same version.
    pub async fn upsert_installed_plugin(
        &self,
        plugin_id: &str,
        version: &str,
        install_path: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO installed_plugins (plugin_id, version, install_path, installed_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (plugin_id, version) DO UPDATE SET \
                 install_path = excluded.install_path, installed_at = excluded.installed_at",
        )
        .bind(plugin_id)
        .bind(version)
        .bind(install_path)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// One installed-plugin row.
    pub async fn get_installed_plugin(
        &self,
        plugin_id: &str,
        version: &str,
    ) -> Result<Option<InstalledPluginRow>, sqlx::Error> {
        sqlx::query_as::<_, InstalledPluginRow>(
            "SELECT plugin_id, version, install_path, installed_at \
             FROM installed_plugins WHERE plugin_id = ? AND version = ?",
        )
        .bind(plugin_id)
        .bind(version)
        .fetch_optional(self.pool())
        .await
    }

    /// Every installed plugin.
    pub async fn list_installed_plugins(&self) -> Result<Vec<InstalledPluginRow>, sqlx::Error> {
        sqlx::query_as::<_, InstalledPluginRow>(
            "SELECT plugin_id, version, install_path, installed_at \
             FROM installed_plugins ORDER BY plugin_id, version",
        )
        .fetch_all(self.pool())
        .await
    }

    /// Remove the record of one install.
    pub async fn delete_installed_plugin(
        &self,
        plugin_id: &str,
        version: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM installed_plugins WHERE plugin_id = ? AND version = ?")
            .bind(plugin_id)
            .bind(version)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Persist a new instance configuration.
    pub async fn insert_plugin_instance(
        &self,
        row: &PluginInstanceRow,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO plugin_instances \
                 (instance_id, display_name, plugin_id, version, biz_name, port, enabled, \
                  created_at, last_started_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.instance_id)
        .bind(&row.display_name)
        .bind(&row.plugin_id)
        .bind(&row.version)
        .bind(&row.biz_name)
        .bind(row.port)
        .bind(row.enabled)
        .bind(row.created_at)
        .bind(row.last_started_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// One instance row.
    pub async fn get_plugin_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<PluginInstanceRow>, sqlx::Error> {
        sqlx::query_as::<_, PluginInstanceRow>(
            "SELECT instance_id, display_name, plugin_id, version, biz_name, port, enabled, \
                    created_at, last_started_at \
             FROM plugin_instances WHERE instance_id = ?",
        )
        .bind(instance_id)
        .fetch_optional(self.pool())
        .await
    }

    /// Every instance configuration.
    pub async fn list_plugin_instances(&self) -> Result<Vec<PluginInstanceRow>, sqlx::Error> {
        sqlx::query_as::<_, PluginInstanceRow>(
            "SELECT instance_id, display_name, plugin_id, version, biz_name, port, enabled, \
                    created_at, last_started_at \
             FROM plugin_instances ORDER BY created_at",
        )
        .fetch_all(self.pool())
        .await
    }

    /// Stamp a successful start.
    pub async fn touch_instance_started(
        &self,
        instance_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE plugin_instances SET last_started_at = ? WHERE instance_id = ?")
            .bind(at)
            .bind(instance_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Remove one instance configuration.
    pub async fn delete_plugin_instance(&self, instance_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM plugin_instances WHERE instance_id = ?")
            .bind(instance_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
