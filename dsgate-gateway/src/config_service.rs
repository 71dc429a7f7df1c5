//! # Config Service Module
//!
//! This module provides the read/write facade over the system store for
//! business-group configuration, with an LRU read cache and strict
//! invalidation on every write.
//!
//! ## Overview
//!
//! The config service is the only path through which handlers read or
//! write biz configuration. Reads of a biz's full configuration are served
//! from a TTL'd LRU cache keyed by biz name; every committed write for a
//! biz invalidates that biz's cache entry, so the next read executes a
//! store load.
//!
//! ## Cache Consistency
//!
//! Cache entries are always a consistent snapshot of one biz's complete
//! configuration or absent; partial snapshots are never stored. The load
//! performs one logical pass (overall settings, table settings, field
//! settings) and only caches fully assembled snapshots. An absent
//! overall-settings row means "not configured", which is distinct from a
//! store error and is not cached.
//!
//! ## Rate-Limit Settings
//!
//! IP, per-user, and per-biz rate-limit settings pass straight through to
//! the store with no cache; the rate limiter caches resolved buckets at
//! its own layer.
//!
//! ## Usage
//!
//! ```rust
//! # use dsgate_gateway::config_service::BizConfigService;
//! # use dsgate_gateway::store::SystemStore;
//! # async fn run(store: SystemStore) {
//! let service = BizConfigService::new(store);
//! match service.get_biz_query_config("library").await.unwrap() {
//!     Some(config) => println!("{} tables", config.tables.len()),
//!     None => println!("library is not configured"),
//! }
//! # }
//! ```

use crate::gateway_error::GatewayError;
use crate::store::{EntityLimitRow, IpLimitSettings, SystemStore};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default cache capacity (distinct biz names).
const CACHE_CAPACITY: usize = 256;

/// Default snapshot TTL.
const CACHE_TTL: Duration = Duration::from_secs(300);

/// Field-level settings within a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSetting {
    /// Whether the field may appear in query conditions
    pub is_searchable: bool,
    /// Whether the field may appear in results
    pub is_returnable: bool,
    /// Declared data type (`string`, `number`, `date`, ...)
    pub data_type: String,
}

/// Table-level settings: searchability, write permissions, and fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    pub is_searchable: bool,
    pub allow_create: bool,
    pub allow_update: bool,
    pub allow_delete: bool,
    /// Configured fields keyed by field name
    pub fields: HashMap<String, FieldSetting>,
}

/// Complete configuration snapshot of one business group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BizQueryConfig {
    pub biz_name: String,
    /// Whether unauthenticated discovery may list this biz
    pub is_publicly_searchable: bool,
    /// Table queried when a request names none
    pub default_query_table: Option<String>,
    /// Configured tables keyed by table name
    pub tables: HashMap<String, TableConfig>,
}

/// One named view of a table.
///
/// `binding`'s shape depends on `view_type`; the service stores it opaquely
/// as part of the view's JSON blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewConfig {
    /// Unique within the table
    pub view_name: String,
    pub view_type: String,
    pub display_name: String,
    /// At most one default per table, enforced on bulk replace
    #[serde(default)]
    pub is_default: bool,
    /// View-type-specific binding
    #[serde(default)]
    pub binding: Value,
}

/// Views of one biz grouped by table name.
pub type ViewsByTable = HashMap<String, Vec<ViewConfig>>;

struct CachedSnapshot {
    config: BizQueryConfig,
    inserted_at: Instant,
}

impl CachedSnapshot {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }
}

/// Read/write facade over the system store with a TTL'd LRU cache.
pub struct BizConfigService {
    store: SystemStore,
    cache: Mutex<LruCache<String, CachedSnapshot>>,
    ttl: Duration,
}

impl BizConfigService {
    /// Build a service with the default cache capacity and five-minute TTL.
    pub fn new(store: SystemStore) -> Self {
        Self::with_ttl(store, CACHE_TTL)
    }

    /// Build a service with a custom snapshot TTL (used by tests).
    pub fn with_ttl(store: SystemStore, ttl: Duration) -> Self {
        Self {
            store,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
            ttl,
        }
    }

    /// The underlying store handle.
    pub fn store(&self) -> &SystemStore {
        &self.store
    }

    // -- full-config read path ---------------------------------------------

    /// Full configuration of one biz, cache-first.
    ///
    /// Returns `Ok(None)` when the biz has no overall-settings row ("not
    /// configured"), which is distinct from a store error.
    pub async fn get_biz_query_config(
        &self,
        biz: &str,
    ) -> Result<Option<BizQueryConfig>, GatewayError> {
        if let Some(config) = self.cache_get(biz) {
            return Ok(Some(config));
        }

        let Some(config) = self.load_biz_config(biz).await? else {
            return Ok(None);
        };

        self.cache_put(biz, config.clone());
        Ok(Some(config))
    }

    /// Load one biz's complete configuration from the store in one pass.
    async fn load_biz_config(&self, biz: &str) -> Result<Option<BizQueryConfig>, GatewayError> {
        let Some(overall) = self
            .store
            .get_overall_settings(biz)
            .await
            .map_err(|e| GatewayError::store_for_biz(biz, e))?
        else {
            return Ok(None);
        };

        let table_rows = self
            .store
            .get_table_settings(biz)
            .await
            .map_err(|e| GatewayError::store_for_biz(biz, e))?;
        let field_rows = self
            .store
            .get_field_settings(biz)
            .await
            .map_err(|e| GatewayError::store_for_biz(biz, e))?;

        let mut tables: HashMap<String, TableConfig> = HashMap::new();
        for row in table_rows {
            tables.insert(
                row.table_name.clone(),
                TableConfig {
                    is_searchable: row.is_searchable,
                    allow_create: row.allow_create,
                    allow_update: row.allow_update,
                    allow_delete: row.allow_delete,
                    fields: HashMap::new(),
                },
            );
        }
        for row in field_rows {
            // Field rows for unknown tables still get a config entry; the
            // backend schema is the source of truth for physical fields.
            let table = tables.entry(row.table_name.clone()).or_default();
            table.fields.insert(
                row.field_name.clone(),
                FieldSetting {
                    is_searchable: row.is_searchable,
                    is_returnable: row.is_returnable,
                    data_type: row.data_type.clone(),
                },
            );
        }

        Ok(Some(BizQueryConfig {
            biz_name: biz.to_string(),
            is_publicly_searchable: overall.is_publicly_searchable,
            default_query_table: overall.default_query_table,
            tables,
        }))
    }

    // -- write path (each write invalidates the biz's cache entry) ---------

    /// Update the overall settings row for one biz.
    pub async fn update_biz_overall_settings(
        &self,
        biz: &str,
        is_publicly_searchable: bool,
        default_query_table: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.store
            .upsert_overall_settings(biz, is_publicly_searchable, default_query_table)
            .await
            .map_err(|e| GatewayError::store_for_biz(biz, e))?;
        self.invalidate_cache_for_biz(biz);
        Ok(())
    }

    /// Replace the set of searchable tables for one biz.
    pub async fn update_biz_searchable_tables(
        &self,
        biz: &str,
        tables: &[(String, bool)],
    ) -> Result<(), GatewayError> {
        self.store
            .replace_searchable_tables(biz, tables)
            .await
            .map_err(|e| GatewayError::store_for_biz(biz, e))?;
        self.invalidate_cache_for_biz(biz);
        Ok(())
    }

    /// Replace the field settings of one table.
    pub async fn update_table_field_settings(
        &self,
        biz: &str,
        table: &str,
        fields: &HashMap<String, FieldSetting>,
    ) -> Result<(), GatewayError> {
        let rows: Vec<(String, bool, bool, String)> = fields
            .iter()
            .map(|(name, setting)| {
                (
                    name.clone(),
                    setting.is_searchable,
                    setting.is_returnable,
                    setting.data_type.clone(),
                )
            })
            .collect();
        self.store
            .replace_table_field_settings(biz, table, &rows)
            .await
            .map_err(|e| GatewayError::store_for_biz(biz, e))?;
        self.invalidate_cache_for_biz(biz);
        Ok(())
    }

    /// Update write permissions of one table.
    pub async fn update_table_write_permissions(
        &self,
        biz: &str,
        table: &str,
        allow_create: bool,
        allow_update: bool,
        allow_delete: bool,
    ) -> Result<(), GatewayError> {
        self.store
            .update_table_write_permissions(biz, table, allow_create, allow_update, allow_delete)
            .await
            .map_err(|e| GatewayError::store_for_biz(biz, e))?;
        self.invalidate_cache_for_biz(biz);
        Ok(())
    }

    // -- views --------------------------------------------------------------

    /// All views of one biz, grouped by table.
    pub async fn get_all_view_configs_for_biz(
        &self,
        biz: &str,
    ) -> Result<ViewsByTable, GatewayError> {
        let rows = self
            .store
            .get_views_for_biz(biz)
            .await
            .map_err(|e| GatewayError::store_for_biz(biz, e))?;

        let mut grouped: ViewsByTable = HashMap::new();
        for row in rows {
            let view: ViewConfig = serde_json::from_str(&row.config)?;
            grouped.entry(row.table_name).or_default().push(view);
        }
        Ok(grouped)
    }

    /// Delete all views of one biz and reinsert the given set atomically.
    ///
    /// Enforces view-name uniqueness and the at-most-one-default rule per
    /// table before touching the store.
    pub async fn update_all_views_for_biz(
        &self,
        biz: &str,
        views: &ViewsByTable,
    ) -> Result<(), GatewayError> {
        let mut rows: Vec<(String, String, String)> = Vec::new();
        for (table, table_views) in views {
            let mut seen = Vec::new();
            let mut defaults = 0usize;
            for view in table_views {
                if view.view_name.is_empty() {
                    return Err(GatewayError::Validation {
                        message: format!("table {table}: view name cannot be empty"),
                    });
                }
                if seen.contains(&view.view_name.as_str()) {
                    return Err(GatewayError::Validation {
                        message: format!(
                            "table {table}: duplicate view name {}",
                            view.view_name
                        ),
                    });
                }
                seen.push(view.view_name.as_str());
                if view.is_default {
                    defaults += 1;
                }
                rows.push((
                    table.clone(),
                    view.view_name.clone(),
                    serde_json::to_string(view)?,
                ));
            }
            if defaults > 1 {
                return Err(GatewayError::Validation {
                    message: format!("table {table}: more than one default view"),
                });
            }
        }

        self.store
            .replace_all_views_for_biz(biz, &rows)
            .await
            .map_err(|e| GatewayError::store_for_biz(biz, e))?;
        self.invalidate_cache_for_biz(biz);
        Ok(())
    }

    /// The view with `is_default = true` for one table, if any.
    pub async fn get_default_view_config(
        &self,
        biz: &str,
        table: &str,
    ) -> Result<Option<ViewConfig>, GatewayError> {
        let rows = self
            .store
            .get_views_for_table(biz, table)
            .await
            .map_err(|e| GatewayError::store_for_biz(biz, e))?;

        for row in rows {
            let view: ViewConfig = serde_json::from_str(&row.config)?;
            if view.is_default {
                return Ok(Some(view));
            }
        }
        Ok(None)
    }

    // -- rate-limit settings (no cache at this layer) -----------------------

    /// Stored IP defaults, if any.
    pub async fn get_ip_limit_settings(&self) -> Result<Option<IpLimitSettings>, GatewayError> {
        Ok(self.store.get_ip_limit_settings().await?)
    }

    /// Write the IP defaults.
    pub async fn update_ip_limit_settings(
        &self,
        settings: &IpLimitSettings,
    ) -> Result<(), GatewayError> {
        Ok(self.store.update_ip_limit_settings(settings).await?)
    }

    /// Per-user rate-limit override, if any.
    pub async fn get_user_limit_settings(
        &self,
        user_id: &str,
    ) -> Result<Option<EntityLimitRow>, GatewayError> {
        Ok(self.store.get_user_limit_settings(user_id).await?)
    }

    /// Write a per-user rate-limit override.
    pub async fn update_user_limit_settings(
        &self,
        user_id: &str,
        rate_per_second: f64,
        burst: u32,
    ) -> Result<(), GatewayError> {
        Ok(self
            .store
            .update_user_limit_settings(user_id, rate_per_second, burst)
            .await?)
    }

    /// Per-biz rate-limit override, if any.
    pub async fn get_biz_limit_settings(
        &self,
        biz: &str,
    ) -> Result<Option<EntityLimitRow>, GatewayError> {
        Ok(self.store.get_biz_limit_settings(biz).await?)
    }

    /// Write a per-biz rate-limit override.
    pub async fn update_biz_limit_settings(
        &self,
        biz: &str,
        rate_per_second: f64,
        burst: u32,
    ) -> Result<(), GatewayError> {
        Ok(self
            .store
            .update_biz_limit_settings(biz, rate_per_second, burst)
            .await?)
    }

    // -- cache management ---------------------------------------------------

    /// Drop the cached snapshot of one biz.
    pub fn invalidate_cache_for_biz(&self, biz: &str) {
        let mut cache = self.cache.lock().expect("config cache poisoned");
        cache.pop(biz);
    }

    /// Drop every cached snapshot.
    pub fn invalidate_all_caches(&self) {
        let mut cache = self.cache.lock().expect("config cache poisoned");
        cache.clear();
    }

    fn cache_get(&self, biz: &str) -> Option<BizQueryConfig> {
        let mut cache = self.cache.lock().expect("config cache poisoned");
        match cache.get(biz) {
            Some(entry) if !entry.is_expired(self.ttl) => Some(entry.config.clone()),
            Some(_) => {
                cache.pop(biz);
                None
            }
            None => None,
        }
    }

    fn cache_put(&self, biz: &str, config: BizQueryConfig) {
        let mut cache = self.cache.lock().expect("config cache poisoned");
        cache.put(
            biz.to_string(),
            CachedSnapshot {
                config,
                inserted_at: Instant::now(),
            },
        );
    }

    #[cfg(test)]
    fn cache_contains(&self, biz: &str) -> bool {
        let cache = self.cache.lock().expect("config cache poisoned");
        cache.contains(biz)
    }
}
