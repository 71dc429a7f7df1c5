//! Rate-limit settings rows.
//!
//! The IP defaults are a process-wide singleton stored as a JSON value in
//! `global_settings`; per-user and per-biz overrides are one row per
//! entity. The rate limiter reads these lazily on first sight of an
//! entity and caches the resulting bucket at its own layer.

use super::SystemStore;
use serde::{Deserialize, Serialize};

const IP_LIMIT_SETTINGS_KEY: &str = "ip_limit_settings";

/// Process-wide per-IP defaults.
///
/// The stored rate is per minute; the limiter converts to per-second when
/// it builds buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpLimitSettings {
    /// Requests per minute allowed per client IP
    pub rate_per_minute: f64,
    /// Burst size per client IP
    pub burst: u32,
}

/// Per-user or per-biz override row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntityLimitRow {
    /// User id or biz name, depending on the table
    pub entity: String,
    /// Requests per second
    pub rate_per_second: f64,
    /// Burst size
    pub burst: u32,
}

impl SystemStore {
    /// Read the stored IP defaults; `None` when never written.
    pub async fn get_ip_limit_settings(&self) -> Result<Option<IpLimitSettings>, sqlx::Error> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM global_settings WHERE key = ?")
                .bind(IP_LIMIT_SETTINGS_KEY)
                .fetch_optional(self.pool())
                .await?;

        match row {
            Some((value,)) => serde_json::from_str(&value).map(Some).map_err(|e| {
                sqlx::Error::Decode(
                    format!("corrupt {IP_LIMIT_SETTINGS_KEY} value: {e}").into(),
                )
            }),
            None => Ok(None),
        }
    }

    /// Write the IP defaults.
    pub async fn update_ip_limit_settings(
        &self,
        settings: &IpLimitSettings,
    ) -> Result<(), sqlx::Error> {
        let value = serde_json::to_string(settings)
            .map_err(|e| sqlx::Error::Encode(e.to_string().into()))?;
        sqlx::query(
            "INSERT INTO global_settings (key, value) VALUES (?, ?) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(IP_LIMIT_SETTINGS_KEY)
        .bind(value)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Per-user override, if one exists.
    pub async fn get_user_limit_settings(
        &self,
        user_id: &str,
    ) -> Result<Option<EntityLimitRow>, sqlx::Error> {
        sqlx::query_as::<_, EntityLimitRow>(
            "SELECT user_id AS entity, rate_per_second, burst \
             FROM user_rate_limits WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
    }

    /// Create or replace a per-user override.
    pub async fn update_user_limit_settings(
        &self,
        user_id: &str,
        rate_per_second: f64,
        burst: u32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO user_rate_limits (user_id, rate_per_second, burst) VALUES (?, ?, ?) \
             ON CONFLICT (user_id) DO UPDATE SET \
                 rate_per_second = excluded.rate_per_second, burst = excluded.burst",
        )
        .bind(user_id)
        .bind(rate_per_second)
        .bind(burst)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Per-biz override, if one exists.
    pub async fn get_biz_limit_settings(
        &self,
        biz: &str,
    ) -> Result<Option<EntityLimitRow>, sqlx::Error> {
        sqlx::query_as::<_, EntityLimitRow>(
            "SELECT biz_name AS entity, rate_per_second, burst \
             FROM biz_rate_limits WHERE biz_name = ?",
        )
        .bind(biz)
        .fetch_optional(self.pool())
        .await
    }

    /// Create or replace a per-biz override.
    pub async fn update_biz_limit_settings(
        &self,
        biz: &str,
        rate_per_second: f64,
        burst: u32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO biz_rate_limits (biz_name, rate_per_second, burst) VALUES (?, ?, ?) \
             ON CONFLICT (biz_name) DO UPDATE SET \
                 rate_per_second = excluded.rate_per_second, burst = excluded.burst",
        )
        .bind(biz)
        .bind(rate_per_second)
        .bind(burst)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ip_settings_roundtrip() {
        let store = SystemStore::connect_in_memory().await.unwrap();
        assert!(store.get_ip_limit_settings().await.unwrap().is_none());

        let settings = IpLimitSettings {
            rate_per_minute: 120.0,
            burst: 20,
        };
        store.update_ip_limit_settings(&settings).await.unwrap();
        assert_eq!(
            store.get_ip_limit_settings().await.unwrap(),
            Some(settings)
        );
    }

    #[tokio::test]
    async fn test_entity_overrides() {
        let store = SystemStore::connect_in_memory().await.unwrap();

        assert!(store.get_user_limit_settings("u-1").await.unwrap().is_none());
        store
            .update_user_limit_settings("u-1", 5.0, 10)
            .await
            .unwrap();
        let row = store
            .get_user_limit_settings("u-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.rate_per_second, 5.0);
        assert_eq!(row.burst, 10);

        store
            .update_biz_limit_settings("library", 2.0, 2)
            .await
            .unwrap();
        store
            .update_biz_limit_settings("library", 4.0, 8)
            .await
            .unwrap();
        let row = store
            .get_biz_limit_settings("library")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.rate_per_second, 4.0);
        assert_eq!(row.burst, 8);
    }
}
