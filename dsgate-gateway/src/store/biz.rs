//! Business-group configuration rows.
//!
//! Four tables describe what a biz exposes: an overall-settings row, one
//! row per configured table (searchability plus write permissions), one
//! row per configured field, and one row per named view (the view config
//! itself is a JSON blob). Multi-row replacements run in a transaction so
//! readers never observe a partial set.

use super::SystemStore;

/// Overall settings row for one biz.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OverallSettingsRow {
    /// Business-group name
    pub biz_name: String,
    /// Whether unauthenticated discovery may list this biz
    pub is_publicly_searchable: bool,
    /// Table queried when a request names none
    pub default_query_table: Option<String>,
}

/// Per-table settings row: searchability and write permissions.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TableSettingsRow {
    pub biz_name: String,
    pub table_name: String,
    pub is_searchable: bool,
    pub allow_create: bool,
    pub allow_update: bool,
    pub allow_delete: bool,
}

/// Per-field settings row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FieldSettingRow {
    pub biz_name: String,
    pub table_name: String,
    pub field_name: String,
    pub is_searchable: bool,
    pub is_returnable: bool,
    pub data_type: String,
}

/// One named view; `config` is the serialized view definition.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ViewRow {
    pub biz_name: String,
    pub table_name: String,
    pub view_name: String,
    pub config: String,
}

impl SystemStore {
    /// Overall settings for one biz; `None` means "not configured".
    pub async fn get_overall_settings(
        &self,
        biz: &str,
    ) -> Result<Option<OverallSettingsRow>, sqlx::Error> {
        sqlx::query_as::<_, OverallSettingsRow>(
            "SELECT biz_name, is_publicly_searchable, default_query_table \
             FROM biz_overall_settings WHERE biz_name = ?",
        )
        .bind(biz)
        .fetch_optional(self.pool())
        .await
    }

    /// Create or replace the overall-settings row for one biz.
    pub async fn upsert_overall_settings(
        &self,
        biz: &str,
        is_publicly_searchable: bool,
        default_query_table: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO biz_overall_settings (biz_name, is_publicly_searchable, default_query_table) \
             VALUES (?, ?, ?) \
             ON CONFLICT (biz_name) DO UPDATE SET \
                 is_publicly_searchable = excluded.is_publicly_searchable, \
                 default_query_table = excluded.default_query_table",
        )
        .bind(biz)
        .bind(is_publicly_searchable)
        .bind(default_query_table)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// All table rows for one biz.
    pub async fn get_table_settings(
        &self,
        biz: &str,
    ) -> Result<Vec<TableSettingsRow>, sqlx::Error> {
        sqlx::query_as::<_, TableSettingsRow>(
            "SELECT biz_name, table_name, is_searchable, allow_create, allow_update, allow_delete \
             FROM biz_searchable_tables WHERE biz_name = ? ORDER BY table_name",
        )
        .bind(biz)
        .fetch_all(self.pool())
        .await
    }

    /// Replace the set of searchable tables for one biz.
    ///
    /// Listed tables are upserted with the given searchability; tables not
    /// listed are deleted together with their field settings. Write
    /// permissions on retained rows are preserved.
    pub async fn replace_searchable_tables(
        &self,
        biz: &str,
        tables: &[(String, bool)],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let keep: Vec<&str> = tables.iter().map(|(name, _)| name.as_str()).collect();
        let existing: Vec<(String,)> =
            sqlx::query_as("SELECT table_name FROM biz_searchable_tables WHERE biz_name = ?")
                .bind(biz)
                .fetch_all(&mut *tx)
                .await?;

        for (table_name,) in &existing {
            if !keep.contains(&table_name.as_str()) {
                sqlx::query(
                    "DELETE FROM biz_searchable_tables WHERE biz_name = ? AND table_name = ?",
                )
                .bind(biz)
                .bind(table_name)
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    "DELETE FROM biz_field_settings WHERE biz_name = ? AND table_name = ?",
                )
                .bind(biz)
                .bind(table_name)
                .execute(&mut *tx)
                .await?;
            }
        }

        for (table_name, is_searchable) in tables {
            sqlx::query(
                "INSERT INTO biz_searchable_tables (biz_name, table_name, is_searchable) \
                 VALUES (?, ?, ?) \
                 ON CONFLICT (biz_name, table_name) DO UPDATE SET \
                     is_searchable = excluded.is_searchable",
            )
            .bind(biz)
            .bind(table_name)
            .bind(is_searchable)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    /// Set write permissions for one table, creating the row if absent.
    pub async fn update_table_write_permissions(
        &self,
        biz: &str,
        table: &str,
        allow_create: bool,
        allow_update: bool,
        allow_delete: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO biz_searchable_tables \
                 (biz_name, table_name, is_searchable, allow_create, allow_update, allow_delete) \
             VALUES (?, ?, 1, ?, ?, ?) \
             ON CONFLICT (biz_name, table_name) DO UPDATE SET \
                 allow_create = excluded.allow_create, \
                 allow_update = excluded.allow_update, \
                 allow_delete = excluded.allow_delete",
        )
        .bind(biz)
        .bind(table)
        .bind(allow_create)
        .bind(allow_update)
        .bind(allow_delete)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// All field rows for one biz, across all its tables.
    pub async fn get_field_settings(&self, biz: &str) -> Result<Vec<FieldSettingRow>, sqlx::Error> {
        sqlx::query_as::<_, FieldSettingRow>(
            "SELECT biz_name, table_name, field_name, is_searchable, is_returnable, data_type \
             FROM biz_field_settings WHERE biz_name = ? ORDER BY table_name, field_name",
        )
        .bind(biz)
        .fetch_all(self.pool())
        .await
    }

    /// Replace all field rows of one table in a single transaction.
    pub async fn replace_table_field_settings(
        &self,
        biz: &str,
        table: &str,
        fields: &[(String, bool, bool, String)],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM biz_field_settings WHERE biz_name = ? AND table_name = ?")
            .bind(biz)
            .bind(table)
            .execute(&mut *tx)
            .await?;

        for (field_name, is_searchable, is_returnable, data_type) in fields {
            sqlx::query(
                "INSERT INTO biz_field_settings \
                     (biz_name, table_name, field_name, is_searchable, is_returnable, data_type) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(biz)
            .bind(table)
            .bind(field_name)
            .bind(is_searchable)
            .bind(is_returnable)
            .bind(data_type)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    /// All view rows of one biz.
    pub async fn get_views_for_biz(&self, biz: &str) -> Result<Vec<ViewRow>, sqlx::Error> {
        sqlx::query_as::<_, ViewRow>(
            "SELECT biz_name, table_name, view_name, config \
             FROM biz_view_definitions WHERE biz_name = ? ORDER BY table_name, view_name",
        )
        .bind(biz)
        .fetch_all(self.pool())
        .await
    }

    /// All view rows of one table.
    pub async fn get_views_for_table(
        &self,
        biz: &str,
        table: &str,
    ) -> Result<Vec<ViewRow>, sqlx::Error> {
        sqlx::query_as::<_, ViewRow>(
            "SELECT biz_name, table_name, view_name, config \
             FROM biz_view_definitions WHERE biz_name = ? AND table_name = ? ORDER BY view_name",
        )
        .bind(biz)
        .bind(table)
        .fetch_all(self.pool())
        .await
    }

    /// Delete every view of one biz and reinsert the given set atomically.
    pub async fn replace_all_views_for_biz(
        &self,
        biz: &str,
        views: &[(String, String, String)],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM biz_view_definitions WHERE biz_name = ?")
            .bind(biz)
            .execute(&mut *tx)
            .await?;

        for (table_name, view_name, config) in views {
            sqlx::query(
                "INSERT INTO biz_view_definitions (biz_name, table_name, view_name, config) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(biz)
            .bind(table_name)
            .bind(view_name)
            .bind(config)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }
}
