//! User account rows.
//!
//! The gateway stores only what the auth gate needs: a server-minted id,
//! a unique username, a bcrypt password hash, and a role string. The
//! first-run setup flow keys off [`SystemStore::count_users`].

use super::SystemStore;
use chrono::{DateTime, Utc};

/// One user account row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    /// Server-minted user id
    pub id: String,
    /// Unique login name
    pub username: String,
    /// bcrypt hash of the password
    pub password_hash: String,
    /// Role string; `admin` unlocks the admin surface
    pub role: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl SystemStore {
    /// Total number of accounts; zero means the gateway needs first-run setup.
    pub async fn count_users(&self) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    /// Insert a new account. Fails on duplicate usernames.
    pub async fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, role, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(username)
        .bind(password_hash)
        .bind(role)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Look up an account by login name.
    pub async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, sqlx::Error> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, password_hash, role, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.pool())
        .await
    }

    /// Look up an account by id.
    pub async fn find_user_by_id(&self, id: &str) -> Result<Option<UserRecord>, sqlx::Error> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, password_hash, role, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
    }
}
