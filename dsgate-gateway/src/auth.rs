//! # Authentication Module
//!
//! This module provides token validation, credential checking, and the
//! login-failure lockout for the DSGate gateway.
//!
//! ## Overview
//!
//! Two concerns compose here:
//!
//! - **Token validation**: bearer tokens are JWTs signed with HS256. The
//!   claims carry the user id, username, and role; middleware injects them
//!   into the request extensions for handlers and the per-user rate gate.
//! - **Login failure lock**: a per-(IP, username) counter with a sliding
//!   five-minute TTL. After five consecutive failures a lock is written
//!   for fifteen minutes; further login attempts for that pair
//!   short-circuit to 401 without consulting the credential store. Any
//!   successful login clears the counter.
//!
//! ## First-Run Setup
//!
//! While the user table is empty the gateway exposes a setup token,
//! generated once per process and handed out by `GET /system/setup`. The
//! token must accompany the `POST` that creates the first admin; it is
//! cleared as soon as that admin exists.
//!
//! ## Passwords
//!
//! Passwords are stored as bcrypt hashes and never logged. Verification
//! failures and unknown usernames produce the same 401 so the response
//! does not leak which accounts exist.

use crate::config::AuthConfig;
use crate::gateway_error::GatewayError;
use crate::store::{SystemStore, UserRecord};
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// JWT claims for an authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// Login name
    pub username: String,
    /// Role string; `admin` unlocks the admin surface
    pub role: String,
    /// Expiration (Unix timestamp)
    pub exp: u64,
    /// Issued-at (Unix timestamp)
    pub iat: u64,
}

impl Claims {
    /// Whether these claims carry the admin role.
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Authenticated identity injected into request extensions by the auth
/// middleware.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub username: String,
    pub role: String,
}

impl From<Claims> for AuthContext {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            username: claims.username,
            role: claims.role,
        }
    }
}

#[derive(Debug)]
struct FailureCounter {
    count: u32,
    last_failure: Instant,
}

#[derive(Debug)]
struct Lockout {
    until: Instant,
}

/// Authentication service: token issue/verify, login with lockout, and
/// the first-run setup token.
pub struct AuthService {
    config: AuthConfig,
    store: SystemStore,
    failures: DashMap<String, FailureCounter>,
    lockouts: DashMap<String, Lockout>,
    setup_token: Mutex<Option<String>>,
}

impl AuthService {
    pub fn new(config: AuthConfig, store: SystemStore) -> Self {
        Self {
            config,
            store,
            failures: DashMap::new(),
            lockouts: DashMap::new(),
            setup_token: Mutex::new(None),
        }
    }

    // -- tokens -------------------------------------------------------------

    /// Issue a JWT for an account.
    pub fn issue_token(&self, user: &UserRecord) -> Result<String, GatewayError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();

        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            role: user.role.clone(),
            exp: now + self.config.token_ttl.as_secs(),
            iat: now,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_ref()),
        )
        .map_err(|e| GatewayError::Internal {
            message: format!("failed to sign token: {e}"),
        })
    }

    /// Verify a bearer token and return its claims.
    ///
    /// Validation is pinned to HS256 with expiry checking; anything else
    /// is rejected.
    pub fn verify_token(&self, token: &str) -> Result<Claims, GatewayError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        validation.algorithms = vec![jsonwebtoken::Algorithm::HS256];

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_ref()),
            &validation,
        )
        .map_err(|e| GatewayError::Unauthenticated {
            message: format!("invalid token: {e}"),
        })?;

        Ok(token_data.claims)
    }

    /// Extract the bearer token from an `Authorization` header value.
    pub fn extract_bearer(auth_header: Option<&str>) -> Option<&str> {
        auth_header.and_then(|header| header.strip_prefix("Bearer "))
    }

    // -- login with lockout -------------------------------------------------

    /// Validate credentials for `(ip, username)`.
    ///
    /// A locked pair short-circuits before the credential store is
    /// consulted. Unknown usernames and wrong passwords are
    /// indistinguishable to the caller.
    pub async fn login(
        &self,
        ip: &str,
        username: &str,
        password: &str,
    ) -> Result<(String, UserRecord), GatewayError> {
        let key = lockout_key(ip, username);

        if self.is_locked(&key) {
            return Err(GatewayError::Unauthenticated {
                message: "account temporarily locked".to_string(),
            });
        }

        let user = self.store.find_user_by_username(username).await?;
        let verified = match &user {
            Some(user) => bcrypt::verify(password, &user.password_hash).unwrap_or(false),
            None => {
                // Equalize timing between unknown users and bad passwords.
                let _ = bcrypt::verify(password, DUMMY_HASH);
                false
            }
        };

        if !verified {
            self.record_failure(&key);
            return Err(GatewayError::Unauthenticated {
                message: "invalid username or password".to_string(),
            });
        }

        self.clear_failures(&key);
        let user = user.expect("verified user exists");
        let token = self.issue_token(&user)?;
        Ok((token, user))
    }

    fn is_locked(&self, key: &str) -> bool {
        if let Some(lock) = self.lockouts.get(key) {
            if Instant::now() < lock.until {
                return true;
            }
        }
        // Expired locks are removed lazily.
        self.lockouts.remove_if(key, |_, lock| Instant::now() >= lock.until);
        false
    }

    fn record_failure(&self, key: &str) {
        let mut entry = self.failures.entry(key.to_string()).or_insert(FailureCounter {
            count: 0,
            last_failure: Instant::now(),
        });

        // Sliding TTL: a quiet period resets the streak.
        if entry.last_failure.elapsed() > self.config.failure_counter_ttl {
            entry.count = 0;
        }
        entry.count += 1;
        entry.last_failure = Instant::now();

        if entry.count >= self.config.max_login_failures {
            let until = Instant::now() + self.config.lockout_duration;
            drop(entry);
            self.failures.remove(key);
            self.lockouts.insert(key.to_string(), Lockout { until });
            tracing::warn!(key, "Login lockout engaged");
        }
    }

    fn clear_failures(&self, key: &str) {
        self.failures.remove(key);
    }

    /// Spawn the periodic cleanup of expired counters and lockouts.
    pub fn start_cleanup_task(self: &std::sync::Arc<Self>) {
        let service = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            interval.tick().await;
            loop {
                interval.tick().await;
                let counter_ttl = service.config.failure_counter_ttl;
                service
                    .failures
                    .retain(|_, counter| counter.last_failure.elapsed() <= counter_ttl);
                service
                    .lockouts
                    .retain(|_, lock| Instant::now() < lock.until);
            }
        });
    }

    // -- first-run setup ----------------------------------------------------

    /// The setup token, generated once per process.
    pub fn setup_token(&self) -> String {
        use rand::Rng;
        let mut slot = self.setup_token.lock().expect("setup token poisoned");
        slot.get_or_insert_with(|| {
            rand::thread_rng()
                .sample_iter(rand::distributions::Alphanumeric)
                .take(32)
                .map(char::from)
                .collect()
        })
        .clone()
    }

    /// Validate and consume the setup token.
    pub fn consume_setup_token(&self, presented: &str) -> Result<(), GatewayError> {
        let mut slot = self.setup_token.lock().expect("setup token poisoned");
        match slot.as_deref() {
            Some(token) if token == presented => {
                *slot = None;
                Ok(())
            }
            _ => Err(GatewayError::Unauthorized {
                message: "invalid setup token".to_string(),
            }),
        }
    }

    /// Create the first admin account.
    pub async fn create_admin(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(String, UserRecord), GatewayError> {
        let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| {
            GatewayError::Internal {
                message: format!("failed to hash password: {e}"),
            }
        })?;

        let id = format!("u-{}", Uuid::new_v4());
        self.store.create_user(&id, username, &hash, "admin").await?;
        let user = self
            .store
            .find_user_by_id(&id)
            .await?
            .ok_or_else(|| GatewayError::Internal {
                message: "admin row vanished after insert".to_string(),
            })?;

        let token = self.issue_token(&user)?;
        Ok((token, user))
    }

    #[cfg(test)]
    pub(crate) fn expire_lockouts(&self) {
        self.lockouts.clear();
        self.failures.clear();
    }
}

fn lockout_key(ip: &str, username: &str) -> String {
    format!("{ip}|{username}")
}

// A valid bcrypt hash of a throwaway string, used to equalize verify
// timing when the username is unknown.
const DUMMY_HASH: &str = "$2b$12$LJ3m4rzD1ZkHeQeKzVHQmOxAUx3uN5n9N6YJmXrUu0yJcVYBoYQce";
