//! # Rate Limiter Module
//!
//! This module implements the gateway's four-gate rate limiter: a single
//! token-bucket primitive keyed four different ways.
//!
//! ## Gates
//!
//! 1. **Global**: one process-wide bucket with configured rate/burst.
//! 2. **Per-IP**: one bucket per client IP. Defaults come from the config
//!    store's IP settings (stored per minute, converted to per second);
//!    hard-coded fallbacks apply when the store is empty.
//! 3. **Per-user**: one bucket per authenticated user id. On first sight
//!    the limiter asks the config service for a user-specific override;
//!    absent that, the authenticated-user default applies.
//! 4. **Per-biz**: one bucket per biz name extracted from the request. On
//!    first sight the limiter asks the config service for a biz-specific
//!    override; absent that, the authenticated-user default applies.
//!
//! ## Chains
//!
//! - **Full business chain**: global, per-IP, per-user, per-biz, outermost
//!   first. A request passes only when every applicable gate grants a
//!   token; gates without context (unauthenticated, no biz) are skipped.
//! - **Lightweight chain**: global and per-IP only, for system and auth
//!   routes.
//!
//! ## Eviction and Coherence
//!
//! Each keyed map runs a background task that evicts buckets idle for more
//! than fifteen minutes, every ten minutes. Admin updates to per-user or
//! per-biz limits are not pushed into live buckets; they take effect after
//! idle eviction or a restart.
//!
//! ## Concurrency
//!
//! Bucket creation for a key is racy-but-safe: when two first-sightings
//! race, the map keeps one bucket and the loser's candidate is discarded;
//! no tokens are lost from the winner.

use crate::config::RateLimitDefaults;
use crate::config_service::BizConfigService;
use crate::gateway_error::GatewayError;
use axum::http::HeaderMap;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How long a keyed bucket may sit idle before eviction.
const IDLE_TTL: Duration = Duration::from_secs(15 * 60);

/// How often the eviction tasks run.
const EVICTION_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// A single token bucket.
///
/// Tokens refill continuously at `rate` per second up to `burst`; each
/// granted request consumes one token.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: f64,
    rate: f64,
    burst: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    /// A full bucket with the given refill rate and burst capacity.
    pub fn new(rate_per_second: f64, burst: u32) -> Self {
        let now = Instant::now();
        Self {
            tokens: burst as f64,
            rate: rate_per_second,
            burst: burst as f64,
            last_refill: now,
            last_seen: now,
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_refill = now;
        self.last_seen = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

/// A map of token buckets keyed by entity (IP, user id, biz name).
#[derive(Debug, Default)]
pub struct KeyedBuckets {
    buckets: DashMap<String, Mutex<TokenBucket>>,
}

impl KeyedBuckets {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Whether a bucket already exists for this key.
    pub fn contains(&self, key: &str) -> bool {
        self.buckets.contains_key(key)
    }

    /// Take one token from the key's bucket, creating it with the given
    /// limits when absent. The entry API keeps exactly one bucket per key
    /// under racing first-sightings.
    pub fn try_acquire(&self, key: &str, rate_per_second: f64, burst: u32) -> bool {
        let entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(TokenBucket::new(rate_per_second, burst)));
        let mut bucket = entry.lock().expect("bucket lock poisoned");
        bucket.try_acquire()
    }

    /// Drop buckets idle longer than `idle_ttl`. Returns how many were
    /// removed.
    pub fn evict_idle(&self, idle_ttl: Duration) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            bucket
                .lock()
                .map(|b| b.idle_for() <= idle_ttl)
                .unwrap_or(false)
        });
        before - self.buckets.len()
    }

    /// Current number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the map holds no buckets.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Resolved rate/burst pair for one entity.
#[derive(Debug, Clone, Copy)]
struct Limits {
    rate_per_second: f64,
    burst: u32,
}

/// The four-gate rate limiter.
pub struct RateLimiter {
    global: Mutex<TokenBucket>,
    per_ip: Arc<KeyedBuckets>,
    per_user: Arc<KeyedBuckets>,
    per_biz: Arc<KeyedBuckets>,
    ip_limits: Limits,
    user_default: Limits,
    config_service: Arc<BizConfigService>,
}

impl RateLimiter {
    /// Build the limiter, loading IP defaults from the config store.
    ///
    /// The stored per-minute IP rate is converted to per-second here; the
    /// configured fallbacks apply when the store holds no row.
    pub async fn new(
        defaults: &RateLimitDefaults,
        config_service: Arc<BizConfigService>,
    ) -> Result<Self, GatewayError> {
        let ip_limits = match config_service.get_ip_limit_settings().await? {
            Some(settings) => Limits {
                rate_per_second: settings.rate_per_minute / 60.0,
                burst: settings.burst,
            },
            None => Limits {
                rate_per_second: defaults.ip_rate_per_minute / 60.0,
                burst: defaults.ip_burst,
            },
        };

        Ok(Self {
            global: Mutex::new(TokenBucket::new(
                defaults.global_rate_per_second,
                defaults.global_burst,
            )),
            per_ip: Arc::new(KeyedBuckets::new()),
            per_user: Arc::new(KeyedBuckets::new()),
            per_biz: Arc::new(KeyedBuckets::new()),
            ip_limits,
            user_default: Limits {
                rate_per_second: defaults.user_rate_per_second,
                burst: defaults.user_burst,
            },
            config_service,
        })
    }

    /// Spawn the idle-eviction task for each keyed map.
    pub fn start_eviction_tasks(self: &Arc<Self>) {
        for (name, map) in [
            ("per_ip", self.per_ip.clone()),
            ("per_user", self.per_user.clone()),
            ("per_biz", self.per_biz.clone()),
        ] {
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(EVICTION_INTERVAL);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let evicted = map.evict_idle(IDLE_TTL);
                    if evicted > 0 {
                        tracing::debug!(
                            gate = name,
                            evicted,
                            remaining = map.len(),
                            "Evicted idle rate-limit buckets"
                        );
                    }
                }
            });
        }
    }

    /// Global gate.
    pub fn check_global(&self) -> Result<(), GatewayError> {
        let mut bucket = self.global.lock().expect("global bucket poisoned");
        if bucket.try_acquire() {
            Ok(())
        } else {
            Err(GatewayError::RateLimited { gate: "global" })
        }
    }

    /// Per-IP gate.
    pub fn check_ip(&self, ip: &str) -> Result<(), GatewayError> {
        if self
            .per_ip
            .try_acquire(ip, self.ip_limits.rate_per_second, self.ip_limits.burst)
        {
            Ok(())
        } else {
            Err(GatewayError::RateLimited { gate: "per_ip" })
        }
    }

    /// Per-user gate. Limits are fetched from the config service on first
    /// sight of the user and cached until eviction.
    pub async fn check_user(&self, user_id: &str) -> Result<(), GatewayError> {
        let limits = if self.per_user.contains(user_id) {
            // Bucket already holds its limits; values passed here only
            // matter on creation.
            self.user_default
        } else {
            self.lookup_user_limits(user_id).await
        };

        if self
            .per_user
            .try_acquire(user_id, limits.rate_per_second, limits.burst)
        {
            Ok(())
        } else {
            Err(GatewayError::RateLimited { gate: "per_user" })
        }
    }

    /// Per-biz gate. Limits are fetched from the config service on first
    /// sight of the biz; absent an override, the authenticated-user
    /// default applies.
    pub async fn check_biz(&self, biz: &str) -> Result<(), GatewayError> {
        let limits = if self.per_biz.contains(biz) {
            self.user_default
        } else {
            self.lookup_biz_limits(biz).await
        };

        if self
            .per_biz
            .try_acquire(biz, limits.rate_per_second, limits.burst)
        {
            Ok(())
        } else {
            Err(GatewayError::RateLimited { gate: "per_biz" })
        }
    }

    async fn lookup_user_limits(&self, user_id: &str) -> Limits {
        match self.config_service.get_user_limit_settings(user_id).await {
            Ok(Some(row)) => Limits {
                rate_per_second: row.rate_per_second,
                burst: row.burst,
            },
            Ok(None) => self.user_default,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to load user rate limits, using default");
                self.user_default
            }
        }
    }

    async fn lookup_biz_limits(&self, biz: &str) -> Limits {
        match self.config_service.get_biz_limit_settings(biz).await {
            Ok(Some(row)) => Limits {
                rate_per_second: row.rate_per_second,
                burst: row.burst,
            },
            Ok(None) => self.user_default,
            Err(e) => {
                tracing::warn!(biz, error = %e, "Failed to load biz rate limits, using default");
                self.user_default
            }
        }
    }

    /// The lightweight chain: global then per-IP.
    pub fn check_lightweight(&self, ip: &str) -> Result<(), GatewayError> {
        self.check_global()?;
        self.check_ip(ip)
    }

    /// The full business chain: global, per-IP, per-user, per-biz.
    ///
    /// `user_id` is absent for unauthenticated requests and `biz` for
    /// requests without biz context; those gates are skipped.
    pub async fn check_full(
        &self,
        ip: &str,
        user_id: Option<&str>,
        biz: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.check_global()?;
        self.check_ip(ip)?;
        if let Some(user_id) = user_id {
            self.check_user(user_id).await?;
        }
        if let Some(biz) = biz {
            self.check_biz(biz).await?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn bucket_counts(&self) -> (usize, usize, usize) {
        (self.per_ip.len(), self.per_user.len(), self.per_biz.len())
    }

    #[cfg(test)]
    pub(crate) fn evict_all_idle(&self, idle_ttl: Duration) -> usize {
        self.per_ip.evict_idle(idle_ttl)
            + self.per_user.evict_idle(idle_ttl)
            + self.per_biz.evict_idle(idle_ttl)
    }
}

/// Determine the client IP: first `X-Forwarded-For` entry, then
/// `X-Real-IP`, then the socket remote address when known.
pub fn client_ip(headers: &HeaderMap, remote: Option<std::net::SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    remote
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
