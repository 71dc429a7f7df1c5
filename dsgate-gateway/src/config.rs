//! # Configuration Management Module
//!
//! This module provides configuration management for the DSGate gateway.
//! It handles loading, validation, and environment variable overrides for
//! all gateway settings.
//!
//! ## Overview
//!
//! The configuration system supports:
//! - TOML-based configuration files
//! - Environment variable overrides (`DSGATE_*`)
//! - Runtime validation and schema checking
//! - Defaults suitable for local development
//!
//! ## Configuration Structure
//!
//! The main `Config` struct contains all gateway settings:
//!
//! - **Server**: HTTP server settings (host, port, log level, timeouts)
//! - **Database**: path of the single system SQLite file
//! - **Plugin management**: install directory, instance port range, and
//!   the list of plugin repositories
//! - **Rate limiting**: process-wide fallback defaults used when the
//!   config store holds no overrides
//! - **Auth**: JWT secret, token lifetime, and login lockout tuning
//! - **Metrics**: in-memory request metrics retention
//!
//! ## Configuration File Example
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! log_level = "info"
//! timeout = "30s"
//!
//! [database]
//! path = "data/dsgate.db"
//!
//! [plugin_management]
//! install_directory = "data/plugins"
//! instance_port_range = [50100, 50200]
//!
//! [[plugin_management.repositories]]
//! name = "official"
//! url = "https://plugins.example.com/manifest.json"
//! enabled = true
//! ```
//!
//! ## Environment Variables
//!
//! - `DSGATE_HOST`: override server host
//! - `DSGATE_PORT`: override server port
//! - `DSGATE_LOG_LEVEL`: override logging level
//! - `DSGATE_TIMEOUT`: override request timeout (e.g. `45s`)
//! - `DSGATE_DATABASE_PATH`: override the system database path
//! - `DSGATE_JWT_SECRET`: override the JWT signing secret
//!
//! Relative filesystem paths are resolved against the gateway's instance
//! root (the directory of the config file, or the working directory when
//! no file is used).

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration struct for the DSGate gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration settings
    #[serde(default)]
    pub server: ServerConfig,
    /// System database location
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Plugin install directory, port range, and repositories
    #[serde(default)]
    pub plugin_management: PluginManagementConfig,
    /// Fallback rate-limit defaults (the config store takes precedence)
    #[serde(default)]
    pub rate_limiting: RateLimitDefaults,
    /// Authentication settings
    #[serde(default)]
    pub auth: AuthConfig,
    /// Metrics collection settings
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// HTTP server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind the server to
    pub host: String,
    /// Port number to listen on
    pub port: u16,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Request timeout duration
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// How long to drain in-flight requests on shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// System database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite file; created on first start
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/dsgate.db"),
        }
    }
}

/// Plugin lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManagementConfig {
    /// Root under which artifacts unpack to `<id>/<version>/`
    pub install_directory: PathBuf,
    /// Inclusive TCP port range instances are allocated from
    pub instance_port_range: (u16, u16),
    /// Plugin repositories polled by the catalog refresher
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
    /// Interval between catalog refresh passes
    #[serde(with = "duration_serde", default = "default_refresh_interval")]
    pub refresh_interval: Duration,
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(3600)
}

impl Default for PluginManagementConfig {
    fn default() -> Self {
        Self {
            install_directory: PathBuf::from("data/plugins"),
            instance_port_range: (50100, 50200),
            repositories: Vec::new(),
            refresh_interval: default_refresh_interval(),
        }
    }
}

/// One plugin repository entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Display name, used in logs
    pub name: String,
    /// Manifest URL; the scheme selects the downloader
    pub url: String,
    /// Disabled repositories are skipped by the refresher
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Fallback rate-limit defaults.
///
/// These apply only when the config store has no row for the entity; the
/// store-held values always win. The IP default is stored per minute and
/// converted to per-second by the limiter on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitDefaults {
    /// Global gate: requests per second across the whole process
    pub global_rate_per_second: f64,
    /// Global gate: burst size
    pub global_burst: u32,
    /// Per-IP fallback: requests per minute
    pub ip_rate_per_minute: f64,
    /// Per-IP fallback: burst size
    pub ip_burst: u32,
    /// Authenticated-user default: requests per second
    pub user_rate_per_second: f64,
    /// Authenticated-user default: burst size
    pub user_burst: u32,
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self {
            global_rate_per_second: 500.0,
            global_burst: 1000,
            ip_rate_per_minute: 300.0,
            ip_burst: 30,
            user_rate_per_second: 10.0,
            user_burst: 20,
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// JWT signing secret; overridden by `DSGATE_JWT_SECRET`
    pub jwt_secret: String,
    /// Issued-token lifetime
    #[serde(with = "duration_serde")]
    pub token_ttl: Duration,
    /// Consecutive login failures before a lockout is written
    pub max_login_failures: u32,
    /// Sliding TTL of the failure counter
    #[serde(with = "duration_serde")]
    pub failure_counter_ttl: Duration,
    /// How long a locked (ip, username) pair stays locked
    #[serde(with = "duration_serde")]
    pub lockout_duration: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dsgate-dev-secret".to_string(),
            token_ttl: Duration::from_secs(24 * 3600),
            max_login_failures: 5,
            failure_counter_ttl: Duration::from_secs(300),
            lockout_duration: Duration::from_secs(900),
        }
    }
}

/// Configuration for metrics collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether request metrics are recorded
    pub enabled: bool,
    /// Maximum number of request samples kept in memory
    pub max_requests: usize,
    /// How long to retain samples
    #[serde(with = "duration_serde")]
    pub retention_duration: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 10_000,
            retention_duration: Duration::from_secs(24 * 3600),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            plugin_management: PluginManagementConfig::default(),
            rate_limiting: RateLimitDefaults::default(),
            auth: AuthConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, apply environment overrides,
    /// and resolve relative paths against the file's directory.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {path}: {e}"))?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides()?;

        let root = Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_paths(&root);

        config.validate()?;
        Ok(config)
    }

    /// Resolve relative filesystem paths against the instance root.
    pub fn resolve_paths(&mut self, root: &Path) {
        if self.database.path.is_relative() {
            self.database.path = root.join(&self.database.path);
        }
        if self.plugin_management.install_directory.is_relative() {
            self.plugin_management.install_directory =
                root.join(&self.plugin_management.install_directory);
        }
    }

    /// Validate configuration constraints.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("server host cannot be empty"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server port must be between 1 and 65535"));
        }
        if self.server.max_body_size == 0 {
            return Err(anyhow::anyhow!("max body size cannot be 0"));
        }
        if self.server.timeout.as_secs() == 0 {
            return Err(anyhow::anyhow!("request timeout cannot be 0"));
        }

        let (lo, hi) = self.plugin_management.instance_port_range;
        if lo == 0 || hi < lo {
            return Err(anyhow::anyhow!(
                "instance port range must be a non-empty range of valid ports, got [{lo}, {hi}]"
            ));
        }

        for repo in &self.plugin_management.repositories {
            if repo.name.is_empty() {
                return Err(anyhow::anyhow!("repository name cannot be empty"));
            }
            if !repo.url.contains("://") {
                return Err(anyhow::anyhow!(
                    "repository url must carry a scheme: {}",
                    repo.url
                ));
            }
        }

        if self.rate_limiting.global_rate_per_second <= 0.0
            || self.rate_limiting.ip_rate_per_minute <= 0.0
            || self.rate_limiting.user_rate_per_second <= 0.0
        {
            return Err(anyhow::anyhow!("rate-limit defaults must be positive"));
        }

        if self.auth.max_login_failures == 0 {
            return Err(anyhow::anyhow!("max login failures cannot be 0"));
        }

        if self.metrics.enabled && self.metrics.max_requests == 0 {
            return Err(anyhow::anyhow!(
                "max requests cannot be 0 when metrics is enabled"
            ));
        }

        Ok(())
    }

    /// Apply `DSGATE_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("DSGATE_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }

        if let Ok(port_str) = env::var("DSGATE_PORT") {
            let port: u16 = port_str
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid DSGATE_PORT: {port_str}"))?;
            if port > 0 {
                self.server.port = port;
            }
        }

        if let Ok(level) = env::var("DSGATE_LOG_LEVEL") {
            if !level.is_empty() {
                self.server.log_level = level;
            }
        }

        if let Ok(timeout) = env::var("DSGATE_TIMEOUT") {
            self.server.timeout = parse_duration(&timeout)?;
        }

        if let Ok(path) = env::var("DSGATE_DATABASE_PATH") {
            if !path.is_empty() {
                self.database.path = PathBuf::from(path);
            }
        }

        if let Ok(secret) = env::var("DSGATE_JWT_SECRET") {
            if !secret.is_empty() {
                self.auth.jwt_secret = secret;
            }
        }

        Ok(())
    }
}

/// Parse a human-readable duration string (`500ms`, `30s`, `5m`, `2h`).
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow::anyhow!("empty duration"));
    }

    let (value, unit) = s.split_at(s.find(|c: char| c.is_alphabetic()).unwrap_or(s.len()));
    let value: u64 = value
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid duration value: {s}"))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(anyhow::anyhow!("invalid duration unit: {s}")),
    }
}

/// Serde helpers storing durations as human-readable strings.
pub mod duration_serde {
    use super::parse_duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let secs = duration.as_secs();
        let rendered = if duration.subsec_millis() > 0 {
            format!("{}ms", duration.as_millis())
        } else if secs % 3600 == 0 && secs != 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 && secs != 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        };
        rendered.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
