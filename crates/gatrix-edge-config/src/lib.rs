//! Configuration for the Gatrix edge server.
//!
//! The edge process is configured exclusively through environment
//! variables (a `.env` file is loaded by the binary before this crate
//! runs). Configuration errors are fatal: the process reports them and
//! exits rather than starting with a partially valid setup.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use url::Url;

/// Offset between the public listener and the internal admin listener.
/// The internal listener must never be exposed publicly; a fixed offset
/// keeps the pair deployable from a single port value.
pub const INTERNAL_PORT_OFFSET: u16 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    InvalidVar { name: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidVar {
            name,
            reason: reason.into(),
        }
    }
}

/// How the cache is kept fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMethod {
    /// Redis pub/sub deltas with full resync on reconnect.
    Event,
    /// Periodic full refresh of every tracked environment.
    Polling,
    /// No automatic freshness; only forced refresh mutates the cache.
    Manual,
}

impl SyncMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Polling => "polling",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for SyncMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which environments this instance mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentSelection {
    /// Track every environment the backend reports, reconciling the set
    /// at runtime as environments are created and deleted.
    All,
    /// Track a fixed, explicit set of environment ids.
    Explicit(Vec<String>),
}

impl EnvironmentSelection {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw == "*" {
            return Ok(Self::All);
        }
        let ids: Vec<String> = raw
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();
        if ids.is_empty() || ids.iter().any(String::is_empty) {
            return Err(ConfigError::invalid(
                "EDGE_ENVIRONMENTS",
                format!("expected '*' or comma-separated ids, got {raw:?}"),
            ));
        }
        Ok(Self::Explicit(ids))
    }
}

/// Scope of the mandatory resync after an event-transport reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResyncScope {
    /// Refresh every tracked environment. Expensive but unconditionally
    /// correct; missed events cannot be replayed.
    Full,
    /// Refresh only environments whose last successful refresh predates
    /// the disconnect.
    Stale,
}

/// Redis connection settings, used for the pub/sub event transport.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

impl RedisConfig {
    /// Connection URL in the form `redis://[:password@]host:port/db`.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{password}@{}:{}/{}",
                self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub port: u16,
    pub metrics_port: u16,
    pub bypass_token: String,
    pub application_name: String,
    pub environments: EnvironmentSelection,
    pub backend_url: Url,
    pub backend_timeout: Duration,
    pub sync_method: SyncMethod,
    pub polling_interval: Duration,
    /// Readiness flips to not-ready once the oldest environment's last
    /// refresh exceeds this. Zero disables the check.
    pub staleness_threshold: Duration,
    pub resync_scope: ResyncScope,
    pub log_level: String,
    pub redis: RedisConfig,
}

fn default_port() -> u16 {
    3400
}
fn default_metrics_port() -> u16 {
    9400
}
fn default_application_name() -> String {
    "gatrix-edge".into()
}
fn default_backend_timeout_ms() -> u64 {
    10_000
}
fn default_polling_interval_ms() -> u64 {
    30_000
}
fn default_staleness_threshold_ms() -> u64 {
    300_000
}
fn default_log_level() -> String {
    "info".into()
}
fn default_redis_host() -> String {
    "localhost".into()
}
fn default_redis_port() -> u16 {
    6379
}

impl EdgeConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary lookup. The seam tests use to
    /// drive parsing without touching process-global state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());

        let port = parse_or(get("EDGE_PORT"), "EDGE_PORT", default_port())?;
        let metrics_port = parse_or(
            get("EDGE_METRICS_PORT"),
            "EDGE_METRICS_PORT",
            default_metrics_port(),
        )?;

        let bypass_token = get("EDGE_BYPASS_TOKEN")
            .ok_or(ConfigError::MissingVar("EDGE_BYPASS_TOKEN"))?;

        let application_name =
            get("EDGE_APPLICATION_NAME").unwrap_or_else(default_application_name);

        let environments = EnvironmentSelection::parse(
            &get("EDGE_ENVIRONMENTS").ok_or(ConfigError::MissingVar("EDGE_ENVIRONMENTS"))?,
        )?;

        let backend_url_raw = get("GATRIX_URL").ok_or(ConfigError::MissingVar("GATRIX_URL"))?;
        let backend_url = Url::parse(&backend_url_raw)
            .map_err(|e| ConfigError::invalid("GATRIX_URL", e.to_string()))?;

        let backend_timeout = Duration::from_millis(parse_or(
            get("BACKEND_TIMEOUT_MS"),
            "BACKEND_TIMEOUT_MS",
            default_backend_timeout_ms(),
        )?);

        let sync_method = match get("CACHE_SYNC_METHOD").as_deref() {
            None | Some("event") => SyncMethod::Event,
            Some("polling") => SyncMethod::Polling,
            Some("manual") => SyncMethod::Manual,
            Some(other) => {
                return Err(ConfigError::invalid(
                    "CACHE_SYNC_METHOD",
                    format!("expected event|polling|manual, got {other:?}"),
                ));
            }
        };

        let polling_interval_ms = parse_or(
            get("CACHE_POLLING_INTERVAL_MS"),
            "CACHE_POLLING_INTERVAL_MS",
            default_polling_interval_ms(),
        )?;

        let staleness_threshold = Duration::from_millis(parse_or(
            get("CACHE_STALENESS_THRESHOLD_MS"),
            "CACHE_STALENESS_THRESHOLD_MS",
            default_staleness_threshold_ms(),
        )?);

        let resync_scope = match get("CACHE_RESYNC_SCOPE").as_deref() {
            None | Some("full") => ResyncScope::Full,
            Some("stale") => ResyncScope::Stale,
            Some(other) => {
                return Err(ConfigError::invalid(
                    "CACHE_RESYNC_SCOPE",
                    format!("expected full|stale, got {other:?}"),
                ));
            }
        };

        let log_level = get("LOG_LEVEL").unwrap_or_else(default_log_level);

        let redis = RedisConfig {
            host: get("REDIS_HOST").unwrap_or_else(default_redis_host),
            port: parse_or(get("REDIS_PORT"), "REDIS_PORT", default_redis_port())?,
            password: get("REDIS_PASSWORD"),
            db: parse_or(get("REDIS_DB"), "REDIS_DB", 0)?,
        };

        let cfg = Self {
            port,
            metrics_port,
            bypass_token,
            application_name,
            environments,
            backend_url,
            backend_timeout,
            sync_method,
            polling_interval: Duration::from_millis(polling_interval_ms),
            staleness_threshold,
            resync_scope,
            log_level,
            redis,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::invalid("EDGE_PORT", "must be > 0"));
        }
        if self.port.checked_add(INTERNAL_PORT_OFFSET).is_none() {
            return Err(ConfigError::invalid(
                "EDGE_PORT",
                format!("must leave room for the +{INTERNAL_PORT_OFFSET} internal listener"),
            ));
        }
        if self.polling_interval < Duration::from_millis(1_000) {
            return Err(ConfigError::invalid(
                "CACHE_POLLING_INTERVAL_MS",
                "must be >= 1000",
            ));
        }
        if self.backend_timeout.is_zero() {
            return Err(ConfigError::invalid("BACKEND_TIMEOUT_MS", "must be > 0"));
        }
        let level = self.log_level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&level.as_str()) {
            return Err(ConfigError::invalid(
                "LOG_LEVEL",
                format!("must be one of {valid_levels:?}"),
            ));
        }
        Ok(())
    }

    pub fn public_addr(&self) -> SocketAddr {
        SocketAddr::from((IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port))
    }

    pub fn internal_addr(&self) -> SocketAddr {
        SocketAddr::from((
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            self.port + INTERNAL_PORT_OFFSET,
        ))
    }

    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::from((IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.metrics_port))
    }

    /// Whether the staleness readiness policy is active.
    pub fn staleness_check_enabled(&self) -> bool {
        !self.staleness_threshold.is_zero()
    }
}

fn parse_or<T>(value: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(name, e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("EDGE_BYPASS_TOKEN", "secret"),
            ("EDGE_ENVIRONMENTS", "dev,qa"),
            ("GATRIX_URL", "http://backend:5000"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<EdgeConfig, ConfigError> {
        EdgeConfig::from_lookup(|name| env.get(name).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply() {
        let cfg = load(&base_env()).unwrap();
        assert_eq!(cfg.port, 3400);
        assert_eq!(cfg.metrics_port, 9400);
        assert_eq!(cfg.internal_addr().port(), 3410);
        assert_eq!(cfg.sync_method, SyncMethod::Event);
        assert_eq!(cfg.polling_interval, Duration::from_secs(30));
        assert_eq!(cfg.staleness_threshold, Duration::from_secs(300));
        assert_eq!(cfg.resync_scope, ResyncScope::Full);
        assert_eq!(cfg.application_name, "gatrix-edge");
        assert_eq!(cfg.redis.url(), "redis://localhost:6379/0");
    }

    #[test]
    fn explicit_environment_list_is_parsed() {
        let cfg = load(&base_env()).unwrap();
        assert_eq!(
            cfg.environments,
            EnvironmentSelection::Explicit(vec!["dev".into(), "qa".into()])
        );
    }

    #[test]
    fn wildcard_tracks_all() {
        let mut env = base_env();
        env.insert("EDGE_ENVIRONMENTS", "*");
        assert_eq!(load(&env).unwrap().environments, EnvironmentSelection::All);
    }

    #[test]
    fn empty_environment_item_is_fatal() {
        let mut env = base_env();
        env.insert("EDGE_ENVIRONMENTS", "dev,,qa");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("EDGE_ENVIRONMENTS"));
    }

    #[test]
    fn missing_bypass_token_is_fatal() {
        let mut env = base_env();
        env.remove("EDGE_BYPASS_TOKEN");
        assert!(matches!(
            load(&env).unwrap_err(),
            ConfigError::MissingVar("EDGE_BYPASS_TOKEN")
        ));
    }

    #[test]
    fn invalid_backend_url_is_fatal() {
        let mut env = base_env();
        env.insert("GATRIX_URL", "not a url");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("GATRIX_URL"));
    }

    #[test]
    fn sync_method_values() {
        let mut env = base_env();
        env.insert("CACHE_SYNC_METHOD", "polling");
        assert_eq!(load(&env).unwrap().sync_method, SyncMethod::Polling);

        env.insert("CACHE_SYNC_METHOD", "manual");
        assert_eq!(load(&env).unwrap().sync_method, SyncMethod::Manual);

        env.insert("CACHE_SYNC_METHOD", "push");
        assert!(load(&env).is_err());
    }

    #[test]
    fn polling_interval_floor() {
        let mut env = base_env();
        env.insert("CACHE_POLLING_INTERVAL_MS", "250");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("CACHE_POLLING_INTERVAL_MS"));
    }

    #[test]
    fn zero_staleness_disables_check() {
        let mut env = base_env();
        env.insert("CACHE_STALENESS_THRESHOLD_MS", "0");
        let cfg = load(&env).unwrap();
        assert!(!cfg.staleness_check_enabled());
    }

    #[test]
    fn redis_url_includes_password_and_db() {
        let mut env = base_env();
        env.insert("REDIS_HOST", "redis.internal");
        env.insert("REDIS_PORT", "6380");
        env.insert("REDIS_PASSWORD", "hunter2");
        env.insert("REDIS_DB", "3");
        let cfg = load(&env).unwrap();
        assert_eq!(cfg.redis.url(), "redis://:hunter2@redis.internal:6380/3");
    }
}
