use crate::error::{GatewayError, Result};
use crate::proxy::rotation::RotationStrategy;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Forward server and orchestrator configuration
    pub forwarder: ForwarderSettings,
    /// Where proxies, blacklist rules and activity go
    pub issuer_mode: IssuerMode,
    /// Management backend configuration
    pub backend: BackendSettings,
    /// Blacklist configuration
    pub blacklist: BlacklistSettings,
    /// In-process pool and health check configuration
    pub local: LocalPoolSettings,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ForwarderSettings {
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Port for the forward server (default: 8080)
    pub port: u16,
    pub rotation_strategy: RotationStrategy,
    pub fallback_strategy: RotationStrategy,
    /// Retries after the first attempt with the primary strategy
    pub retry_count: u32,
    pub max_concurrent_requests: usize,
    /// Timeout for each upstream exchange
    pub upstream_timeout: Duration,
    pub require_user_credential: bool,
    pub default_user_credential: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuerMode {
    /// Collaborators are reached through the management API
    Backend,
    /// Pool, blacklist and activity are kept in-process
    Local,
}

impl FromStr for IssuerMode {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "backend" => Ok(IssuerMode::Backend),
            "local" => Ok(IssuerMode::Local),
            other => Err(GatewayError::InvalidConfig(format!(
                "ISSUER_MODE must be backend or local, got {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub base_url: String,
    pub proxy_endpoint: String,
    pub blacklist_endpoint: String,
    pub activity_endpoint: String,
    pub system_token: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BlacklistSettings {
    /// Snapshot TTL and auto-refresh period
    pub refresh_interval: Duration,
    /// Patterns used in local mode
    pub local_patterns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LocalPoolSettings {
    /// Proxy URLs seeding the pool
    pub proxies: Vec<String>,
    /// Accepted tokens and the user ids they map to
    pub credentials: HashMap<String, i64>,
    pub probe_test_url: String,
    pub probe_timeout: Duration,
    pub probe_interval: Duration,
    pub probe_max_workers: usize,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            forwarder: ForwarderSettings {
                host: get_env_or("FORWARDER_HOST", "0.0.0.0"),
                port: parse_env("FORWARDER_PORT", "8080")?,
                rotation_strategy: RotationStrategy::resolve(&get_env_or(
                    "ROTATION_STRATEGY",
                    "best",
                )),
                fallback_strategy: RotationStrategy::resolve(&get_env_or(
                    "FALLBACK_STRATEGY",
                    "health_score",
                )),
                retry_count: parse_env("RETRY_COUNT", "1")?,
                max_concurrent_requests: parse_env("MAX_CONCURRENT_REQUESTS", "100")?,
                upstream_timeout: parse_secs("UPSTREAM_TIMEOUT_SECONDS", "30")?,
                require_user_credential: parse_env("REQUIRE_USER_CREDENTIAL", "true")?,
                default_user_credential: env::var("DEFAULT_USER_CREDENTIAL")
                    .ok()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty()),
            },
            issuer_mode: get_env_or("ISSUER_MODE", "backend").parse()?,
            backend: BackendSettings {
                base_url: get_env_or("BACKEND_BASE_URL", "http://127.0.0.1:8000"),
                proxy_endpoint: get_env_or("BACKEND_PROXY_ENDPOINT", "/proxy"),
                blacklist_endpoint: get_env_or("BACKEND_BLACKLIST_ENDPOINT", "/blacklist"),
                activity_endpoint: get_env_or("BACKEND_ACTIVITY_ENDPOINT", "/activity"),
                system_token: get_env_or("SYSTEM_TOKEN", ""),
                timeout: parse_secs("BACKEND_TIMEOUT_SECONDS", "30")?,
            },
            blacklist: BlacklistSettings {
                refresh_interval: parse_secs("BLACKLIST_REFRESH_SECONDS", "60")?,
                local_patterns: get_env_or("LOCAL_BLACKLIST", "")
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
            },
            local: LocalPoolSettings {
                proxies: get_env_or("LOCAL_PROXIES", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                credentials: parse_credentials(&get_env_or("LOCAL_CREDENTIALS", ""))?,
                probe_test_url: get_env_or("PROBE_TEST_URL", "https://httpbin.org/ip"),
                probe_timeout: parse_secs("PROBE_TIMEOUT_SECONDS", "10")?,
                probe_interval: parse_secs("PROBE_INTERVAL_SECONDS", "300")?,
                probe_max_workers: parse_env("PROBE_MAX_WORKERS", "20")?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the forward server address
    pub fn forwarder_addr(&self) -> String {
        format!("{}:{}", self.forwarder.host, self.forwarder.port)
    }
}

/// Parse `token=user_id` pairs separated by commas
fn parse_credentials(raw: &str) -> Result<HashMap<String, i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (token, user_id) = entry.split_once('=').ok_or_else(|| {
                GatewayError::InvalidConfig(format!(
                    "LOCAL_CREDENTIALS entries must be token=user_id, got {}",
                    entry
                ))
            })?;
            let user_id = user_id.trim().parse().map_err(|_| {
                GatewayError::InvalidConfig(format!("invalid user id in LOCAL_CREDENTIALS: {}", user_id))
            })?;
            Ok((token.trim().to_string(), user_id))
        })
        .collect()
}

/// Parse an environment variable, failing on malformed values
fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    let raw = get_env_or(key, default);
    raw.trim()
        .parse()
        .map_err(|_| GatewayError::InvalidConfig(format!("{} has an invalid value: {}", key, raw)))
}

/// Parse a whole number of seconds that must be greater than zero
fn parse_secs(key: &str, default: &str) -> Result<Duration> {
    let secs: u64 = parse_env(key, default)?;
    if secs == 0 {
        return Err(GatewayError::InvalidConfig(format!(
            "{} must be greater than zero",
            key
        )));
    }
    Ok(Duration::from_secs(secs))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
