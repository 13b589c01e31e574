//! Configuration management for Tollgate.
//!
//! Values come from an optional YAML file overlaid with `TOLLGATE__*`
//! environment variables (`TOLLGATE__STORAGE_TYPE=redis`,
//! `TOLLGATE__IP__RATE_LIMIT=20`, ...).

use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{LimiterConfig, Quota};
use crate::store::MAX_TTL;

/// Prefix of environment variables read by [`AppConfig::load`].
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Quota applied per client IP, and to tokens without an override
    #[serde(default)]
    pub ip: Quota,

    /// Per-token quota overrides
    #[serde(default)]
    pub token: HashMap<String, Quota>,

    /// Name of the counter store to use
    #[serde(default = "default_storage_type")]
    pub storage_type: String,

    /// Connection parameters per storage name
    #[serde(default)]
    pub storage: HashMap<String, StorageConfig>,

    /// Admission middleware behavior
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            ip: Quota::default(),
            token: HashMap::new(),
            storage_type: default_storage_type(),
            storage: HashMap::new(),
            admission: AdmissionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_storage_type() -> String {
    "memory".to_string()
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { addr: default_addr() }
    }
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Connection parameters for one counter store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Connection URL (remote stores)
    #[serde(default)]
    pub url: Option<String>,

    /// Initial key capacity (in-process store)
    #[serde(default)]
    pub size: usize,

    /// Deadline for a single store command
    #[serde(default = "default_storage_timeout", with = "duration")]
    pub timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: None,
            size: 0,
            timeout: default_storage_timeout(),
        }
    }
}

fn default_storage_timeout() -> Duration {
    Duration::from_millis(500)
}

/// Admission middleware configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Request header carrying the access token
    #[serde(default = "default_token_header")]
    pub token_header: String,

    /// Prefer `X-Forwarded-For` over the peer address
    #[serde(default = "default_true")]
    pub trust_forwarded_for: bool,

    /// Let requests through when the store fails instead of answering 500
    #[serde(default)]
    pub fail_open: bool,

    /// Deadline for one admission decision
    #[serde(default = "default_admission_timeout", with = "duration")]
    pub timeout: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            token_header: default_token_header(),
            trust_forwarded_for: true,
            fail_open: false,
            timeout: default_admission_timeout(),
        }
    }
}

fn default_token_header() -> String {
    "API_KEY".to_string()
}

fn default_true() -> bool {
    true
}

fn default_admission_timeout() -> Duration {
    Duration::from_secs(1)
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Output format
    #[serde(default)]
    pub format: LogFormat,

    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, overlaid with environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        let config: AppConfig = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the rate limiter relies on.
    pub fn validate(&self) -> Result<()> {
        validate_quota("ip", &self.ip)?;
        for (token, quota) in &self.token {
            validate_quota(&format!("token `{}`", token), quota)?;
        }

        if self.storage_type.trim().is_empty() {
            return Err(TollgateError::Config("storage_type must not be empty".to_string()));
        }

        HeaderName::from_bytes(self.admission.token_header.as_bytes()).map_err(|_| {
            TollgateError::Config(format!(
                "invalid token header name: {:?}",
                self.admission.token_header
            ))
        })?;

        Ok(())
    }

    /// Connection parameters for the selected storage type.
    pub fn storage_config(&self) -> StorageConfig {
        self.storage.get(&self.storage_type).cloned().unwrap_or_default()
    }

    /// The quota set handed to the rate limiter.
    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig::new(self.ip.clone(), self.token.clone())
    }
}

fn validate_quota(name: &str, quota: &Quota) -> Result<()> {
    if quota.rate_limit == 0 {
        return Err(TollgateError::Config(format!("{}: rate_limit must be positive", name)));
    }
    if quota.rate_window.is_zero() {
        return Err(TollgateError::Config(format!("{}: rate_window must be non-zero", name)));
    }
    for (field, value) in [("rate_window", quota.rate_window), ("block_duration", quota.block_duration)] {
        if value > MAX_TTL {
            return Err(TollgateError::Config(format!(
                "{}: {} must not exceed {}s",
                name,
                field,
                MAX_TTL.as_secs()
            )));
        }
    }
    Ok(())
}

/// Serde adapter for durations written as integer seconds or `<n><unit>`
/// strings with unit `ms`, `s`, `m` or `h`.
pub(crate) mod duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}ms", value.as_millis()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).map_err(serde::de::Error::custom),
        }
    }

    pub fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let (digits, unit) = text.split_at(split);

        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration: {:?}", text))?;

        let secs = |factor: u64| {
            value
                .checked_mul(factor)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration out of range: {:?}", text))
        };

        match unit.trim() {
            "ms" => Ok(Duration::from_millis(value)),
            "" | "s" => Ok(Duration::from_secs(value)),
            "m" => secs(60),
            "h" => secs(3600),
            other => Err(format!("unknown duration unit {:?} in {:?}", other, text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.storage_type, "memory");
        assert_eq!(config.server.addr.port(), 8080);
        assert_eq!(config.admission.token_header, "API_KEY");
        assert!(!config.admission.fail_open);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
server:
  addr: 127.0.0.1:9000
ip:
  rate_limit: 3
  rate_window: 1s
  block_duration: 60s
token:
  premium:
    rate_limit: 10
    rate_window: 1s
    block_duration: 30s
storage_type: redis
storage:
  redis:
    url: redis://localhost:6379/0
    timeout: 250ms
admission:
  fail_open: true
logging:
  format: json
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.ip.rate_limit, 3);
        assert_eq!(config.ip.block_duration, Duration::from_secs(60));
        assert_eq!(config.token["premium"].rate_limit, 10);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.admission.fail_open);

        let storage = config.storage_config();
        assert_eq!(storage.url.as_deref(), Some("redis://localhost:6379/0"));
        assert_eq!(storage.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_example_file_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/tollgate.yaml");
        let config = AppConfig::from_file(path).unwrap();

        assert_eq!(config.storage_type, "memory");
        assert_eq!(config.storage_config().size, 10000);
        assert_eq!(config.token["premium"].block_duration, Duration::from_secs(60));
    }

    #[test]
    fn test_missing_storage_section_uses_defaults() {
        let config = AppConfig::from_yaml("storage_type: memory\n").unwrap();
        let storage = config.storage_config();
        assert!(storage.url.is_none());
        assert_eq!(storage.timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let yaml = r#"
ip:
  rate_limit: 0
  rate_window: 1s
  block_duration: 1m
"#;
        assert!(matches!(AppConfig::from_yaml(yaml), Err(TollgateError::Config(_))));
    }

    #[test]
    fn test_zero_token_window_rejected() {
        let yaml = r#"
token:
  broken:
    rate_limit: 5
    rate_window: 0
    block_duration: 1m
"#;
        assert!(matches!(AppConfig::from_yaml(yaml), Err(TollgateError::Config(_))));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut config = AppConfig::default();
        config.admission.token_header = "bad header".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_parse() {
        assert_eq!(duration::parse("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(duration::parse("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(duration::parse("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(duration::parse("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(duration::parse("42").unwrap(), Duration::from_secs(42));
        assert!(duration::parse("ten seconds").is_err());
        assert!(duration::parse("3d").is_err());
        assert!(duration::parse("307445734561825861h").is_err());
        assert!(duration::parse("307445734561825861m").is_err());
    }

    #[test]
    fn test_oversized_block_duration_rejected() {
        let yaml = r#"
ip:
  rate_limit: 1
  rate_window: 1s
  block_duration: 18446744073709551615
"#;
        assert!(matches!(AppConfig::from_yaml(yaml), Err(TollgateError::Config(_))));
    }

    #[test]
    fn test_oversized_token_window_rejected() {
        let mut config = AppConfig::default();
        config.token.insert(
            "forever".to_string(),
            Quota::new(1, MAX_TTL + Duration::from_secs(1), Duration::from_secs(1)),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_limiter_config_carries_overrides() {
        let mut config = AppConfig::default();
        config.token.insert(
            "premium".to_string(),
            Quota::new(10, Duration::from_secs(1), Duration::from_secs(30)),
        );

        let limiter = config.limiter_config();
        assert_eq!(limiter.quota_for_token("premium").rate_limit, 10);
        assert_eq!(limiter.quota_for_token("other").rate_limit, config.ip.rate_limit);
    }

    #[test]
    fn test_load_reads_environment() {
        std::env::set_var("TOLLGATE__STORAGE_TYPE", "redis");
        std::env::set_var("TOLLGATE__IP__RATE_LIMIT", "42");

        let config = AppConfig::load(None).unwrap();

        std::env::remove_var("TOLLGATE__STORAGE_TYPE");
        std::env::remove_var("TOLLGATE__IP__RATE_LIMIT");

        assert_eq!(config.storage_type, "redis");
        assert_eq!(config.ip.rate_limit, 42);
    }
}
