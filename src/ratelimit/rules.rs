//! Quotas and their resolution per identity.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::duration;

/// Default requests allowed per window.
const DEFAULT_RATE_LIMIT: u64 = 10;
/// Default fixed window length.
const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(1);
/// Default block length after a quota is exceeded.
const DEFAULT_BLOCK_DURATION: Duration = Duration::from_secs(300);

/// A fixed-window quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quota {
    /// Requests allowed within one window
    pub rate_limit: u64,
    /// Window length, counted from the first request
    #[serde(with = "duration")]
    pub rate_window: Duration,
    /// How long an identity stays blocked once it exceeds `rate_limit`
    #[serde(with = "duration")]
    pub block_duration: Duration,
}

impl Quota {
    pub fn new(rate_limit: u64, rate_window: Duration, block_duration: Duration) -> Self {
        Self {
            rate_limit,
            rate_window,
            block_duration,
        }
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_window: DEFAULT_RATE_WINDOW,
            block_duration: DEFAULT_BLOCK_DURATION,
        }
    }
}

/// The quotas a rate limiter enforces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Quota per client IP
    pub ip: Quota,
    /// Quota overrides per access token
    pub tokens: HashMap<String, Quota>,
}

impl LimiterConfig {
    pub fn new(ip: Quota, tokens: HashMap<String, Quota>) -> Self {
        Self { ip, tokens }
    }

    /// Add or replace the override for `token`.
    pub fn with_token(mut self, token: impl Into<String>, quota: Quota) -> Self {
        self.tokens.insert(token.into(), quota);
        self
    }

    /// Quota for `token`: its override if configured, otherwise the IP quota.
    ///
    /// Only the numbers fall back; the token keeps its own counter.
    pub fn quota_for_token(&self, token: &str) -> &Quota {
        self.tokens.get(token).unwrap_or(&self.ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LimiterConfig {
        LimiterConfig::new(
            Quota::new(3, Duration::from_secs(1), Duration::from_secs(60)),
            HashMap::new(),
        )
        .with_token("premium", Quota::new(10, Duration::from_secs(1), Duration::from_secs(30)))
    }

    #[test]
    fn test_token_override_is_used() {
        let config = config();
        let quota = config.quota_for_token("premium");

        assert_eq!(quota.rate_limit, 10);
        assert_eq!(quota.block_duration, Duration::from_secs(30));
    }

    #[test]
    fn test_unknown_token_falls_back_to_ip_quota() {
        let config = config();
        assert_eq!(config.quota_for_token("anonymous"), &config.ip);
    }

    #[test]
    fn test_parse_quota_with_units() {
        let yaml = r#"
rate_limit: 100
rate_window: 500ms
block_duration: 2m
"#;
        let quota: Quota = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(quota, Quota::new(100, Duration::from_millis(500), Duration::from_secs(120)));
    }

    #[test]
    fn test_partial_quota_uses_defaults() {
        let quota: Quota = serde_yaml::from_str("rate_limit: 7").unwrap();
        assert_eq!(quota.rate_limit, 7);
        assert_eq!(quota.rate_window, DEFAULT_RATE_WINDOW);
        assert_eq!(quota.block_duration, DEFAULT_BLOCK_DURATION);
    }
}
