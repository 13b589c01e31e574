//! Core rate limiter implementation.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::identity::IdentityKey;
use super::rules::{LimiterConfig, Quota};
use crate::store::{CounterStore, StoreResult};

/// The admission policy over a shared counter store.
///
/// The limiter holds no mutable state of its own; every count and block
/// lives in the store, so one instance can serve any number of concurrent
/// requests. Store errors are returned unchanged and never turned into an
/// allow or deny.
pub struct RateLimiter {
    /// Counter store shared by every request
    store: Arc<dyn CounterStore>,
    /// IP quota and per-token overrides
    config: LimiterConfig,
}

impl RateLimiter {
    /// Create a rate limiter enforcing `config` over `store`.
    pub fn new(store: Arc<dyn CounterStore>, config: LimiterConfig) -> Self {
        Self { store, config }
    }

    /// Decide whether a request from `ip`, optionally carrying `token`, may proceed.
    ///
    /// A blocked IP is rejected even with a valid token. A request with a
    /// non-empty token is counted only against the token's quota; exceeding
    /// it blocks both the token and the IP. Without a token the IP quota
    /// applies.
    pub async fn allow(&self, ip: &str, token: Option<&str>) -> StoreResult<bool> {
        let ip_key = IdentityKey::ip(ip).to_storage_key();

        trace!(ip = %ip, has_token = token.is_some(), "Checking admission");

        if self.store.is_blocked(&ip_key).await? {
            debug!(key = %ip_key, "Rejected blocked IP");
            return Ok(false);
        }

        match token.filter(|token| !token.is_empty()) {
            Some(token) => {
                let token_key = IdentityKey::token(token).to_storage_key();
                if self.store.is_blocked(&token_key).await? {
                    debug!(ip = %ip, "Rejected blocked token");
                    return Ok(false);
                }
                self.check_token_limit(token, &token_key, &ip_key).await
            }
            None => self.check_ip_limit(&ip_key).await,
        }
    }

    /// Count a request against the IP quota, blocking the IP once it is exceeded.
    async fn check_ip_limit(&self, ip_key: &str) -> StoreResult<bool> {
        let quota = &self.config.ip;
        let count = self.store.increment(ip_key, quota.rate_window).await?;

        if count > quota.rate_limit {
            self.store.block(ip_key, quota.block_duration).await?;
            warn!(
                key = %ip_key,
                count,
                limit = quota.rate_limit,
                block_secs = quota.block_duration.as_secs(),
                "IP rate limit exceeded"
            );
            return Ok(false);
        }

        debug!(key = %ip_key, count, limit = quota.rate_limit, "Request allowed");
        Ok(true)
    }

    /// Count a request against the token quota.
    ///
    /// Exceeding it blocks the token and the IP that used it, with the token's
    /// block duration.
    async fn check_token_limit(&self, token: &str, token_key: &str, ip_key: &str) -> StoreResult<bool> {
        let quota: &Quota = self.config.quota_for_token(token);
        let count = self.store.increment(token_key, quota.rate_window).await?;

        if count > quota.rate_limit {
            self.store.block(token_key, quota.block_duration).await?;
            self.store.block(ip_key, quota.block_duration).await?;
            warn!(
                ip = %ip_key,
                count,
                limit = quota.rate_limit,
                block_secs = quota.block_duration.as_secs(),
                "Token rate limit exceeded, token and IP blocked"
            );
            return Ok(false);
        }

        debug!(ip = %ip_key, count, limit = quota.rate_limit, "Token request allowed");
        Ok(true)
    }

    /// The quotas this limiter enforces.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// The underlying counter store, for inspecting or resetting keys.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Close the underlying store. Must be called at most once.
    pub async fn close(&self) -> StoreResult<()> {
        self.store.close().await
    }
}
