//! Redis-backed counter store.
//!
//! Counters are plain integer keys created by `INCR`. The window TTL is
//! attached only by the increment that creates the key, so later increments
//! never stretch the window. Blocks live under a separate `blocklist:` key
//! whose existence alone means "blocked".

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use parking_lot::RwLock;
use redis::{RedisResult, Script};
use tracing::{debug, info, trace};

use super::{CounterStore, StoreError, StoreResult, MAX_TTL};

/// Prefix of block keys.
const BLOCKLIST_PREFIX: &str = "blocklist:";

/// Atomic INCR that sets the expiry only when the key was just created.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Counter store backed by a Redis server.
pub struct RedisStore {
    /// `None` once the store is closed
    connection: RwLock<Option<ConnectionManager>>,
    increment_script: Script,
    /// Deadline applied to every command
    timeout: Duration,
}

impl RedisStore {
    /// Connect to the server at `url` and verify it answers `PING`.
    ///
    /// `timeout` bounds the connect attempt and every later command.
    pub async fn connect(url: &str, timeout: Duration) -> StoreResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::InvalidConfig(format!("invalid redis url: {}", e)))?;

        let connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout { operation: "CONNECT" })??;

        let store = Self {
            connection: RwLock::new(Some(connection)),
            increment_script: Script::new(INCREMENT_SCRIPT),
            timeout,
        };
        store.ping().await?;

        info!(timeout_ms = timeout.as_millis() as u64, "Connected to redis counter store");
        Ok(store)
    }

    /// Round-trip a `PING` to the server.
    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection()?;
        let reply: String = self
            .run("PING", async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;

        if reply != "PONG" {
            return Err(StoreError::Protocol(format!("unexpected PING reply: {}", reply)));
        }
        Ok(())
    }

    /// A handle on the shared connection, or [`StoreError::Closed`].
    fn connection(&self) -> StoreResult<ConnectionManager> {
        self.connection.read().clone().ok_or(StoreError::Closed)
    }

    /// Run one command under the store deadline.
    async fn run<T, F>(&self, operation: &'static str, command: F) -> StoreResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, command).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => {
                debug!(operation, "Redis command exceeded deadline");
                Err(StoreError::Timeout { operation })
            }
        }
    }
}

fn blocklist_key(key: &str) -> String {
    format!("{}{}", BLOCKLIST_PREFIX, key)
}

/// Redis expiry in milliseconds, capped at [`MAX_TTL`]; never zero, which the server rejects.
fn ttl_millis(duration: Duration) -> u64 {
    let millis = duration.min(MAX_TTL).as_millis() as u64;
    millis.max(1)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.connection()?;
        let count: Option<u64> = self
            .run("GET", async move { redis::cmd("GET").arg(key).query_async(&mut conn).await })
            .await?;
        Ok(count.unwrap_or(0))
    }

    async fn increment(&self, key: &str, window: Duration) -> StoreResult<u64> {
        let mut conn = self.connection()?;
        let script = &self.increment_script;
        let window_ms = ttl_millis(window);

        let count: u64 = self
            .run("INCR", async move {
                script.key(key).arg(window_ms).invoke_async(&mut conn).await
            })
            .await?;

        trace!(key = %key, count, "Incremented counter");
        Ok(count)
    }

    async fn reset(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.connection()?;
        self.run("DEL", async move { redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await })
            .await
    }

    async fn is_blocked(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection()?;
        let block_key = blocklist_key(key);
        let exists: u64 = self
            .run("EXISTS", async move {
                redis::cmd("EXISTS").arg(&block_key).query_async(&mut conn).await
            })
            .await?;
        Ok(exists > 0)
    }

    async fn block(&self, key: &str, duration: Duration) -> StoreResult<()> {
        let mut conn = self.connection()?;
        let block_key = blocklist_key(key);
        let ttl = ttl_millis(duration);

        self.run("SET", async move {
            redis::cmd("SET")
                .arg(&block_key)
                .arg(1)
                .arg("PX")
                .arg(ttl)
                .query_async::<()>(&mut conn)
                .await
        })
        .await?;

        trace!(key = %key, ttl_ms = ttl, "Blocked key");
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        // Dropping the last manager handle shuts its connection task down.
        if self.connection.write().take().is_some() {
            info!("Closed redis counter store");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_blocklist_key_is_namespaced() {
        assert_eq!(blocklist_key("ip:10.0.0.1"), "blocklist:ip:10.0.0.1");
        assert_eq!(blocklist_key("token:abc"), "blocklist:token:abc");
    }

    #[test]
    fn test_ttl_millis_bounds() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
        assert_eq!(ttl_millis(MAX_TTL + Duration::from_secs(1)), MAX_TTL.as_millis() as u64);
        assert_eq!(ttl_millis(Duration::MAX), MAX_TTL.as_millis() as u64);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let result = RedisStore::connect("not-a-url", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(StoreError::InvalidConfig(_))));
    }

    // These tests need a running Redis server (REDIS_URL or redis://127.0.0.1/).

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string())
    }

    async fn connect() -> RedisStore {
        RedisStore::connect(&redis_url(), Duration::from_secs(1)).await.unwrap()
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_increment_and_reset() {
        let store = connect().await;
        let key = "tollgate-test:increment";
        store.reset(key).await.unwrap();

        assert_eq!(store.increment(key, Duration::from_secs(5)).await.unwrap(), 1);
        assert_eq!(store.increment(key, Duration::from_secs(5)).await.unwrap(), 2);
        assert_eq!(store.get(key).await.unwrap(), 2);

        store.reset(key).await.unwrap();
        assert_eq!(store.get(key).await.unwrap(), 0);
        assert_eq!(store.increment(key, Duration::from_secs(5)).await.unwrap(), 1);
        store.reset(key).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_window_expires() {
        let store = connect().await;
        let key = "tollgate-test:window";
        store.reset(key).await.unwrap();

        store.increment(key, Duration::from_millis(200)).await.unwrap();
        store.increment(key, Duration::from_millis(200)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(store.get(key).await.unwrap(), 0);
        assert_eq!(store.increment(key, Duration::from_millis(200)).await.unwrap(), 1);
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_increment_keeps_original_expiry() {
        let store = connect().await;
        let key = "tollgate-test:original-expiry";
        store.reset(key).await.unwrap();

        store.increment(key, Duration::from_millis(1000)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        store.increment(key, Duration::from_millis(1000)).await.unwrap();

        // A refreshed TTL would be close to the full second again.
        let mut conn = store.connection().unwrap();
        let pttl: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await.unwrap();
        assert!(pttl > 0 && pttl <= 400, "unexpected PTTL {}", pttl);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.get(key).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_huge_durations_are_capped() {
        let store = connect().await;
        let key = "tollgate-test:huge";
        store.reset(key).await.unwrap();

        assert_eq!(store.increment(key, Duration::MAX).await.unwrap(), 1);
        store.block(key, Duration::MAX).await.unwrap();
        assert!(store.is_blocked(key).await.unwrap());

        store.reset(key).await.unwrap();
        let mut conn = store.connection().unwrap();
        redis::cmd("DEL").arg(blocklist_key(key)).query_async::<()>(&mut conn).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_block_expires() {
        let store = connect().await;
        let key = "tollgate-test:block";

        store.block(key, Duration::from_millis(200)).await.unwrap();
        assert!(store.is_blocked(key).await.unwrap());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!store.is_blocked(key).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_closed_store_rejects_commands() {
        let store = connect().await;
        store.close().await.unwrap();

        assert!(matches!(store.get("tollgate-test:closed").await, Err(StoreError::Closed)));
        assert!(matches!(store.connection(), Err(StoreError::Closed)));
        assert!(matches!(store.ping().await, Err(StoreError::Closed)));
        assert_ok!(store.close().await);
    }
}
