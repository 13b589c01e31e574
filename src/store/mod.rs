//! Counter stores: fixed-window counting and key blocking.
//!
//! The rate limiter only ever talks to a [`CounterStore`]; concrete backends
//! are picked by name through the [`StoreRegistry`].

mod clock;
mod error;
mod memory;
mod redis;
mod registry;

use std::time::Duration;

use async_trait::async_trait;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::error::StoreError;
pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
pub use self::registry::{StoreConstructor, StoreRegistry, MEMORY_STORE, REDIS_STORE};

/// Result type for counter store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Longest window or block any store honors; longer durations are capped.
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Trait for counter store implementations.
///
/// Every implementation must give identical observable behavior: counters
/// live for a fixed window starting at their first increment, and blocks are
/// independent of counters. Expired entries read as absent.
///
/// Operations are cancelled by dropping the returned future; remote
/// implementations also enforce their own per-operation deadline.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current count for `key`, or 0 if absent or expired.
    async fn get(&self, key: &str) -> StoreResult<u64>;

    /// Increment the counter for `key` and return the new value.
    ///
    /// A missing or expired counter restarts at 1 with a window of `window`
    /// from now. A live counter keeps its original expiry. Concurrent callers
    /// on one key observe a gapless 1, 2, 3, ... sequence.
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<u64>;

    /// Remove the counter for `key`. Absent keys are not an error.
    async fn reset(&self, key: &str) -> StoreResult<()>;

    /// Whether a live block exists for `key`.
    async fn is_blocked(&self, key: &str) -> StoreResult<bool>;

    /// Block `key` for `duration` from now, replacing any existing block.
    ///
    /// Both `window` above and `duration` here are capped at [`MAX_TTL`].
    async fn block(&self, key: &str, duration: Duration) -> StoreResult<()>;

    /// Release held resources. The store must not be used afterwards.
    async fn close(&self) -> StoreResult<()>;
}
