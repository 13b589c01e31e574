//! Name-keyed factory for counter stores.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::{CounterStore, MemoryStore, RedisStore, StoreError, StoreResult};
use crate::config::StorageConfig;

/// Storage name of the in-process store.
pub const MEMORY_STORE: &str = "memory";
/// Storage name of the Redis store.
pub const REDIS_STORE: &str = "redis";

/// A function building a store from its connection parameters.
pub type StoreConstructor =
    Arc<dyn Fn(StorageConfig) -> BoxFuture<'static, StoreResult<Arc<dyn CounterStore>>> + Send + Sync>;

/// Registry mapping storage-type names to store constructors.
///
/// Owned by the composition root; the rate limiter never sees it.
#[derive(Default)]
pub struct StoreRegistry {
    constructors: RwLock<HashMap<String, StoreConstructor>>,
}

impl StoreRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in `memory` and `redis` stores.
    pub fn with_defaults() -> Self {
        let registry = Self::new();

        registry.register(MEMORY_STORE, build_memory_store);
        registry.register(REDIS_STORE, build_redis_store);
        registry
    }

    /// Register `constructor` under `name`, replacing any previous one.
    pub fn register<F, Fut>(&self, name: &str, constructor: F)
    where
        F: Fn(StorageConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StoreResult<Arc<dyn CounterStore>>> + Send + 'static,
    {
        let constructor: StoreConstructor = Arc::new(move |config: StorageConfig| constructor(config).boxed());
        self.constructors.write().insert(name.to_string(), constructor);
        debug!(storage = %name, "Registered counter store");
    }

    /// Whether a constructor is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.read().contains_key(name)
    }

    /// Registered storage names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the store registered under `name`.
    ///
    /// Returns [`StoreError::StorageNotFound`] for unknown names.
    pub async fn create(&self, name: &str, config: StorageConfig) -> StoreResult<Arc<dyn CounterStore>> {
        // Clone the constructor out so the lock is not held across the await.
        let constructor = self
            .constructors
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::StorageNotFound(name.to_string()))?;

        let store = constructor(config).await?;
        info!(storage = %name, "Counter store created");
        Ok(store)
    }
}

async fn build_memory_store(config: StorageConfig) -> StoreResult<Arc<dyn CounterStore>> {
    Ok(Arc::new(MemoryStore::with_capacity(config.size)))
}

async fn build_redis_store(config: StorageConfig) -> StoreResult<Arc<dyn CounterStore>> {
    let url = config
        .url
        .ok_or_else(|| StoreError::InvalidConfig("redis storage requires a `url`".to_string()))?;
    Ok(Arc::new(RedisStore::connect(&url, config.timeout).await?))
}
