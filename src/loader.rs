//! Read path: locked cache-aside with optional single-flight population

use crate::error::{CacheError, Result};
use crate::key::{CallContext, KeyResolver, ResolvedKey, SYNC_LOCK_SUFFIX};
use crate::lock::LockCoordinator;
use crate::operation::Cacheable;
use crate::store::CacheStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Outcome of a cache-aside read
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// Served from the cache; a cached null deserializes like any other value
    Cached(T),
    /// Produced by the wrapped computation during this call
    Computed(T),
    /// Nothing cached and nothing computed (non-synchronized mode only)
    Miss,
}

impl<T> Lookup<T> {
    pub fn is_miss(&self) -> bool {
        matches!(self, Lookup::Miss)
    }

    pub fn was_computed(&self) -> bool {
        matches!(self, Lookup::Computed(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Lookup::Cached(value) | Lookup::Computed(value) => Some(value),
            Lookup::Miss => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Lookup::Cached(value) | Lookup::Computed(value) => Some(value),
            Lookup::Miss => None,
        }
    }
}

/// Implements the read path under the shared namespace lock
///
/// In synchronized mode a miss is populated by exactly one caller holding
/// `<key>:sync`; everyone else polls the cache until the value appears.
#[derive(Clone)]
pub struct CacheAsideLoader {
    store: Arc<dyn CacheStore>,
    locks: LockCoordinator,
    resolver: KeyResolver,
}

impl CacheAsideLoader {
    pub fn new(store: Arc<dyn CacheStore>, locks: LockCoordinator, resolver: KeyResolver) -> Self {
        Self {
            store,
            locks,
            resolver,
        }
    }

    /// Resolve the key for `operation` and run the read path
    pub async fn load<T, F, Fut>(
        &self,
        operation: &Cacheable,
        context: &CallContext,
        compute: F,
    ) -> Result<Lookup<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let key = self
            .resolver
            .resolve(&operation.name, &operation.key, context)?;
        self.load_resolved(&key, operation.sync, compute).await
    }

    /// Run the read path for an already resolved key
    pub async fn load_resolved<T, F, Fut>(
        &self,
        key: &ResolvedKey,
        sync: bool,
        compute: F,
    ) -> Result<Lookup<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let read_guard = self.locks.acquire_read(&key.key).await?;

        let outcome = if sync {
            self.load_synchronized(key, compute).await
        } else {
            self.lookup(key).await
        };

        let released = read_guard.release().await;
        let outcome = outcome?;
        released?;
        Ok(outcome)
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &ResolvedKey) -> Result<Lookup<T>> {
        match self.store.get(&key.key).await? {
            Some(value) => {
                debug!(key = %key.key, "Cache hit");
                Ok(Lookup::Cached(serde_json::from_value(value)?))
            }
            None => {
                debug!(key = %key.key, "Cache miss, not computing outside synchronized mode");
                Ok(Lookup::Miss)
            }
        }
    }

    async fn load_synchronized<T, F, Fut>(&self, key: &ResolvedKey, compute: F) -> Result<Lookup<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let started = Instant::now();
        let mut polls: u32 = 0;

        loop {
            if let Some(value) = self.store.get(&key.key).await? {
                debug!(key = %key.key, polls = polls, "Cache hit");
                return Ok(Lookup::Cached(serde_json::from_value(value)?));
            }

            if let Some(guard) = self
                .locks
                .try_acquire_exclusive(&key.key, SYNC_LOCK_SUFFIX)
                .await?
            {
                let populated = self.populate(key, compute).await;
                let released = guard.release().await;
                let populated = populated?;
                released?;
                return Ok(populated);
            }

            polls += 1;
            let config = self.locks.config();
            if let Some(max_wait) = config.max_wait {
                if started.elapsed() >= max_wait {
                    warn!(key = %key.key, polls = polls, "Gave up waiting for concurrent computation");
                    return Err(CacheError::LockTimeout {
                        lock: key.lock_name(SYNC_LOCK_SUFFIX),
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }

            trace!(key = %key.key, poll = polls, "Computation in progress elsewhere, waiting");
            tokio::time::sleep(config.poll_delay()).await;
        }
    }

    /// Compute and store while holding the single-flight mutex
    async fn populate<T, F, Fut>(&self, key: &ResolvedKey, compute: F) -> Result<Lookup<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        // The previous holder may have stored between our miss and our acquisition
        if let Some(value) = self.store.get(&key.key).await? {
            debug!(key = %key.key, "Populated by previous holder");
            return Ok(Lookup::Cached(serde_json::from_value(value)?));
        }

        let started = Instant::now();
        debug!(key = %key.key, "Computing value");
        let value = compute().await.map_err(|e| {
            warn!(key = %key.key, error = %e, "Computation failed, nothing cached");
            CacheError::Computation(e)
        })?;

        let properties = self.resolver.properties();
        let json = serde_json::to_value(&value)?;
        if json.is_null() && !properties.cache_null_values {
            debug!(key = %key.key, "Null result not cached");
            return Ok(Lookup::Computed(value));
        }

        let ttl = properties.effective_ttl(key.ttl);
        self.store.set(&key.key, json, ttl).await?;
        info!(
            key = %key.key,
            ttl = ?ttl,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Computed and cached value"
        );

        Ok(Lookup::Computed(value))
    }
}
