//! In-process cache store with TTL expiry and glob key matching

use crate::error::Result;
use crate::store::{entry::CacheEntry, stats::CacheStats, CacheStore};
use async_trait::async_trait;
use glob::Pattern;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// In-memory [`CacheStore`]
///
/// This implementation provides:
/// - Thread-safe async access via RwLock
/// - Lazy TTL expiry on read plus an optional background sweep
/// - Redis-style glob matching for `keys`
/// - Hit/miss/write/delete counters
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

impl StoreState {
    /// Drop `key` if it has expired; returns whether a live entry remains
    fn purge_if_expired(&mut self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired() => {
                self.entries.remove(key);
                self.stats.expirations += 1;
                self.stats.entries = self.entries.len();
                debug!(key = %key, "Cache entry expired");
                false
            }
            Some(_) => true,
            None => false,
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get store statistics
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        state.stats.clone()
    }

    /// Number of stored entries, expired ones included until swept
    pub async fn len(&self) -> usize {
        let state = self.state.read().await;
        state.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        let state = self.state.read().await;
        state.entries.is_empty()
    }

    /// Remaining TTL of a live entry; `None` when absent or without expiry
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let state = self.state.read().await;
        state
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .and_then(|entry| entry.time_until_expiration())
    }

    /// Clear all entries from the store
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        let count = state.entries.len();
        state.entries.clear();
        state.stats.deletions += count as u64;
        state.stats.entries = 0;
        info!("Cleared {} entries from cache store", count);
    }

    /// Remove all expired entries, returning their keys
    pub async fn cleanup_expired(&self) -> Vec<String> {
        let mut state = self.state.write().await;

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = state.entries.remove(key) {
                debug!(
                    key = %key,
                    age_ms = entry.age().as_millis() as u64,
                    "Removed expired entry"
                );
            }
        }
        state.stats.expirations += expired.len() as u64;
        state.stats.entries = state.entries.len();

        if !expired.is_empty() {
            debug!("Cleaned up {} expired entries", expired.len());
        }
        expired
    }
}

fn matches(pattern: &Option<Pattern>, raw: &str, key: &str) -> bool {
    match pattern {
        Some(pattern) => pattern.matches(key),
        None => raw == key,
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut state = self.state.write().await;

        if !state.purge_if_expired(key) {
            state.stats.misses += 1;
            debug!(key = %key, "Cache miss");
            return Ok(None);
        }

        let value = state.entries.get_mut(key).map(|entry| {
            entry.mark_accessed();
            entry.value.clone()
        });
        state.stats.hits += 1;
        debug!(key = %key, "Cache hit");
        Ok(value)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.purge_if_expired(key))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let mut state = self.state.write().await;

        match state.entries.get_mut(key) {
            Some(existing) => {
                debug!(key = %key, "Updating existing cache entry");
                existing.update_value(value, ttl);
            }
            None => {
                debug!(key = %key, "Inserting new cache entry");
                state
                    .entries
                    .insert(key.to_string(), CacheEntry::new(key.to_string(), value, ttl));
            }
        }

        state.stats.writes += 1;
        state.stats.entries = state.entries.len();
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let compiled = match Pattern::new(pattern) {
            Ok(compiled) => Some(compiled),
            Err(e) => {
                debug!(pattern = %pattern, error = %e, "Invalid glob pattern, matching literally");
                None
            }
        };

        let state = self.state.read().await;
        let mut keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired() && matches(&compiled, pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        let mut state = self.state.write().await;

        let mut removed = 0;
        for key in keys {
            if state.entries.remove(key).is_some() {
                removed += 1;
            }
        }

        state.stats.deletions += removed as u64;
        state.stats.entries = state.entries.len();
        debug!("Deleted {} of {} requested keys", removed, keys.len());
        Ok(removed)
    }
}

/// Background task that periodically sweeps expired entries
pub fn start_auto_cleanup(store: InMemoryStore, interval: Duration) -> JoinHandle<()> {
    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let expired = store.cleanup_expired().await;
            if !expired.is_empty() {
                debug!("Auto cleanup: {} entries", expired.len());
            }
            if Arc::strong_count(&store.state) == 1 {
                warn!("Cache store dropped, stopping automatic cleanup");
                break;
            }
        }
    })
}
