//! Remote cache store abstraction
//!
//! The coordination protocols only need five primitives from the shared
//! cache: point reads, existence checks, writes with an optional TTL, glob
//! key listing and bulk deletion. [`InMemoryStore`] implements them in-process
//! for tests and single-node deployments; networked backends implement
//! [`CacheStore`] the same way.

pub mod entry;
pub mod memory;
pub mod stats;

pub use entry::{CacheEntry, EntryMetadata};
pub use memory::{start_auto_cleanup, InMemoryStore};
pub use stats::CacheStats;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Shared key-value cache used by the coordinators
///
/// Values are opaque JSON documents. `get` returns `None` for a miss and
/// `Some(Value::Null)` for a stored null, so callers never confuse the two.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a live entry
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Whether a live entry exists under `key`
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Write an entry, replacing any existing one
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// List live keys matching a glob pattern (`*`, `?`, `[...]`)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Delete the given keys, returning how many existed
    async fn delete(&self, keys: &[String]) -> Result<usize>;

    /// Delete every key matching `pattern`; matching nothing is a no-op
    async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        let keys = self.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        self.delete(&keys).await
    }
}
