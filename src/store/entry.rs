//! Stored cache entries with optional expiry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A cache entry: a serialized value and its metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key
    pub key: String,

    /// The cached value; `Value::Null` is a cached null, not a miss
    pub value: Value,

    /// Entry metadata
    pub metadata: EntryMetadata,
}

impl CacheEntry {
    /// Create a new entry, expiring after `ttl` if one is given
    pub fn new(key: String, value: Value, ttl: Option<Duration>) -> Self {
        let now = Utc::now();

        Self {
            key,
            value,
            metadata: EntryMetadata {
                created_at: now,
                accessed_at: now,
                expires_at: ttl.map(|ttl| expiry_after(now, ttl)),
                access_count: 0,
                version: 1,
            },
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        match self.metadata.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }

    /// Time left before expiry; `None` for entries without a TTL or already expired
    pub fn time_until_expiration(&self) -> Option<Duration> {
        let expires_at = self.metadata.expires_at?;
        (expires_at - Utc::now()).to_std().ok()
    }

    /// Mark the entry as read
    pub fn mark_accessed(&mut self) {
        self.metadata.accessed_at = Utc::now();
        self.metadata.access_count += 1;
    }

    /// Get the age of the entry
    pub fn age(&self) -> Duration {
        (Utc::now() - self.metadata.created_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }

    /// Replace the value and restart expiry, as an overwriting `SET` does
    pub fn update_value(&mut self, value: Value, ttl: Option<Duration>) {
        let now = Utc::now();
        self.value = value;
        self.metadata.expires_at = ttl.map(|ttl| expiry_after(now, ttl));
        self.metadata.version += 1;
    }
}

fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// When the entry was created
    pub created_at: DateTime<Utc>,

    /// Last read time
    pub accessed_at: DateTime<Utc>,

    /// When the entry expires, `None` for no expiry
    pub expires_at: Option<DateTime<Utc>>,

    /// Number of reads served from this entry
    pub access_count: u64,

    /// Version number (incremented on overwrite)
    pub version: u64,
}
