//! Store statistics

use serde::{Deserialize, Serialize};
use std::fmt;

/// Counters kept by the in-memory store
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that found a live entry
    pub hits: u64,

    /// Reads that found nothing (or an expired entry)
    pub misses: u64,

    /// Successful `set` calls
    pub writes: u64,

    /// Entries removed by `delete`
    pub deletions: u64,

    /// Entries dropped because their TTL elapsed
    pub expirations: u64,

    /// Number of entries currently stored
    pub entries: usize,
}

impl CacheStats {
    /// Cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, writes: {}, deletions: {}, expirations: {}, entries: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.writes,
            self.deletions,
            self.expirations,
            self.entries
        )
    }
}
