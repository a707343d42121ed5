//! Call-site descriptors for the coordination protocols
//!
//! Each descriptor names the cache (optionally with a `#<ISO-8601>` TTL
//! suffix) and the key expression evaluated against the call's arguments.

use serde::{Deserialize, Serialize};

/// Read-through caching of a call's result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cacheable {
    /// Name template, e.g. `user` or `orders#PT30S`
    pub name: String,

    /// Key expression, e.g. `#id`
    pub key: String,

    /// Compute under the single-flight mutex on a miss
    pub sync: bool,
}

impl Cacheable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: String::new(),
            sync: false,
        }
    }

    pub fn key(mut self, expression: impl Into<String>) -> Self {
        self.key = expression.into();
        self
    }

    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }
}

/// Mutation followed by invalidation under the exclusive namespace lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEvict {
    pub name: String,
    pub key: String,
}

impl CacheEvict {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: String::new(),
        }
    }

    pub fn key(mut self, expression: impl Into<String>) -> Self {
        self.key = expression.into();
        self
    }
}

/// Mutation bracketed by an immediate and a delayed invalidation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoubleDelete {
    pub name: String,
    pub key: String,
}

impl DoubleDelete {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: String::new(),
        }
    }

    pub fn key(mut self, expression: impl Into<String>) -> Self {
        self.key = expression.into();
        self
    }
}
