//! Named caches with per-cache TTL
//!
//! A cache requested as `name#<ISO-8601 duration>` is registered under `name`
//! and writes its entries with that TTL. Entries are stored under
//! `[prefix]name::key`.

use crate::config::CacheProperties;
use crate::error::{CacheError, Result};
use crate::key::parse_name_template;
use crate::store::CacheStore;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Separator between a cache name and an entry key
pub const CACHE_KEY_SEPARATOR: &str = "::";

/// Handle to one named cache
#[derive(Clone)]
pub struct NamedCache {
    name: String,
    ttl: Option<Duration>,
    store: Arc<dyn CacheStore>,
    properties: Arc<CacheProperties>,
}

impl NamedCache {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// TTL applied to writes: the name's own, else the configured default
    pub fn ttl(&self) -> Option<Duration> {
        self.properties.effective_ttl(self.ttl)
    }

    /// Store key for an entry of this cache
    pub fn entry_key(&self, key: &str) -> String {
        self.properties
            .apply_prefix(&format!("{}{}{}", self.name, CACHE_KEY_SEPARATOR, key))
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.store.get(&self.entry_key(key)).await
    }

    /// Read and deserialize an entry
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Write an entry; returns `false` when a null was skipped by policy
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<bool> {
        let value = serde_json::to_value(value)?;
        let entry_key = self.entry_key(key);

        if value.is_null() && !self.properties.cache_null_values {
            debug!(cache = %self.name, key = %entry_key, "Null value not cached");
            return Ok(false);
        }

        self.store.set(&entry_key, value, self.ttl()).await?;
        Ok(true)
    }

    /// Remove one entry; returns whether it existed
    pub async fn evict(&self, key: &str) -> Result<bool> {
        let deleted = self.store.delete(&[self.entry_key(key)]).await?;
        Ok(deleted > 0)
    }

    /// Remove every entry of this cache
    pub async fn clear(&self) -> Result<usize> {
        let deleted = self.store.delete_matching(&self.entry_key("*")).await?;
        info!(cache = %self.name, deleted = deleted, "Cleared cache");
        Ok(deleted)
    }
}

impl std::fmt::Debug for NamedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Hands out [`NamedCache`]s over a shared store
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    properties: Arc<CacheProperties>,
    allow_runtime_creation: bool,
    caches: RwLock<HashMap<String, NamedCache>>,
}

impl CacheManager {
    /// Manager that creates caches on first use
    pub fn new(store: Arc<dyn CacheStore>, properties: CacheProperties) -> Self {
        Self {
            store,
            properties: Arc::new(properties),
            allow_runtime_creation: true,
            caches: RwLock::new(HashMap::new()),
        }
    }

    pub fn builder(store: Arc<dyn CacheStore>) -> CacheManagerBuilder {
        CacheManagerBuilder {
            store,
            properties: CacheProperties::default(),
            allow_runtime_creation: true,
            initial_caches: Vec::new(),
        }
    }

    /// Look up a cache by name template
    ///
    /// Returns `None` for an unknown name when runtime creation is disabled.
    /// The TTL suffix only matters the first time a name is seen.
    pub fn cache(&self, template: &str) -> Result<Option<NamedCache>> {
        let (name, ttl) = parse_name_template(template)?;

        if let Some(cache) = self.caches.read().get(&name) {
            return Ok(Some(cache.clone()));
        }

        if !self.allow_runtime_creation {
            debug!(cache = %name, "Unknown cache and runtime creation disabled");
            return Ok(None);
        }

        Ok(Some(self.register(name, ttl)))
    }

    /// Names of all registered caches, sorted
    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn register(&self, name: String, ttl: Option<Duration>) -> NamedCache {
        let mut caches = self.caches.write();
        caches
            .entry(name.clone())
            .or_insert_with(|| {
                info!(cache = %name, ttl = ?ttl, "Registered cache");
                NamedCache {
                    name: name.clone(),
                    ttl,
                    store: Arc::clone(&self.store),
                    properties: Arc::clone(&self.properties),
                }
            })
            .clone()
    }
}

/// Builder for [`CacheManager`]
pub struct CacheManagerBuilder {
    store: Arc<dyn CacheStore>,
    properties: CacheProperties,
    allow_runtime_creation: bool,
    initial_caches: Vec<String>,
}

impl CacheManagerBuilder {
    pub fn properties(mut self, properties: CacheProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn allow_runtime_creation(mut self, allow: bool) -> Self {
        self.allow_runtime_creation = allow;
        self
    }

    /// Pre-register a cache, e.g. `orders#PT30S`
    pub fn initial_cache(mut self, template: impl Into<String>) -> Self {
        self.initial_caches.push(template.into());
        self
    }

    pub fn build(self) -> Result<CacheManager> {
        let manager = CacheManager {
            store: self.store,
            properties: Arc::new(self.properties),
            allow_runtime_creation: self.allow_runtime_creation,
            caches: RwLock::new(HashMap::new()),
        };

        for template in &self.initial_caches {
            let (name, ttl) = parse_name_template(template)?;
            if name.is_empty() {
                return Err(CacheError::InvalidConfiguration(format!(
                    "cache template '{}' has no name",
                    template
                )));
            }
            manager.register(name, ttl);
        }

        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn manager(store: &InMemoryStore, properties: CacheProperties) -> CacheManager {
        CacheManager::new(Arc::new(store.clone()), properties)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = InMemoryStore::new();
        let manager = manager(&store, CacheProperties::default());
        let users = manager.cache("users").unwrap().unwrap();

        assert!(users.put("42", &json!({"name": "ada"})).await.unwrap());
        assert_eq!(
            users.get("42").await.unwrap(),
            Some(json!({"name": "ada"}))
        );
        assert!(store.exists("users::42").await.unwrap());
        assert_eq!(users.get_as::<i64>("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_from_name() {
        let store = InMemoryStore::new();
        let manager = manager(&store, CacheProperties::default());

        let orders = manager.cache("orders#PT30S").unwrap().unwrap();
        assert_eq!(orders.name(), "orders");
        assert_eq!(orders.ttl(), Some(Duration::from_secs(30)));

        orders.put("1", &7).await.unwrap();
        assert!(store.ttl("orders::1").await.unwrap() <= Duration::from_secs(30));

        // Same cache under its plain name
        let again = manager.cache("orders").unwrap().unwrap();
        assert_eq!(again.ttl(), Some(Duration::from_secs(30)));
        assert_eq!(manager.cache_names(), vec!["orders".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_ttl() {
        let store = InMemoryStore::new();
        let manager = manager(&store, CacheProperties::default());

        assert!(matches!(
            manager.cache("orders#bogus"),
            Err(CacheError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_prefix_and_default_ttl() {
        let store = InMemoryStore::new();
        let properties = CacheProperties::builder()
            .use_key_prefix(true)
            .key_prefix("app1::")
            .time_to_live(Duration::from_secs(60))
            .build();
        let users = manager(&store, properties).cache("users").unwrap().unwrap();

        assert_eq!(users.entry_key("42"), "app1::users::42");
        assert_eq!(users.ttl(), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_null_policy() {
        let store = InMemoryStore::new();
        let properties = CacheProperties::builder().cache_null_values(false).build();
        let users = manager(&store, properties).cache("users").unwrap().unwrap();

        assert!(!users.put("42", &Option::<String>::None).await.unwrap());
        assert!(!store.exists("users::42").await.unwrap());
    }

    #[tokio::test]
    async fn test_evict_and_clear() {
        let store = InMemoryStore::new();
        store.set("other::1", json!(1), None).await.unwrap();
        let users = manager(&store, CacheProperties::default())
            .cache("users")
            .unwrap()
            .unwrap();

        users.put("1", &1).await.unwrap();
        users.put("2", &2).await.unwrap();
        users.put("3", &3).await.unwrap();

        assert!(users.evict("1").await.unwrap());
        assert!(!users.evict("1").await.unwrap());
        assert_eq!(users.clear().await.unwrap(), 2);
        assert!(store.exists("other::1").await.unwrap());
    }

    #[tokio::test]
    async fn test_runtime_creation_disabled() {
        let store = InMemoryStore::new();
        let manager = CacheManager::builder(Arc::new(store.clone()))
            .allow_runtime_creation(false)
            .initial_cache("orders#PT10M")
            .build()
            .unwrap();

        assert!(manager.cache("users").unwrap().is_none());
        let orders = manager.cache("orders").unwrap().unwrap();
        assert_eq!(orders.ttl(), Some(Duration::from_secs(600)));
        assert_eq!(manager.cache_names(), vec!["orders".to_string()]);
    }

    #[test]
    fn test_builder_rejects_malformed_initial_cache() {
        let store = InMemoryStore::new();
        let result = CacheManager::builder(Arc::new(store))
            .initial_cache("orders#PT")
            .build();

        assert!(result.is_err());
    }
}
