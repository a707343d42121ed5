//! Facade wiring key resolution, locks, store and scheduler together

use crate::config::{CacheProperties, CoordinatorConfig};
use crate::error::{CacheError, Result};
use crate::invalidation::{Invalidated, InvalidationCoordinator};
use crate::key::{CallContext, KeyEvaluator, KeyResolver, ResolvedKey, TemplateEvaluator};
use crate::loader::{CacheAsideLoader, Lookup};
use crate::lock::{InMemoryLockService, LockCoordinator, LockService};
use crate::operation::{CacheEvict, Cacheable, DoubleDelete};
use crate::scheduler::DeletionScheduler;
use crate::store::{CacheStore, InMemoryStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Entry point for wrapping calls in the coordination protocols
///
/// ```rust
/// use ouroboros_cache::{Cacheable, CacheCoordinator, CallContext};
///
/// # async fn demo() -> ouroboros_cache::Result<()> {
/// let cache = CacheCoordinator::in_memory();
/// let args = CallContext::new().with("id", 42);
///
/// let user = cache
///     .cacheable(&Cacheable::new("user").key("#id").sync(true), &args, || async {
///         Ok("ada".to_string())
///     })
///     .await?;
/// assert_eq!(user.into_value(), Some("ada".to_string()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CacheCoordinator {
    store: Arc<dyn CacheStore>,
    resolver: KeyResolver,
    loader: CacheAsideLoader,
    invalidation: InvalidationCoordinator,
}

impl CacheCoordinator {
    pub fn builder() -> CacheCoordinatorBuilder {
        CacheCoordinatorBuilder::default()
    }

    /// In-process store and locks with default settings
    pub fn in_memory() -> Self {
        Self::assemble(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryLockService::new()),
            Arc::new(TemplateEvaluator::new()),
            CacheProperties::default(),
            CoordinatorConfig::default(),
        )
    }

    fn assemble(
        store: Arc<dyn CacheStore>,
        lock_service: Arc<dyn LockService>,
        evaluator: Arc<dyn KeyEvaluator>,
        properties: CacheProperties,
        config: CoordinatorConfig,
    ) -> Self {
        let resolver = KeyResolver::with_evaluator(properties, evaluator);
        let scheduler = DeletionScheduler::new(Arc::clone(&store), config.double_delete_delay);
        let locks = LockCoordinator::new(lock_service, config);

        let loader = CacheAsideLoader::new(Arc::clone(&store), locks.clone(), resolver.clone());
        let invalidation =
            InvalidationCoordinator::new(Arc::clone(&store), locks, resolver.clone(), scheduler);

        Self {
            store,
            resolver,
            loader,
            invalidation,
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn properties(&self) -> &CacheProperties {
        self.resolver.properties()
    }

    pub fn scheduler(&self) -> &DeletionScheduler {
        self.invalidation.scheduler()
    }

    /// Resolve the key a call would use, without touching the cache
    pub fn resolve(
        &self,
        name_template: &str,
        key_expression: &str,
        context: &CallContext,
    ) -> Result<ResolvedKey> {
        self.resolver.resolve(name_template, key_expression, context)
    }

    /// Locked cache-aside read; computes on a miss only in synchronized mode
    pub async fn cacheable<T, F, Fut>(
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
        self.loader.load(operation, context, compute).await
    }

    /// Mutation then invalidation under the namespace write lock
    pub async fn evict<T, F, Fut>(
        &self,
        operation: &CacheEvict,
        context: &CallContext,
        compute: F,
    ) -> Result<Invalidated<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.invalidation.evict_locked(operation, context, compute).await
    }

    /// Immediate deletion, mutation, then a delayed second deletion
    pub async fn double_delete<T, F, Fut>(
        &self,
        operation: &DoubleDelete,
        context: &CallContext,
        compute: F,
    ) -> Result<Invalidated<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.invalidation.double_delete(operation, context, compute).await
    }

    /// Wait for outstanding delayed deletions
    pub async fn shutdown(&self) {
        let pending = self.scheduler().pending();
        if pending > 0 {
            info!(pending = pending, "Waiting for delayed deletions");
        }
        self.scheduler().drain().await;
    }
}

/// Builder for [`CacheCoordinator`]
///
/// Store and lock service default to the in-memory implementations.
#[derive(Default)]
pub struct CacheCoordinatorBuilder {
    store: Option<Arc<dyn CacheStore>>,
    lock_service: Option<Arc<dyn LockService>>,
    evaluator: Option<Arc<dyn KeyEvaluator>>,
    properties: Option<CacheProperties>,
    config: Option<CoordinatorConfig>,
}

impl CacheCoordinatorBuilder {
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn lock_service(mut self, service: Arc<dyn LockService>) -> Self {
        self.lock_service = Some(service);
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn KeyEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn properties(mut self, properties: CacheProperties) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<CacheCoordinator> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let properties = self.properties.unwrap_or_default();
        if properties.use_key_prefix && properties.key_prefix.is_none() {
            return Err(CacheError::InvalidConfiguration(
                "use_key_prefix is set but no key_prefix is configured".to_string(),
            ));
        }

        Ok(CacheCoordinator::assemble(
            self.store
                .unwrap_or_else(|| Arc::new(InMemoryStore::new())),
            self.lock_service
                .unwrap_or_else(|| Arc::new(InMemoryLockService::new())),
            self.evaluator
                .unwrap_or_else(|| Arc::new(TemplateEvaluator::new())),
            properties,
            config,
        ))
    }
}
