//! Write paths: invalidation under the namespace write lock, and double deletion
//!
//! Computation failures here are logged and suppressed. The mutation may
//! have partially applied, so invalidation always proceeds.

use crate::error::Result;
use crate::key::{CallContext, KeyResolver, ResolvedKey};
use crate::lock::LockCoordinator;
use crate::operation::{CacheEvict, DoubleDelete};
use crate::scheduler::{DeletionScheduler, ScheduledDeletion};
use crate::store::CacheStore;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// What an invalidation did to the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Pattern the deletion matched against
    pub pattern: String,

    /// Entries removed by the synchronous deletion
    pub deleted: usize,

    /// Whether the wrapped computation failed
    pub computation_failed: bool,

    pub elapsed_ms: u64,
}

impl fmt::Display for InvalidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalidated '{}': {} entries deleted in {}ms",
            self.pattern, self.deleted, self.elapsed_ms
        )?;
        if self.computation_failed {
            write!(f, " (computation failed)")?;
        }
        Ok(())
    }
}

/// Result of a write-path call
#[derive(Debug)]
pub struct Invalidated<T> {
    /// The computation's result; `None` if it failed
    pub value: Option<T>,

    pub report: InvalidationReport,

    /// The pending second deletion of a double delete
    pub second_deletion: Option<ScheduledDeletion>,
}

impl<T> Invalidated<T> {
    pub fn into_value(self) -> Option<T> {
        self.value
    }
}

/// Implements both invalidation protocols
#[derive(Clone)]
pub struct InvalidationCoordinator {
    store: Arc<dyn CacheStore>,
    locks: LockCoordinator,
    resolver: KeyResolver,
    scheduler: DeletionScheduler,
}

impl InvalidationCoordinator {
    pub fn new(
        store: Arc<dyn CacheStore>,
        locks: LockCoordinator,
        resolver: KeyResolver,
        scheduler: DeletionScheduler,
    ) -> Self {
        Self {
            store,
            locks,
            resolver,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &DeletionScheduler {
        &self.scheduler
    }

    /// Run a mutation under the namespace write lock, then delete matching entries
    ///
    /// Readers that arrive after the write lock was requested observe the
    /// cache only once the deletion has finished.
    pub async fn evict_locked<T, F, Fut>(
        &self,
        operation: &CacheEvict,
        context: &CallContext,
        compute: F,
    ) -> Result<Invalidated<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let key = self
            .resolver
            .resolve(&operation.name, &operation.key, context)?;
        let started = Instant::now();

        let write_guard = self.locks.acquire_write(&key.key).await?;

        let value = run_suppressed(&key, compute).await;
        let deleted = self.store.delete_matching(&key.key).await;

        write_guard.release_logged().await;
        let deleted = deleted?;

        let report = InvalidationReport {
            pattern: key.key.clone(),
            deleted,
            computation_failed: value.is_none(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(key = %key.key, deleted = deleted, "{}", report);

        Ok(Invalidated {
            value,
            report,
            second_deletion: None,
        })
    }

    /// Delete, run the mutation, and schedule a second delete after the configured delay
    ///
    /// Takes no lock. Returns as soon as the mutation finishes; the second
    /// deletion is already scheduled by then.
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
        let key = self
            .resolver
            .resolve(&operation.name, &operation.key, context)?;
        let started = Instant::now();

        let deleted = self.store.delete_matching(&key.key).await?;
        debug!(key = %key.key, deleted = deleted, "First deletion done");

        let value = run_suppressed(&key, compute).await;
        let second_deletion = self.scheduler.schedule(key.key.clone());

        let report = InvalidationReport {
            pattern: key.key.clone(),
            deleted,
            computation_failed: value.is_none(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            key = %key.key,
            delay_ms = self.scheduler.delay().as_millis() as u64,
            "{}, second deletion scheduled",
            report
        );

        Ok(Invalidated {
            value,
            report,
            second_deletion: Some(second_deletion),
        })
    }
}

async fn run_suppressed<T, F, Fut>(key: &ResolvedKey, compute: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    match compute().await {
        Ok(value) => Some(value),
        Err(e) => {
            error!(key = %key.key, error = %e, "Computation failed, invalidating anyway");
            None
        }
    }
}
