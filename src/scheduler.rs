//! Deferred deletions for the double-delete protocol

use crate::error::{CacheError, Result};
use crate::store::CacheStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the pending count when a deletion task finishes or is aborted
struct PendingSlot(Arc<Pending>);

impl Drop for PendingSlot {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Runs delayed pattern deletions on their own tasks
///
/// Scheduling returns immediately; the deletion runs after `delay` whether
/// or not anyone keeps the returned [`ScheduledDeletion`].
#[derive(Clone)]
pub struct DeletionScheduler {
    store: Arc<dyn CacheStore>,
    delay: Duration,
    pending: Arc<Pending>,
}

impl DeletionScheduler {
    pub fn new(store: Arc<dyn CacheStore>, delay: Duration) -> Self {
        Self {
            store,
            delay,
            pending: Arc::new(Pending::default()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Deletions scheduled and not yet finished
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Delete keys matching `pattern` after the configured delay
    pub fn schedule(&self, pattern: impl Into<String>) -> ScheduledDeletion {
        self.schedule_after(pattern, self.delay)
    }

    /// Delete keys matching `pattern` after `delay`
    pub fn schedule_after(&self, pattern: impl Into<String>, delay: Duration) -> ScheduledDeletion {
        let pattern = pattern.into();
        let store = Arc::clone(&self.store);

        self.pending.count.fetch_add(1, Ordering::SeqCst);
        let slot = PendingSlot(Arc::clone(&self.pending));

        debug!(pattern = %pattern, delay_ms = delay.as_millis() as u64, "Scheduled delayed deletion");

        let task_pattern = pattern.clone();
        let handle = tokio::spawn(async move {
            let _slot = slot;
            tokio::time::sleep(delay).await;

            match store.delete_matching(&task_pattern).await {
                Ok(deleted) => {
                    info!(pattern = %task_pattern, deleted = deleted, "Delayed deletion completed");
                    Ok(deleted)
                }
                Err(e) => {
                    error!(pattern = %task_pattern, error = %e, "Delayed deletion failed");
                    Err(e)
                }
            }
        });

        ScheduledDeletion { pattern, handle }
    }

    /// Wait until every scheduled deletion has finished or been cancelled
    pub async fn drain(&self) {
        loop {
            let idle = self.pending.idle.notified();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// Handle to one delayed deletion
///
/// Dropping the handle detaches; the deletion still runs.
#[derive(Debug)]
pub struct ScheduledDeletion {
    pattern: String,
    handle: JoinHandle<Result<usize>>,
}

impl ScheduledDeletion {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the deletion if it has not run yet
    pub fn cancel(&self) {
        debug!(pattern = %self.pattern, "Cancelling delayed deletion");
        self.handle.abort();
    }

    /// Wait for the deletion; `None` if it was cancelled
    pub async fn wait(self) -> Result<Option<usize>> {
        match self.handle.await {
            Ok(deleted) => deleted.map(Some),
            Err(e) if e.is_cancelled() => Ok(None),
            Err(e) => Err(CacheError::Other(format!(
                "delayed deletion of '{}' panicked: {}",
                self.pattern, e
            ))),
        }
    }
}
