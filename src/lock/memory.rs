//! In-process lock service
//!
//! Writer-preferring: once a writer is waiting on a read/write lock, new
//! readers are refused until it has acquired and released. This is what lets
//! an invalidation finish before readers that arrived after it.

use crate::error::{CacheError, Result};
use crate::lock::{LockKind, LockLease, LockService};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct LockState {
    readers: HashSet<Uuid>,
    writer: Option<Uuid>,
    waiting_writers: usize,
}

impl LockState {
    fn is_idle(&self) -> bool {
        self.readers.is_empty() && self.writer.is_none() && self.waiting_writers == 0
    }
}

#[derive(Default)]
struct Inner {
    locks: Mutex<HashMap<String, LockState>>,
    released: Notify,
    closed: AtomicBool,
}

/// In-memory [`LockService`] for tests and single-process deployments
#[derive(Clone, Default)]
pub struct InMemoryLockService {
    inner: Arc<Inner>,
}

/// Decrements the waiting-writer count however the wait ends
struct PendingWriter<'a> {
    inner: &'a Inner,
    name: &'a str,
}

impl Drop for PendingWriter<'_> {
    fn drop(&mut self) {
        let mut locks = self.inner.locks.lock();
        if let Some(state) = locks.get_mut(self.name) {
            state.waiting_writers = state.waiting_writers.saturating_sub(1);
            if state.is_idle() {
                locks.remove(self.name);
            }
        }
    }
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop granting locks; pending and future acquisitions are interrupted
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.released.notify_waiters();
        debug!("Lock service closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Whether anything currently holds `name`
    pub fn is_locked(&self, name: &str) -> bool {
        let locks = self.inner.locks.lock();
        locks
            .get(name)
            .map(|state| state.writer.is_some() || !state.readers.is_empty())
            .unwrap_or(false)
    }

    /// Number of shared holders of `name`
    pub fn reader_count(&self, name: &str) -> usize {
        let locks = self.inner.locks.lock();
        locks.get(name).map(|state| state.readers.len()).unwrap_or(0)
    }

    fn check_open(&self, name: &str) -> Result<()> {
        if self.is_closed() {
            return Err(CacheError::LockAcquisitionInterrupted {
                lock: name.to_string(),
            });
        }
        Ok(())
    }

    fn take_exclusive(&self, name: &str, kind: LockKind) -> Option<LockLease> {
        let mut locks = self.inner.locks.lock();
        let state = locks.entry(name.to_string()).or_default();
        if state.writer.is_some() || !state.readers.is_empty() {
            return None;
        }

        let lease = LockLease::new(name, kind);
        state.writer = Some(lease.id);
        Some(lease)
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn try_acquire_read(&self, name: &str) -> Result<Option<LockLease>> {
        self.check_open(name)?;

        let mut locks = self.inner.locks.lock();
        let state = locks.entry(name.to_string()).or_default();
        if state.writer.is_some() || state.waiting_writers > 0 {
            return Ok(None);
        }

        let lease = LockLease::new(name, LockKind::Read);
        state.readers.insert(lease.id);
        Ok(Some(lease))
    }

    async fn try_acquire_write(&self, name: &str) -> Result<Option<LockLease>> {
        self.check_open(name)?;
        Ok(self.take_exclusive(name, LockKind::Write))
    }

    async fn acquire_write(&self, name: &str, max_wait: Option<Duration>) -> Result<Option<LockLease>> {
        self.check_open(name)?;

        {
            let mut locks = self.inner.locks.lock();
            locks.entry(name.to_string()).or_default().waiting_writers += 1;
        }
        let _pending = PendingWriter {
            inner: &self.inner,
            name,
        };

        let deadline = max_wait.map(|wait| tokio::time::Instant::now() + wait);

        loop {
            // Register for wakeups before checking so a release in between is not lost
            let released = self.inner.released.notified();

            self.check_open(name)?;
            if let Some(lease) = self.take_exclusive(name, LockKind::Write) {
                return Ok(Some(lease));
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, released).await.is_err() {
                        debug!(lock = %name, "Write lock wait timed out");
                        return Ok(None);
                    }
                }
                None => released.await,
            }
        }
    }

    async fn try_acquire(&self, name: &str) -> Result<Option<LockLease>> {
        self.check_open(name)?;
        Ok(self.take_exclusive(name, LockKind::Exclusive))
    }

    async fn release(&self, lease: &LockLease) -> Result<bool> {
        let released = {
            let mut locks = self.inner.locks.lock();
            let Some(state) = locks.get_mut(&lease.name) else {
                return Ok(false);
            };

            let released = match lease.kind {
                LockKind::Read => state.readers.remove(&lease.id),
                LockKind::Write | LockKind::Exclusive => {
                    if state.writer == Some(lease.id) {
                        state.writer = None;
                        true
                    } else {
                        false
                    }
                }
            };

            if state.is_idle() {
                locks.remove(&lease.name);
            }
            released
        };

        if released {
            self.inner.released.notify_waiters();
        } else {
            warn!(lock = %lease.name, kind = %lease.kind, "Release of a lease that is not held");
        }
        Ok(released)
    }
}
