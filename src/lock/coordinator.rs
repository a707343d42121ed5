//! Lock acquisition policy (polling, bounded waits) and scoped lock guards

use crate::config::CoordinatorConfig;
use crate::error::{CacheError, Result};
use crate::key::{lock_name, RW_LOCK_SUFFIX};
use crate::lock::{LockKind, LockLease, LockService};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Acquires namespace and single-flight locks on behalf of the protocols
///
/// Read acquisition polls the service with `poll_interval` backoff; write
/// acquisition waits on the service. Both are unbounded unless
/// `max_wait` is configured, in which case they fail with
/// [`CacheError::LockTimeout`].
#[derive(Clone)]
pub struct LockCoordinator {
    service: Arc<dyn LockService>,
    config: CoordinatorConfig,
}

impl LockCoordinator {
    pub fn new(service: Arc<dyn LockService>, config: CoordinatorConfig) -> Self {
        Self { service, config }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Take the shared side of `<namespace>:rw`, polling while a writer holds it
    pub async fn acquire_read(&self, namespace: &str) -> Result<LockGuard> {
        let name = lock_name(namespace, RW_LOCK_SUFFIX);
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            if let Some(lease) = self.service.try_acquire_read(&name).await? {
                debug!(lock = %name, attempts = attempts, "Read lock acquired");
                return Ok(self.guard(lease));
            }

            attempts += 1;
            if let Some(max_wait) = self.config.max_wait {
                if started.elapsed() >= max_wait {
                    warn!(lock = %name, attempts = attempts, "Gave up waiting for read lock");
                    return Err(CacheError::LockTimeout {
                        lock: name,
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }

            trace!(lock = %name, attempt = attempts, "Read lock busy, backing off");
            tokio::time::sleep(self.config.poll_delay()).await;
        }
    }

    /// Take the exclusive side of `<namespace>:rw`
    pub async fn acquire_write(&self, namespace: &str) -> Result<LockGuard> {
        let name = lock_name(namespace, RW_LOCK_SUFFIX);
        let started = Instant::now();

        match self.service.acquire_write(&name, self.config.max_wait).await? {
            Some(lease) => {
                debug!(
                    lock = %name,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Write lock acquired"
                );
                Ok(self.guard(lease))
            }
            None => {
                warn!(lock = %name, "Gave up waiting for write lock");
                Err(CacheError::LockTimeout {
                    lock: name,
                    waited_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }

    /// Try the point mutex `<namespace>:<suffix>` once without waiting
    pub async fn try_acquire_exclusive(
        &self,
        namespace: &str,
        suffix: &str,
    ) -> Result<Option<LockGuard>> {
        let name = lock_name(namespace, suffix);
        let lease = self.service.try_acquire(&name).await?;

        match &lease {
            Some(_) => debug!(lock = %name, "Exclusive lock acquired"),
            None => trace!(lock = %name, "Exclusive lock held elsewhere"),
        }
        Ok(lease.map(|lease| self.guard(lease)))
    }

    fn guard(&self, lease: LockLease) -> LockGuard {
        LockGuard {
            service: Arc::clone(&self.service),
            lease: Some(lease),
        }
    }
}

/// A held lock
///
/// Call [`LockGuard::release`] on every path. A guard dropped while still
/// held (panic, cancelled future) releases on a spawned task instead.
pub struct LockGuard {
    service: Arc<dyn LockService>,
    lease: Option<LockLease>,
}

impl LockGuard {
    pub fn name(&self) -> &str {
        self.lease.as_ref().map(|lease| lease.name.as_str()).unwrap_or("")
    }

    pub fn kind(&self) -> Option<LockKind> {
        self.lease.as_ref().map(|lease| lease.kind)
    }

    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        let Some(lease) = self.lease.take() else {
            return Ok(());
        };

        let held_ms = lease.held_for().as_millis() as u64;
        if self.service.release(&lease).await? {
            debug!(lock = %lease.name, kind = %lease.kind, held_ms = held_ms, "Lock released");
        }
        Ok(())
    }

    /// Release, logging instead of returning a failure
    ///
    /// For paths that already carry a more important outcome.
    pub async fn release_logged(self) {
        let name = self.name().to_string();
        if let Err(e) = self.release().await {
            warn!(lock = %name, error = %e, "Failed to release lock");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };

        warn!(lock = %lease.name, kind = %lease.kind, "Lock guard dropped while held, releasing in background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let service = Arc::clone(&self.service);
                handle.spawn(async move {
                    if let Err(e) = service.release(&lease).await {
                        warn!(lock = %lease.name, error = %e, "Background lock release failed");
                    }
                });
            }
            Err(_) => {
                warn!(lock = %lease.name, "No runtime available, lock left to the service");
            }
        }
    }
}
