//! Advisory locking over a shared lock service
//!
//! The coordinators use two kinds of named locks per cache key:
//! - a read/write pair (`<key>:rw`) separating cache readers from invalidating writers
//! - a point mutex (`<key>:sync`) giving single-flight population
//!
//! All locks are advisory: only callers going through [`LockCoordinator`]
//! are excluded from each other.

pub mod coordinator;
pub mod memory;

pub use coordinator::{LockCoordinator, LockGuard};
pub use memory::InMemoryLockService;

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Kind of lock a lease was granted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// Shared side of a read/write lock
    Read,
    /// Exclusive side of a read/write lock
    Write,
    /// Standalone point mutex
    Exclusive,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKind::Read => write!(f, "read"),
            LockKind::Write => write!(f, "write"),
            LockKind::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// Proof of one successful acquisition
///
/// Releasing requires the lease, so a caller can only free what it acquired,
/// and a lease can be released at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub name: String,
    pub kind: LockKind,
    pub id: Uuid,
    pub acquired_at: Instant,
}

impl LockLease {
    pub fn new(name: impl Into<String>, kind: LockKind) -> Self {
        Self {
            name: name.into(),
            kind,
            id: Uuid::new_v4(),
            acquired_at: Instant::now(),
        }
    }

    /// How long the lease has been held
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

/// Named shared/exclusive mutex factory
///
/// `try_*` methods never block. `acquire_write` waits until granted, until
/// `max_wait` elapses (`Ok(None)`), or until the service gives up on the
/// waiter (`LockAcquisitionInterrupted`).
#[async_trait]
pub trait LockService: Send + Sync {
    /// Take a shared lock unless a writer holds or is waiting for it
    async fn try_acquire_read(&self, name: &str) -> Result<Option<LockLease>>;

    /// Take the exclusive side of a read/write lock without waiting
    async fn try_acquire_write(&self, name: &str) -> Result<Option<LockLease>>;

    /// Wait for the exclusive side of a read/write lock
    async fn acquire_write(&self, name: &str, max_wait: Option<Duration>) -> Result<Option<LockLease>>;

    /// Take a point mutex without waiting
    async fn try_acquire(&self, name: &str) -> Result<Option<LockLease>>;

    /// Release a lease; returns `false` if it was not (or no longer) held
    async fn release(&self, lease: &LockLease) -> Result<bool>;
}
