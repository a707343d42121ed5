//! # Ouroboros Cache (ouroboros-cache)
//!
//! Coordinates reads and writes against a shared key-value cache so that
//! concurrent callers do not duplicate expensive work and the cache stays
//! consistent with the system of record.
//!
//! ## Features
//!
//! - Locked cache-aside reads with single-flight population
//! - Write-then-invalidate under an exclusive namespace lock
//! - Delayed double deletion for replication lag
//! - `name#<ISO-8601>` per-cache TTL and a global key prefix
//! - Async-first design using tokio
//! - Pluggable store, lock service and key evaluator
//!
//! ## Read Path
//! On a miss in synchronized mode exactly one caller computes; the others
//! wait for the value to appear in the cache.
//!
//! ```no_run
//! use ouroboros_cache::{CacheCoordinator, Cacheable, CallContext};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheCoordinator::in_memory();
//!     let args = CallContext::new().with("id", 42);
//!
//!     let user = cache
//!         .cacheable(&Cacheable::new("user").key("#id").sync(true), &args, || async {
//!             Ok(String::from("ada"))
//!         })
//!         .await?;
//!     println!("user:42 = {:?}", user.value());
//!     Ok(())
//! }
//! ```
//!
//! ## Write Paths
//!
//! ```no_run
//! use ouroboros_cache::{CacheCoordinator, CacheEvict, CallContext, DoubleDelete};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheCoordinator::in_memory();
//!     let args = CallContext::new().with("id", 42);
//!
//!     // Readers of user:42 wait until the mutation and deletion are done
//!     cache
//!         .evict(&CacheEvict::new("user").key("#id"), &args, || async { Ok(()) })
//!         .await?;
//!
//!     // Deleted now and again one second later
//!     let result = cache
//!         .double_delete(&DoubleDelete::new("user").key("#id"), &args, || async { Ok(()) })
//!         .await?;
//!     println!("{}", result.report);
//!
//!     cache.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod invalidation;
pub mod key;
pub mod loader;
pub mod lock;
pub mod manager;
pub mod operation;
pub mod scheduler;
pub mod store;

// Re-export main types for convenience
pub use config::{CacheProperties, CachePropertiesBuilder, CoordinatorConfig, CoordinatorConfigBuilder};
pub use coordinator::{CacheCoordinator, CacheCoordinatorBuilder};
pub use error::{CacheError, Result};
pub use invalidation::{Invalidated, InvalidationCoordinator, InvalidationReport};
pub use key::{CallContext, KeyEvaluator, KeyResolver, ResolvedKey, TemplateEvaluator};
pub use loader::{CacheAsideLoader, Lookup};
pub use lock::{InMemoryLockService, LockCoordinator, LockGuard, LockKind, LockLease, LockService};
pub use manager::{CacheManager, CacheManagerBuilder, NamedCache};
pub use operation::{CacheEvict, Cacheable, DoubleDelete};
pub use scheduler::{DeletionScheduler, ScheduledDeletion};
pub use store::{CacheStats, CacheStore, InMemoryStore};
