//! Integration tests for the coordination protocols
//!
//! These tests verify behaviour across concurrent callers:
//! - Single-flight population of a missing key
//! - Exclusion between invalidating writers and readers
//! - Double deletion against a racing repopulation
//! - Key resolution and TTL suffixes
//! - Error handling on read and write paths

use futures::future::join_all;
use ouroboros_cache::{
    CacheCoordinator, CacheError, CacheEvict, CacheProperties, CacheStore, Cacheable, CallContext,
    CoordinatorConfig, DoubleDelete, InMemoryLockService, InMemoryStore, Lookup,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    store: InMemoryStore,
    locks: InMemoryLockService,
    cache: CacheCoordinator,
}

fn harness_with(properties: CacheProperties) -> Harness {
    let store = InMemoryStore::new();
    let locks = InMemoryLockService::new();
    let cache = CacheCoordinator::builder()
        .store(Arc::new(store.clone()))
        .lock_service(Arc::new(locks.clone()))
        .properties(properties)
        .config(CoordinatorConfig::testing())
        .build()
        .unwrap();

    Harness { store, locks, cache }
}

fn harness() -> Harness {
    harness_with(CacheProperties::default())
}

fn user_42() -> CallContext {
    CallContext::new().with("id", 42)
}

#[tokio::test]
async fn test_single_flight_computes_once() {
    let h = harness();
    let computations = Arc::new(AtomicUsize::new(0));
    let read = Cacheable::new("user").key("#id").sync(true);

    let callers = (0..16).map(|_| {
        let cache = h.cache.clone();
        let read = read.clone();
        let computations = Arc::clone(&computations);
        async move {
            cache
                .cacheable(&read, &user_42(), move || async move {
                    computations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(json!({"id": 42, "name": "ada"}))
                })
                .await
        }
    });
    let results = join_all(callers).await;

    assert_eq!(computations.load(Ordering::SeqCst), 1);

    let values: Vec<_> = results
        .into_iter()
        .map(|r| r.unwrap().into_value().unwrap())
        .collect();
    assert_eq!(values.len(), 16);
    assert!(values.iter().all(|v| *v == json!({"id": 42, "name": "ada"})));

    assert!(!h.locks.is_locked("user:42:sync"));
    assert!(!h.locks.is_locked("user:42:rw"));
}

#[tokio::test]
async fn test_single_flight_across_tasks() {
    let h = harness();
    let computations = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = h.cache.clone();
            let computations = Arc::clone(&computations);
            tokio::spawn(async move {
                cache
                    .cacheable(
                        &Cacheable::new("user").key("#id").sync(true),
                        &user_42(),
                        move || async move {
                            computations.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(30)).await;
                            Ok(7_u32)
                        },
                    )
                    .await
            })
        })
        .collect();

    let mut computed = 0;
    for handle in handles {
        let lookup: Lookup<u32> = handle.await.unwrap().unwrap();
        if lookup.was_computed() {
            computed += 1;
        }
        assert_eq!(lookup.into_value(), Some(7));
    }

    assert_eq!(computed, 1);
    assert_eq!(computations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_writer_completes_before_later_reader() {
    let h = harness();
    h.store.set("user:42", json!("before"), None).await.unwrap();

    let writer = {
        let cache = h.cache.clone();
        tokio::spawn(async move {
            cache
                .evict(&CacheEvict::new("user").key("#id"), &user_42(), || async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok("after")
                })
                .await
        })
    };

    // Let the writer take the lock and start mutating
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.locks.is_locked("user:42:rw"));

    let lookup: Lookup<String> = h
        .cache
        .cacheable(&Cacheable::new("user").key("#id"), &user_42(), || async {
            Ok("unused".to_string())
        })
        .await
        .unwrap();

    // The stale value was deleted before the read was granted
    assert!(lookup.is_miss());

    let evicted = writer.await.unwrap().unwrap();
    assert_eq!(evicted.value, Some("after"));
    assert_eq!(evicted.report.deleted, 1);
}

#[tokio::test]
async fn test_writer_waits_for_readers() {
    let h = harness();
    let read = Cacheable::new("user").key("#id").sync(true);

    let reader = {
        let cache = h.cache.clone();
        let read = read.clone();
        tokio::spawn(async move {
            cache
                .cacheable(&read, &user_42(), || async {
                    tokio::time::sleep(Duration::from_millis(80)).await;
                    Ok("fresh".to_string())
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The writer queues behind the computing reader, then deletes its result
    let evicted = h
        .cache
        .evict(&CacheEvict::new("user").key("#id"), &user_42(), || async { Ok(()) })
        .await
        .unwrap();

    let lookup = reader.await.unwrap().unwrap();
    assert_eq!(lookup, Lookup::Computed("fresh".to_string()));
    assert_eq!(evicted.report.deleted, 1);
    assert!(!h.store.exists("user:42").await.unwrap());
}

#[tokio::test]
async fn test_read_behind_queued_writer_sees_invalidation() {
    let h = harness();
    let read = Cacheable::new("user").key("#id").sync(true);

    let reader = {
        let cache = h.cache.clone();
        tokio::spawn(async move {
            cache
                .cacheable(&read, &user_42(), || async {
                    tokio::time::sleep(Duration::from_millis(80)).await;
                    Ok("fresh".to_string())
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let writer = {
        let cache = h.cache.clone();
        tokio::spawn(async move {
            cache
                .evict(&CacheEvict::new("user").key("#id"), &user_42(), || async { Ok(()) })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!writer.is_finished());

    // Arrives after the write request, so it is ordered after the invalidation
    let late: Lookup<String> = h
        .cache
        .cacheable(&Cacheable::new("user").key("#id"), &user_42(), || async {
            Ok("unused".to_string())
        })
        .await
        .unwrap();
    assert!(late.is_miss());

    let lookup = reader.await.unwrap().unwrap();
    assert_eq!(lookup, Lookup::Computed("fresh".to_string()));

    let evicted = writer.await.unwrap().unwrap();
    assert_eq!(evicted.report.deleted, 1);
    assert!(!h.locks.is_locked("user:42:rw"));
}

#[tokio::test]
async fn test_double_delete_against_racing_reader() {
    let h = harness();
    h.store.set("user:42", json!("stale"), None).await.unwrap();

    let result = h
        .cache
        .double_delete(&DoubleDelete::new("user").key("#id"), &user_42(), || async {
            Ok("written")
        })
        .await
        .unwrap();

    assert_eq!(result.value, Some("written"));
    assert!(!h.store.exists("user:42").await.unwrap());

    // A reader hitting a lagging replica repopulates with stale data
    let lookup: Lookup<String> = h
        .cache
        .cacheable(&Cacheable::new("user").key("#id").sync(true), &user_42(), || async {
            Ok("stale from replica".to_string())
        })
        .await
        .unwrap();
    assert!(lookup.was_computed());
    assert!(h.store.exists("user:42").await.unwrap());

    tokio::time::sleep(h.cache.scheduler().delay() + Duration::from_millis(50)).await;
    assert!(!h.store.exists("user:42").await.unwrap());
}

#[tokio::test]
async fn test_double_delete_takes_no_lock() {
    let h = harness();
    let guard = ouroboros_cache::LockCoordinator::new(
        Arc::new(h.locks.clone()),
        CoordinatorConfig::testing(),
    )
    .acquire_write("user:42")
    .await
    .unwrap();

    let result = h
        .cache
        .double_delete(&DoubleDelete::new("user").key("#id"), &user_42(), || async { Ok(1) })
        .await
        .unwrap();

    assert_eq!(result.value, Some(1));
    guard.release().await.unwrap();
    h.cache.shutdown().await;
}

#[tokio::test]
async fn test_deleting_nothing_is_a_noop() {
    let h = harness();

    let evicted = h
        .cache
        .evict(&CacheEvict::new("user").key("#id"), &user_42(), || async { Ok(()) })
        .await
        .unwrap();
    assert_eq!(evicted.report.deleted, 0);

    let doubled = h
        .cache
        .double_delete(&DoubleDelete::new("user").key("#id"), &user_42(), || async { Ok(()) })
        .await
        .unwrap();
    assert_eq!(doubled.report.deleted, 0);
    assert_eq!(doubled.second_deletion.unwrap().wait().await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_user_42_scenario() {
    let h = harness();
    let computations = Arc::new(AtomicUsize::new(0));

    let key = h.cache.resolve("user", "#id", &user_42()).unwrap();
    assert_eq!(key.key, "user:42");
    assert_eq!(key.ttl, None);

    let counter = Arc::clone(&computations);
    let miss: Lookup<String> = h
        .cache
        .cacheable(&Cacheable::new("user").key("#id"), &user_42(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("ada".to_string())
        })
        .await
        .unwrap();
    assert!(miss.is_miss());
    assert_eq!(computations.load(Ordering::SeqCst), 0);

    let counter = Arc::clone(&computations);
    let computed: Lookup<String> = h
        .cache
        .cacheable(&Cacheable::new("user").key("#id").sync(true), &user_42(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("ada".to_string())
        })
        .await
        .unwrap();
    assert_eq!(computed, Lookup::Computed("ada".to_string()));
    assert_eq!(computations.load(Ordering::SeqCst), 1);

    assert_eq!(h.store.get("user:42").await.unwrap(), Some(json!("ada")));
    assert_eq!(h.store.ttl("user:42").await, None);
}

#[tokio::test]
async fn test_resolution_is_deterministic() {
    let h = harness();
    let args = CallContext::new()
        .with("id", 42)
        .with("user", json!({"region": "eu", "tags": ["a", "b"]}));

    let first = h.cache.resolve("user", "#user.region + ':' + #id", &args).unwrap();
    let second = h.cache.resolve("user", "#user.region + ':' + #id", &args).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.key, "user:eu:42");
}

#[tokio::test]
async fn test_ttl_suffix() {
    let h = harness();

    let key = h.cache.resolve("orders#PT30S", "#id", &user_42()).unwrap();
    assert_eq!(key.namespace, "orders");
    assert_eq!(key.ttl, Some(Duration::from_secs(30)));

    let computations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&computations);
    let result: ouroboros_cache::Result<Lookup<u32>> = h
        .cache
        .cacheable(&Cacheable::new("orders#bogus").key("#id").sync(true), &user_42(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        })
        .await;

    assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
    assert_eq!(computations.load(Ordering::SeqCst), 0);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_global_prefix_everywhere() {
    let h = harness_with(
        CacheProperties::builder()
            .use_key_prefix(true)
            .key_prefix("app1::")
            .build(),
    );

    let _: Lookup<u32> = h
        .cache
        .cacheable(&Cacheable::new("user").key("#id").sync(true), &user_42(), || async { Ok(1) })
        .await
        .unwrap();
    assert!(h.store.exists("app1::user:42").await.unwrap());

    let evicted = h
        .cache
        .evict(&CacheEvict::new("user").key("#id"), &user_42(), || async { Ok(()) })
        .await
        .unwrap();
    assert_eq!(evicted.report.pattern, "app1::user:42");
    assert_eq!(evicted.report.deleted, 1);
}

#[tokio::test]
async fn test_read_error_is_not_cached() {
    let h = harness();
    let read = Cacheable::new("user").key("#id").sync(true);

    let failed: ouroboros_cache::Result<Lookup<String>> = h
        .cache
        .cacheable(&read, &user_42(), || async { anyhow::bail!("upstream timeout") })
        .await;
    assert!(failed.unwrap_err().is_computation());
    assert!(!h.store.exists("user:42").await.unwrap());

    // The next caller computes again
    let retried: Lookup<String> = h
        .cache
        .cacheable(&read, &user_42(), || async { Ok("ada".to_string()) })
        .await
        .unwrap();
    assert!(retried.was_computed());
}

#[tokio::test]
async fn test_write_error_still_invalidates() {
    let h = harness();
    h.store.set("user:42", json!("stale"), None).await.unwrap();

    let evicted = h
        .cache
        .evict(&CacheEvict::new("user").key("#id"), &user_42(), || async {
            Err::<String, _>(anyhow::anyhow!("partial write"))
        })
        .await
        .unwrap();

    assert!(evicted.value.is_none());
    assert!(evicted.report.computation_failed);
    assert!(!h.store.exists("user:42").await.unwrap());
    assert!(!h.locks.is_locked("user:42:rw"));
}

#[tokio::test]
async fn test_interrupted_lock_wait_is_fatal() {
    let h = harness();
    h.locks.close();

    let result: ouroboros_cache::Result<Lookup<String>> = h
        .cache
        .cacheable(&Cacheable::new("user").key("#id"), &user_42(), || async {
            Ok("unused".to_string())
        })
        .await;

    assert!(matches!(
        result,
        Err(CacheError::LockAcquisitionInterrupted { .. })
    ));
}
