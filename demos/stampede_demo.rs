//! Cache Stampede Demo
//!
//! Fires a burst of concurrent reads at one uncached key, then shows both
//! invalidation protocols.
//!
//! Usage:
//!   cargo run --example stampede_demo
//!
//! Environment variables:
//!   CACHE_USE_KEY_PREFIX - prefix every key (default: false)
//!   CACHE_KEY_PREFIX     - the prefix itself
//!   CACHE_NULL_VALUES    - cache null results (default: true)
//!   CACHE_TIME_TO_LIVE   - default TTL as ISO-8601, e.g. PT10M
//!   RUST_LOG             - log filter (default: ouroboros_cache=debug)

use futures::future::join_all;
use ouroboros_cache::{
    CacheCoordinator, CacheEvict, CacheProperties, Cacheable, CallContext, CoordinatorConfig,
    DoubleDelete, Lookup,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CALLERS: usize = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ouroboros_cache=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Cache Stampede Demo ===");

    let properties = CacheProperties::from_env()?;
    let config = CoordinatorConfig::builder()
        .poll_interval(Duration::from_millis(20))
        .poll_jitter(0.25)
        .double_delete_delay(Duration::from_millis(500))
        .build()?;
    let cache = CacheCoordinator::builder()
        .properties(properties)
        .config(config)
        .build()?;

    let computations = Arc::new(AtomicUsize::new(0));
    let read = Cacheable::new("report#PT5M").key("'daily-' + #day").sync(true);
    let args = CallContext::new().with("day", "2024-06-01");

    info!("\n--- {} concurrent reads of one uncached key ---", CALLERS);
    let started = Instant::now();
    let readers = (0..CALLERS).map(|_| {
        let cache = cache.clone();
        let read = read.clone();
        let args = args.clone();
        let computations = Arc::clone(&computations);
        async move {
            cache
                .cacheable(&read, &args, move || async move {
                    computations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(vec![12_u64, 7, 31])
                })
                .await
        }
    });

    let results = join_all(readers).await;
    let computed = results
        .iter()
        .filter(|r| matches!(r, Ok(Lookup::Computed(_))))
        .count();
    info!(
        "{} callers served in {}ms; computation ran {} time(s), {} caller(s) computed",
        results.len(),
        started.elapsed().as_millis(),
        computations.load(Ordering::SeqCst),
        computed
    );

    info!("\n--- Write then invalidate under the namespace lock ---");
    let key = cache.resolve(&read.name, &read.key, &args)?;
    let evicted = cache
        .evict(
            &CacheEvict::new("report").key("'daily-' + #day"),
            &args,
            || async { Ok("recalculated") },
        )
        .await?;
    info!("{} -> {}", key, evicted.report);

    info!("\n--- Double deletion ---");
    let result = cache
        .double_delete(
            &DoubleDelete::new("report").key("'daily-' + #day"),
            &args,
            || async { Err::<(), _>(anyhow::anyhow!("replica write rejected")) },
        )
        .await?;
    info!("{}", result.report);

    cache.shutdown().await;
    info!("=== Demo complete ===");
    Ok(())
}
