//! Steady traffic through a cache in front of a pooled "database"
//!
//! The cache policy comes from the environment, so the same run can be
//! repeated speed-first and contained:
//!
//! ```text
//! cargo run --example cache_containment
//! CONTAINED_CACHE=1 CACHE_MAX_LOADS=3 cargo run --example cache_containment
//! ```

use rand::Rng;
use rust_admission_system::{AdmissionError, Cache, CacheConfig, CacheError, ResourcePool};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const POOL_SIZE: usize = 5;
const QUERY_LATENCY: Duration = Duration::from_millis(200);
const ACQUIRE_TIMEOUT: Duration = Duration::from_millis(500);
const REQUESTS_PER_SECOND: u64 = 40;
const DURATION: Duration = Duration::from_secs(10);
const KEYSPACE: u32 = 500;

/// Counts of request outcomes
#[derive(Default)]
struct Outcomes {
    ok: AtomicU64,
    overloaded: AtomicU64,
    failed: AtomicU64,
}

async fn db_query(pool: &ResourcePool, item_id: u32) -> Result<String, AdmissionError> {
    pool.with_connection(Some(ACQUIRE_TIMEOUT), || async {
        tokio::time::sleep(QUERY_LATENCY).await;
        format!("{{\"item_id\":{}}}", item_id)
    })
    .await
}

async fn get_item(
    cache: Arc<Cache<String, String>>,
    pool: Arc<ResourcePool>,
    outcomes: Arc<Outcomes>,
    item_id: u32,
) {
    let start = Instant::now();
    let key = format!("item:{}", item_id);

    match cache.get(key.as_str(), || db_query(&pool, item_id)).await {
        Ok(lookup) => {
            outcomes.ok.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                "[OK] item={} hit={} latency={:.3?}",
                item_id,
                lookup.was_hit,
                start.elapsed()
            );
        }
        Err(CacheError::Loader(e)) if e.is_overload() => {
            outcomes.overloaded.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "[503] item={} database overloaded latency={:.3?}",
                item_id,
                start.elapsed()
            );
        }
        Err(e) => {
            outcomes.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!("[FAIL] item={} error={}", item_id, e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AdmissionError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = CacheConfig::from_env()?;
    let cache: Arc<Cache<String, String>> = Arc::new(Cache::new(config));
    let pool = Arc::new(ResourcePool::new(POOL_SIZE));
    let outcomes = Arc::new(Outcomes::default());

    let started = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(1000 / REQUESTS_PER_SECOND));
    let mut tasks = Vec::new();

    while started.elapsed() < DURATION {
        ticker.tick().await;
        let item_id = rand::thread_rng().gen_range(1..=KEYSPACE);
        tasks.push(tokio::spawn(get_item(
            Arc::clone(&cache),
            Arc::clone(&pool),
            Arc::clone(&outcomes),
            item_id,
        )));
    }

    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("Request task failed: {}", e);
        }
    }

    let cache_stats = cache.stats();
    let pool_stats = pool.stats();
    tracing::info!(
        "policy={} hits={} misses={} hit_rate={:.1}% entries={}",
        cache_stats.policy,
        cache_stats.hits,
        cache_stats.misses,
        cache_stats.hit_rate() * 100.0,
        cache_stats.entries
    );
    tracing::info!(
        "pool timeouts={} average_wait={:.2?}",
        pool_stats.timeout_count,
        pool_stats.average_wait
    );
    tracing::info!(
        "requests ok={} overloaded={} failed={}",
        outcomes.ok.load(Ordering::Relaxed),
        outcomes.overloaded.load(Ordering::Relaxed),
        outcomes.failed.load(Ordering::Relaxed)
    );

    Ok(())
}
