//! Burst of simulated database queries against a small connection pool
//!
//! Shows queueing and timeouts as the burst outruns pool capacity.
//! Run with `RUST_LOG=info cargo run --example pool_harness`.

use rand::Rng;
use rust_admission_system::{AdmissionError, PoolConfig, ResourcePool};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const POOL_SIZE: usize = 5;
const QUERY_LATENCY: Duration = Duration::from_millis(500);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(1);
const TOTAL_REQUESTS: usize = 30;

async fn simulated_query(pool: Arc<ResourcePool>, request_id: usize) {
    let start = Instant::now();

    let result = pool
        .with_connection(Some(ACQUIRE_TIMEOUT), || tokio::time::sleep(QUERY_LATENCY))
        .await;

    match result {
        Ok(()) => tracing::info!(
            "[OK] request={:02} elapsed={:.2?} active={} waiting={}",
            request_id,
            start.elapsed(),
            pool.active(),
            pool.waiting()
        ),
        Err(AdmissionError::AcquireTimeout(_)) => tracing::warn!(
            "[TIMEOUT] request={:02} elapsed={:.2?} active={} waiting={}",
            request_id,
            start.elapsed(),
            pool.active(),
            pool.waiting()
        ),
        Err(e) => tracing::error!("[FAIL] request={:02} error={}", request_id, e),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let pool = Arc::new(ResourcePool::with_config(
        PoolConfig::new()
            .with_capacity(POOL_SIZE)
            .with_acquire_timeout(Some(ACQUIRE_TIMEOUT)),
    ));

    // Periodic pool state makes saturation visible over time
    let monitor = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(200));
            loop {
                interval.tick().await;
                let stats = pool.stats();
                tracing::info!(
                    "[POOL] active={} waiting={} timeouts={}",
                    stats.active,
                    stats.waiting,
                    stats.timeout_count
                );
            }
        })
    };

    let mut tasks = Vec::with_capacity(TOTAL_REQUESTS);
    for request_id in 0..TOTAL_REQUESTS {
        tasks.push(tokio::spawn(simulated_query(Arc::clone(&pool), request_id)));

        let jitter = rand::thread_rng().gen_range(10..50);
        tokio::time::sleep(Duration::from_millis(jitter)).await;
    }

    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("Query task failed: {}", e);
        }
    }
    monitor.abort();

    let stats = pool.stats();
    println!("\n--- Summary ---");
    println!("Max connections : {}", stats.capacity);
    println!("Total requests  : {}", TOTAL_REQUESTS);
    println!("Timeouts        : {}", stats.timeout_count);
    println!("Average wait    : {:.2?}", stats.average_wait);
}
