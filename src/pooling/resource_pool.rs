//! Bounded resource pool with observable queueing and bounded-wait acquisition

use crate::error::{AdmissionError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections held at once
    pub capacity: usize,
    /// Deadline used by [`ResourcePool::checkout`]; `None` waits forever
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            acquire_timeout: Some(Duration::from_millis(500)),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set pool capacity
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the default acquire deadline
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Counters guarded by the pool lock
#[derive(Debug, Default)]
struct PoolState {
    active: usize,
    waiting: usize,
    timeout_count: u64,
    acquire_count: u64,
    total_wait: Duration,
}

impl PoolState {
    fn finish_wait(&mut self, waited: Duration) {
        self.waiting -= 1;
        self.acquire_count += 1;
        self.total_wait += waited;
    }

    /// Leave the queue without recording a wait
    fn leave_queue(&mut self) {
        self.waiting -= 1;
    }
}

/// How a wait in [`ResourcePool::acquire`] ended
enum WaitOutcome {
    Admitted,
    TimedOut,
    Refused,
}

/// Tracks one caller in the `waiting` count
///
/// Dropping an unsettled guard (the acquire future was cancelled) still
/// takes the caller back out of `waiting`.
struct WaitGuard<'a> {
    state: &'a Mutex<PoolState>,
    started: Instant,
    settled: bool,
}

impl<'a> WaitGuard<'a> {
    fn enter(state: &'a Mutex<PoolState>) -> Self {
        state.lock().waiting += 1;
        Self {
            state,
            started: Instant::now(),
            settled: false,
        }
    }

    fn settle(mut self, outcome: WaitOutcome) {
        {
            let mut state = self.state.lock();
            match outcome {
                WaitOutcome::Admitted => {
                    state.finish_wait(self.started.elapsed());
                    state.active += 1;
                }
                WaitOutcome::TimedOut => {
                    state.finish_wait(self.started.elapsed());
                    state.timeout_count += 1;
                }
                // A closed pool refuses rather than serves, so it is not a wait
                WaitOutcome::Refused => state.leave_queue(),
            }
        }
        self.settled = true;
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.state.lock().finish_wait(self.started.elapsed());
        }
    }
}

/// Pool bounding how many logical connections may be held concurrently
///
/// Connections are plain slots: the pool hands out [`ConnectionHandle`]s and
/// the caller does the guarded work while holding one.
pub struct ResourcePool {
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    state: Arc<Mutex<PoolState>>,
    next_id: AtomicU64,
}

impl ResourcePool {
    /// Create a pool with the given capacity and default settings otherwise
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self::with_config(PoolConfig::new().with_capacity(capacity))
    }

    /// Create a pool from a configuration
    ///
    /// # Panics
    ///
    /// Panics if `config.capacity` is zero.
    pub fn with_config(config: PoolConfig) -> Self {
        assert!(config.capacity > 0, "pool capacity must be positive");
        Self {
            semaphore: Arc::new(Semaphore::new(config.capacity)),
            config,
            state: Arc::new(Mutex::new(PoolState::default())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Acquire a connection, waiting at most `deadline` if one is given
    ///
    /// On timeout the caller holds nothing and `timeout_count` is bumped.
    /// Dropping the returned future while it waits leaves every counter as
    /// it would have been without the call.
    pub async fn acquire(&self, deadline: Option<Duration>) -> Result<ConnectionHandle> {
        let wait = WaitGuard::enter(&self.state);

        let acquired = match deadline {
            None => self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| AdmissionError::Closed),
            Some(limit) => {
                match tokio::time::timeout(limit, self.semaphore.clone().acquire_owned()).await {
                    Ok(permit) => permit.map_err(|_| AdmissionError::Closed),
                    Err(_) => Err(AdmissionError::AcquireTimeout(limit)),
                }
            }
        };

        let permit = match acquired {
            Ok(permit) => permit,
            Err(err) => {
                let outcome = if err.is_overload() {
                    WaitOutcome::TimedOut
                } else {
                    WaitOutcome::Refused
                };
                wait.settle(outcome);

                if err.is_overload() {
                    let state = self.state.lock();
                    tracing::warn!(
                        "Pool acquire timed out: capacity={} active={} waiting={} timeouts={}",
                        self.config.capacity,
                        state.active,
                        state.waiting,
                        state.timeout_count
                    );
                }
                return Err(err);
            }
        };

        wait.settle(WaitOutcome::Admitted);
        Ok(self.handle(permit))
    }

    /// Acquire using the configured [`PoolConfig::acquire_timeout`]
    pub async fn checkout(&self) -> Result<ConnectionHandle> {
        self.acquire(self.config.acquire_timeout).await
    }

    /// Take a connection only if one is free right now
    ///
    /// Never counts as waiting and never times out.
    pub fn try_acquire(&self) -> Option<ConnectionHandle> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        self.state.lock().active += 1;
        Some(self.handle(permit))
    }

    /// Run `f` while holding a connection
    ///
    /// The connection is released once the future finishes, fails, panics or
    /// is dropped.
    pub async fn with_connection<F, Fut, T>(&self, deadline: Option<Duration>, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _conn = self.acquire(deadline).await?;
        Ok(f().await)
    }

    fn handle(&self, permit: OwnedSemaphorePermit) -> ConnectionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Connection {} acquired", id);
        ConnectionHandle {
            id,
            permit: Some(permit),
            state: Arc::clone(&self.state),
            acquired_at: Instant::now(),
        }
    }

    /// Maximum concurrent holders
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Connections currently checked out
    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    /// Callers currently blocked in [`acquire`](Self::acquire)
    pub fn waiting(&self) -> usize {
        self.state.lock().waiting
    }

    /// Acquisitions that exceeded their deadline
    pub fn timeout_count(&self) -> u64 {
        self.state.lock().timeout_count
    }

    /// Mean time spent waiting per finished acquire attempt
    pub fn average_wait(&self) -> Duration {
        self.stats().average_wait
    }

    /// Get a consistent snapshot of the pool counters
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let average_wait = if state.acquire_count == 0 {
            Duration::ZERO
        } else {
            state.total_wait.div_f64(state.acquire_count as f64)
        };

        PoolStats {
            capacity: self.config.capacity,
            active: state.active,
            waiting: state.waiting,
            timeout_count: state.timeout_count,
            acquire_count: state.acquire_count,
            average_wait,
        }
    }

    /// Refuse all current and future waiters
    ///
    /// Connections already handed out can still be released.
    pub fn close(&self) {
        self.semaphore.close();
        tracing::info!("Pool closed with {} connections checked out", self.active());
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

impl Drop for ResourcePool {
    fn drop(&mut self) {
        let state = self.state.lock();
        if state.active > 0 {
            tracing::warn!(
                "ResourcePool dropped with {} connections still checked out",
                state.active
            );
        }
    }
}

/// A checked-out connection
///
/// Released on [`release`](Self::release) or on drop, whichever comes first.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: u64,
    permit: Option<OwnedSemaphorePermit>,
    state: Arc<Mutex<PoolState>>,
    acquired_at: Instant,
}

impl ConnectionHandle {
    /// Pool-unique handle id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Time since the connection was acquired
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Whether the slot has already been given back
    pub fn is_released(&self) -> bool {
        self.permit.is_none()
    }

    /// Return the slot to the pool; later calls do nothing
    pub fn release(&mut self) {
        if let Some(permit) = self.permit.take() {
            // active must drop before the permit wakes the next waiter
            self.state.lock().active -= 1;
            drop(permit);
            tracing::debug!("Connection {} released after {:?}", self.id, self.held_for());
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    /// Maximum pool size
    pub capacity: usize,
    /// Connections currently checked out
    pub active: usize,
    /// Callers currently waiting
    pub waiting: usize,
    /// Acquisitions that hit their deadline
    pub timeout_count: u64,
    /// Finished waits: admitted, timed out, or cancelled
    ///
    /// Attempts refused by a closed pool and [`ResourcePool::try_acquire`]
    /// calls are not counted.
    pub acquire_count: u64,
    /// Mean wait per finished attempt
    pub average_wait: Duration,
}

impl PoolStats {
    /// Fraction of capacity in use
    pub fn utilization(&self) -> f64 {
        self.active as f64 / self.capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creation() {
        let pool = ResourcePool::new(3);

        let stats = pool.stats();
        assert_eq!(stats.capacity, 3);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.timeout_count, 0);
        assert_eq!(stats.average_wait, Duration::ZERO);
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn test_zero_capacity_rejected() {
        let _ = ResourcePool::new(0);
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let pool = ResourcePool::new(2);

        let mut conn = pool.acquire(None).await.unwrap();
        assert_eq!(pool.active(), 1);
        assert!(!conn.is_released());

        conn.release();
        assert!(conn.is_released());
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.stats().acquire_count, 1);
    }

    #[tokio::test]
    async fn test_double_release_is_noop() {
        let pool = ResourcePool::new(2);

        let mut conn1 = pool.acquire(None).await.unwrap();
        let _conn2 = pool.acquire(None).await.unwrap();
        assert_eq!(pool.active(), 2);

        conn1.release();
        conn1.release();
        drop(conn1);

        assert_eq!(pool.active(), 1);
        // Only one slot came back
        assert!(pool.try_acquire().is_some());
        let _conn3 = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let pool = ResourcePool::new(1);
        {
            let _conn = pool.acquire(None).await.unwrap();
            assert_eq!(pool.active(), 1);
        }
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test]
    async fn test_timeout_when_exhausted() {
        let pool = ResourcePool::new(1);
        let _held = pool.acquire(None).await.unwrap();

        let result = pool.acquire(Some(Duration::from_millis(50))).await;
        assert_eq!(
            result.unwrap_err(),
            AdmissionError::AcquireTimeout(Duration::from_millis(50))
        );

        assert_eq!(pool.timeout_count(), 1);
        assert_eq!(pool.active(), 1);
        assert_eq!(pool.waiting(), 0);
        assert!(pool.average_wait() > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_checkout_uses_configured_timeout() {
        let config = PoolConfig::new()
            .with_capacity(1)
            .with_acquire_timeout(Some(Duration::from_millis(30)));
        let pool = ResourcePool::with_config(config);

        let _held = pool.checkout().await.unwrap();
        let result = pool.checkout().await;
        assert!(matches!(result, Err(AdmissionError::AcquireTimeout(_))));
    }

    #[tokio::test]
    async fn test_try_acquire_does_not_wait() {
        let pool = ResourcePool::new(1);

        let held = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.waiting(), 0);
        assert_eq!(pool.timeout_count(), 0);
        assert_eq!(pool.stats().acquire_count, 0);

        drop(held);
        assert!(pool.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_wait_restores_counters() {
        let pool = ResourcePool::new(1);
        let _held = pool.acquire(None).await.unwrap();

        // The outer timeout drops the inner acquire future mid-wait
        let abandoned = tokio::time::timeout(Duration::from_millis(30), pool.acquire(None)).await;
        assert!(abandoned.is_err());

        assert_eq!(pool.waiting(), 0);
        assert_eq!(pool.active(), 1);
        assert_eq!(pool.timeout_count(), 0);
    }

    #[tokio::test]
    async fn test_with_connection_releases_after_work() {
        let pool = ResourcePool::new(1);

        let value = pool
            .with_connection(None, || async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err::<u32, &str>("query failed")
            })
            .await
            .unwrap();

        assert_eq!(value, Err("query failed"));
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test]
    async fn test_close_refuses_waiters() {
        let pool = Arc::new(ResourcePool::new(1));
        let mut held = pool.acquire(None).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(None).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.waiting(), 1);

        pool.close();
        assert!(pool.is_closed());
        assert_eq!(waiter.await.unwrap(), Err(AdmissionError::Closed));
        assert_eq!(pool.waiting(), 0);
        assert_eq!(pool.timeout_count(), 0);

        held.release();
        assert_eq!(pool.active(), 0);
        assert!(pool.acquire(None).await.is_err());
    }

    #[tokio::test]
    async fn test_refused_acquire_not_counted_as_wait() {
        let pool = ResourcePool::new(1);
        drop(pool.acquire(None).await.unwrap());
        let before = pool.stats();
        assert_eq!(before.acquire_count, 1);

        pool.close();
        assert_eq!(pool.acquire(None).await.err(), Some(AdmissionError::Closed));
        assert_eq!(
            pool.acquire(Some(Duration::from_millis(10))).await.err(),
            Some(AdmissionError::Closed)
        );

        let after = pool.stats();
        assert_eq!(after.acquire_count, 1);
        assert_eq!(after.average_wait, before.average_wait);
        assert_eq!(after.waiting, 0);
        assert_eq!(after.timeout_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let pool = Arc::new(ResourcePool::new(3));

        let mut handles = vec![];
        for _ in 0..10 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                let _conn = pool.acquire(None).await.unwrap();
                assert!(pool.active() <= 3);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.acquire_count, 10);
    }

    #[test]
    fn test_stats_utilization() {
        let pool = ResourcePool::new(4);
        let _a = pool.try_acquire().unwrap();
        let _b = pool.try_acquire().unwrap();

        assert!((pool.stats().utilization() - 0.5).abs() < f64::EPSILON);
    }
}
