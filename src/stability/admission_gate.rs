//! Fixed-capacity admission gate bounding concurrent operations

use crate::error::{AdmissionError, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Concurrency limiter shared by every caller regardless of key
///
/// At most `capacity` permits are outstanding at any instant. Waiters are
/// served in whatever order the underlying semaphore provides.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl AdmissionGate {
    /// Create a gate admitting at most `capacity` concurrent holders
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero, since such a gate would never admit anyone.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "admission gate capacity must be positive");
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Wait for a permit
    ///
    /// Dropping the returned future before it resolves takes no permit.
    pub async fn acquire(&self) -> Result<GatePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed)?;

        Ok(GatePermit { _permit: permit })
    }

    /// Take a permit only if one is free right now
    pub fn try_acquire(&self) -> Option<GatePermit> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Some(GatePermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    /// Maximum concurrent holders
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently held
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.semaphore.available_permits())
    }

    /// Refuse all current and future waiters
    ///
    /// Permits already handed out stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

/// RAII permit; the slot returns to the gate when dropped
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}
