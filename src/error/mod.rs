//! Error types for the admission system

use std::time::Duration;
use thiserror::Error;

/// Result type for admission operations
pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Errors raised by the pool and the admission gate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// Capacity stayed exhausted until the deadline elapsed
    #[error("Timed out acquiring connection after {0:?}")]
    AcquireTimeout(Duration),

    /// The pool or gate was closed while waiting, or before the call
    #[error("Admission closed")]
    Closed,

    /// Configuration could not be parsed or was out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AdmissionError {
    /// Create an invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether this error is a backpressure signal the caller should surface as overload
    pub fn is_overload(&self) -> bool {
        matches!(self, Self::AcquireTimeout(_))
    }
}

/// Errors returned by [`Cache::get`](crate::pooling::Cache::get)
///
/// The loader's own error is carried through untouched in [`CacheError::Loader`].
#[derive(Debug)]
pub enum CacheError<E> {
    /// The loader failed; nothing was stored
    Loader(E),
    /// The admission gate refused the load
    Admission(AdmissionError),
}

impl<E> CacheError<E> {
    /// Recover the loader's error, if that is what failed
    pub fn into_loader(self) -> Option<E> {
        match self {
            CacheError::Loader(e) => Some(e),
            CacheError::Admission(_) => None,
        }
    }

    /// Whether the loader itself failed
    pub fn is_loader(&self) -> bool {
        matches!(self, CacheError::Loader(_))
    }
}

impl<E> From<AdmissionError> for CacheError<E> {
    fn from(err: AdmissionError) -> Self {
        CacheError::Admission(err)
    }
}

impl<E: std::fmt::Display> std::fmt::Display for CacheError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Loader(e) => write!(f, "Loader failed: {}", e),
            CacheError::Admission(e) => write!(f, "Load not admitted: {}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CacheError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Loader(e) => Some(e),
            CacheError::Admission(e) => Some(e),
        }
    }
}
