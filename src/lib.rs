//! Rust Admission System
//!
//! Two admission-control primitives that keep a scarce downstream resource
//! from being overloaded.
//!
//! ## Features
//!
//! - [`ResourcePool`]: bounded concurrent connections with observable
//!   active/waiting counts and deadline-bounded acquisition
//! - [`Cache`]: loading cache whose misses either run immediately
//!   ([`CachePolicy::SpeedFirst`]) or pass a shared [`AdmissionGate`]
//!   ([`CachePolicy::Contained`])
//! - Serializable statistics snapshots for health endpoints
//!
//! ## Example
//!
//! ```no_run
//! use rust_admission_system::{Cache, ResourcePool};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = ResourcePool::new(5);
//!     let cache: Cache<String, String> = Cache::contained(2);
//!
//!     let lookup = cache
//!         .get("item:7", || async {
//!             pool.with_connection(Some(Duration::from_millis(500)), || async {
//!                 "row 7".to_string()
//!             })
//!             .await
//!         })
//!         .await?;
//!
//!     println!("{} (hit: {})", lookup.value, lookup.was_hit);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod pooling;
pub mod stability;

// Re-export main types
pub use error::{AdmissionError, CacheError, Result};
pub use pooling::{
    Cache, CacheConfig, CachePolicy, CacheStats, ConnectionHandle, Lookup, PoolConfig, PoolStats,
    ResourcePool,
};
pub use stability::{AdmissionGate, GatePermit};
