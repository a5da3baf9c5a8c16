//! Admission-controlled resource pooling and caching

pub mod cache;
pub mod resource_pool;

pub use cache::{Cache, CacheConfig, CachePolicy, CacheStats, Lookup, DEFAULT_MAX_LOADS};
pub use resource_pool::{ConnectionHandle, PoolConfig, PoolStats, ResourcePool};
