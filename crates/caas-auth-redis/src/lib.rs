//! # caas-auth-redis
//!
//! Redis backend for the `caas-auth` security core, for multi-instance
//! deployments sharing state through Redis:
//!
//! - [`RedisKvStore`] implements the core's key-value port over a
//!   `deadpool-redis` pool, with millisecond-precision TTLs and `SET NX`
//!   conditional writes
//! - [`RedisEventPublisher`] publishes revocation events over Redis
//!   pub/sub, one channel per concern
//!
//! Connection failures surface as `AuthError::Storage`; the core decides
//! whether to fail closed (validation reads) or fail loud (revocation
//! writes).

pub mod kv;
pub mod publisher;

pub use kv::RedisKvStore;
pub use publisher::RedisEventPublisher;
