//! Storage ports for authentication data.
//!
//! The core never talks to a concrete store: every component takes an
//! `Arc<dyn KeyValueStore>` and relies only on the TTL and conditional-write
//! semantics the trait guarantees. This keeps the security logic testable
//! with the in-memory backend and lets production deployments plug in the
//! Redis backend from `caas-auth-redis`.
//!
//! # Implementations
//!
//! - [`memory::InMemoryKvStore`] - process-local backend for tests and
//!   single-instance deployments
//! - `caas-auth-redis` - Redis backend for multi-instance deployments

pub mod kv;
pub mod memory;

pub use kv::{KeyTtl, KeyValueStore};
pub use memory::InMemoryKvStore;
