//! Key-value storage trait with TTL and conditional-write semantics.
//!
//! This is the Redis-shaped port the whole security core is written
//! against: string values with expiry, atomic set-if-absent, and sets for
//! secondary indexes. Implementations must uphold two properties the core
//! depends on:
//!
//! - `put_if_absent` is atomic: of N concurrent callers, exactly one
//!   observes `true`. Refresh rotation and MFA one-shot consumption are
//!   built on this single conditional write.
//! - Deletes are idempotent: deleting a missing key reports `false` and is
//!   not an error, so periodic cleanups are safe to run from any number of
//!   service instances at once.

use async_trait::async_trait;
use std::time::Duration;

use crate::AuthResult;

/// Remaining lifetime of a key, mirroring Redis `TTL` semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist.
    Missing,
    /// The key exists but carries no expiry.
    NoExpiry,
    /// The key expires after the contained duration.
    Expires(Duration),
}

impl KeyTtl {
    /// Returns the remaining duration if the key exists with an expiry.
    #[must_use]
    pub fn remaining(self) -> Option<Duration> {
        match self {
            Self::Expires(d) => Some(d),
            Self::Missing | Self::NoExpiry => None,
        }
    }
}

/// Storage trait for TTL-capable key-value data.
///
/// All operations are fallible; storage failures surface as
/// [`crate::AuthError::Storage`]. Callers on the validation hot path fail
/// closed on error, callers performing revocation writes propagate it.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads the value at `key`.
    async fn get(&self, key: &str) -> AuthResult<Option<String>>;

    /// Writes `value` at `key`. A `ttl` of `None` stores without expiry.
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> AuthResult<()>;

    /// Writes `value` at `key` only if the key does not exist.
    ///
    /// Returns `true` if this call created the key, `false` if it already
    /// existed. Must be atomic with respect to concurrent callers.
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AuthResult<bool>;

    /// Deletes `key`. Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> AuthResult<bool>;

    /// Returns `true` if `key` exists.
    async fn exists(&self, key: &str) -> AuthResult<bool>;

    /// Returns the remaining lifetime of `key`.
    async fn ttl(&self, key: &str) -> AuthResult<KeyTtl>;

    /// Sets the expiry of an existing key. Returns `false` if the key is
    /// missing.
    async fn expire(&self, key: &str, ttl: Duration) -> AuthResult<bool>;

    /// Adds `member` to the set at `key`.
    async fn set_add(&self, key: &str, member: &str) -> AuthResult<()>;

    /// Removes `member` from the set at `key`.
    async fn set_remove(&self, key: &str, member: &str) -> AuthResult<()>;

    /// Returns all members of the set at `key`.
    async fn set_members(&self, key: &str) -> AuthResult<Vec<String>>;

    /// Returns the cardinality of the set at `key`.
    async fn set_len(&self, key: &str) -> AuthResult<usize>;

    /// Returns all keys starting with `prefix`.
    ///
    /// Backends implement this with cursor-based scans; it is intended for
    /// maintenance paths (cleanup, stats), never per-request logic.
    async fn scan_keys(&self, prefix: &str) -> AuthResult<Vec<String>>;
}
