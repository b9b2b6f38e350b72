//! In-memory key-value backend.
//!
//! Backed by `DashMap` with lazy expiry: entries past their deadline are
//! treated as absent on read and removed on the way out. Used by the test
//! suites and by single-instance deployments that do not need shared state.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::AuthResult;
use crate::storage::kv::{KeyTtl, KeyValueStore};

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Clone, Default)]
struct SetEntry {
    members: HashSet<String>,
    expires_at: Option<Instant>,
}

impl SetEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Process-local [`KeyValueStore`] implementation.
#[derive(Default)]
pub struct InMemoryKvStore {
    strings: DashMap<String, Entry>,
    sets: DashMap<String, SetEntry>,
}

impl InMemoryKvStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn deadline(ttl: Option<Duration>) -> Option<Instant> {
        ttl.map(|d| Instant::now() + d)
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        if let Some(entry) = self.strings.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.strings.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> AuthResult<()> {
        self.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Self::deadline(ttl),
            },
        );
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AuthResult<bool> {
        // The entry API holds the shard lock, making check-and-insert atomic.
        let mut created = false;
        let mut entry = self
            .strings
            .entry(key.to_string())
            .or_insert_with(|| {
                created = true;
                Entry {
                    value: value.to_string(),
                    expires_at: Self::deadline(Some(ttl)),
                }
            });
        if !created && entry.is_expired() {
            *entry = Entry {
                value: value.to_string(),
                expires_at: Self::deadline(Some(ttl)),
            };
            created = true;
        }
        Ok(created)
    }

    async fn delete(&self, key: &str) -> AuthResult<bool> {
        let had_string = self
            .strings
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired());
        let had_set = self
            .sets
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired());
        Ok(had_string || had_set)
    }

    async fn exists(&self, key: &str) -> AuthResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn ttl(&self, key: &str) -> AuthResult<KeyTtl> {
        if let Some(entry) = self.strings.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.strings.remove(key);
                return Ok(KeyTtl::Missing);
            }
            return Ok(match entry.expires_at {
                Some(at) => KeyTtl::Expires(at.saturating_duration_since(Instant::now())),
                None => KeyTtl::NoExpiry,
            });
        }
        if let Some(entry) = self.sets.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.sets.remove(key);
                return Ok(KeyTtl::Missing);
            }
            return Ok(match entry.expires_at {
                Some(at) => KeyTtl::Expires(at.saturating_duration_since(Instant::now())),
                None => KeyTtl::NoExpiry,
            });
        }
        Ok(KeyTtl::Missing)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> AuthResult<bool> {
        if let Some(mut entry) = self.strings.get_mut(key) {
            if !entry.is_expired() {
                entry.expires_at = Some(Instant::now() + ttl);
                return Ok(true);
            }
        }
        if let Some(mut entry) = self.sets.get_mut(key) {
            if !entry.is_expired() {
                entry.expires_at = Some(Instant::now() + ttl);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn set_add(&self, key: &str, member: &str) -> AuthResult<()> {
        let mut entry = self.sets.entry(key.to_string()).or_default();
        if entry.is_expired() {
            *entry = SetEntry::default();
        }
        entry.members.insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> AuthResult<()> {
        if let Some(mut entry) = self.sets.get_mut(key) {
            entry.members.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> AuthResult<Vec<String>> {
        if let Some(entry) = self.sets.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.sets.remove(key);
                return Ok(Vec::new());
            }
            return Ok(entry.members.iter().cloned().collect());
        }
        Ok(Vec::new())
    }

    async fn set_len(&self, key: &str) -> AuthResult<usize> {
        Ok(self.set_members(key).await?.len())
    }

    async fn scan_keys(&self, prefix: &str) -> AuthResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .strings
            .iter()
            .filter(|e| !e.value().is_expired() && e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.extend(
            self.sets
                .iter()
                .filter(|e| !e.value().is_expired() && e.key().starts_with(prefix))
                .map(|e| e.key().clone()),
        );
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}
