//! Refresh token storage.
//!
//! Records are keyed by the SHA-256 hash of the raw token; the raw value is
//! the only secret and is never persisted. A per-user index set supports
//! bulk revocation.
//!
//! `mark_used` is the concurrency-critical operation: the transition
//! `unused → used` is guarded by a single conditional write, so of two
//! concurrent rotations of the same token exactly one wins. The loser is
//! indistinguishable from replay and is handled as reuse.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::error::AuthError;
use crate::storage::kv::KeyValueStore;

const TOKEN_PREFIX: &str = "rt:";
const USED_GUARD_PREFIX: &str = "rt_used:";
const USER_INDEX_PREFIX: &str = "user_refresh_tokens:";

/// Stored state of one refresh token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRecord {
    /// Token ID (the refresh JWT's `jti`), tracked in the family lineage.
    pub token_id: String,

    /// User the token was issued to.
    pub user_id: String,

    /// Tenant the token is scoped to.
    pub tenant_id: String,

    /// Session the token is bound to.
    pub session_id: String,

    /// Device the session was created from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Family this token belongs to.
    pub family_id: String,

    /// Token ID of the rotated predecessor; `None` for the first token of a
    /// family.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Scopes to carry into reissued access tokens.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Issued at (Unix seconds).
    pub issued_at: i64,

    /// Expiry (Unix seconds).
    pub expires_at: i64,

    /// Set when the token has been rotated.
    pub used: bool,

    /// Set when the token has been revoked.
    pub revoked: bool,
}

impl RefreshTokenRecord {
    /// Returns `true` if the record is expired at `now` (Unix seconds).
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// Persists hashed refresh tokens with a per-user index.
pub struct RefreshTokenStore {
    kv: Arc<dyn KeyValueStore>,
}

impl RefreshTokenStore {
    /// Creates a new store.
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Hashes a raw token for storage lookup. The raw value never touches
    /// the store.
    #[must_use]
    pub fn hash_token(token: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn record_key(hash: &str) -> String {
        format!("{TOKEN_PREFIX}{hash}")
    }

    fn guard_key(hash: &str) -> String {
        format!("{USED_GUARD_PREFIX}{hash}")
    }

    fn user_index_key(user_id: &str) -> String {
        format!("{USER_INDEX_PREFIX}{user_id}")
    }

    /// Stores a new refresh token record under the hash of `raw_token`.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn store(
        &self,
        raw_token: &str,
        record: &RefreshTokenRecord,
        ttl: Duration,
    ) -> AuthResult<()> {
        let hash = Self::hash_token(raw_token);
        let json = serde_json::to_string(record)
            .map_err(|e| AuthError::internal(format!("Failed to serialize token record: {e}")))?;

        self.kv.put(&Self::record_key(&hash), &json, Some(ttl)).await?;

        let index_key = Self::user_index_key(&record.user_id);
        self.kv.set_add(&index_key, &hash).await?;
        self.kv.expire(&index_key, ttl).await?;
        Ok(())
    }

    /// Looks up a record by raw token.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn get(&self, raw_token: &str) -> AuthResult<Option<RefreshTokenRecord>> {
        self.get_by_hash(&Self::hash_token(raw_token)).await
    }

    /// Looks up a record by token hash.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn get_by_hash(&self, hash: &str) -> AuthResult<Option<RefreshTokenRecord>> {
        match self.kv.get(&Self::record_key(hash)).await? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| AuthError::storage(format!("Corrupt refresh token record: {e}"))),
            None => Ok(None),
        }
    }

    /// Atomically transitions the token `unused → used`.
    ///
    /// Returns `true` if this call performed the transition. A `false`
    /// return means another rotation already consumed the token (or its
    /// record is gone); the caller must treat that as reuse.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn mark_used(&self, raw_token: &str) -> AuthResult<bool> {
        let hash = Self::hash_token(raw_token);
        let remaining = self
            .kv
            .ttl(&Self::record_key(&hash))
            .await?
            .remaining()
            .unwrap_or(Duration::from_secs(60));

        // The guard is the single conditional write deciding the race.
        if !self
            .kv
            .put_if_absent(&Self::guard_key(&hash), "1", remaining)
            .await?
        {
            return Ok(false);
        }

        if let Some(mut record) = self.get_by_hash(&hash).await? {
            record.used = true;
            self.put_preserving_ttl(&hash, &record).await?;
        }
        Ok(true)
    }

    /// Marks a token revoked, preserving its TTL.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn revoke(&self, raw_token: &str) -> AuthResult<()> {
        let hash = Self::hash_token(raw_token);
        if let Some(mut record) = self.get_by_hash(&hash).await? {
            record.revoked = true;
            self.put_preserving_ttl(&hash, &record).await?;
        }
        Ok(())
    }

    /// Marks every token of a user revoked. Returns the number touched.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn revoke_all_for_user(&self, user_id: &str) -> AuthResult<u64> {
        let mut revoked = 0;
        for hash in self.kv.set_members(&Self::user_index_key(user_id)).await? {
            if let Some(mut record) = self.get_by_hash(&hash).await?
                && !record.revoked
            {
                record.revoked = true;
                self.put_preserving_ttl(&hash, &record).await?;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    /// Deletes a token record and its bookkeeping.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn delete(&self, raw_token: &str) -> AuthResult<()> {
        let hash = Self::hash_token(raw_token);
        if let Some(record) = self.get_by_hash(&hash).await? {
            self.kv
                .set_remove(&Self::user_index_key(&record.user_id), &hash)
                .await?;
        }
        self.kv.delete(&Self::record_key(&hash)).await?;
        self.kv.delete(&Self::guard_key(&hash)).await?;
        Ok(())
    }

    /// Deletes all of a user's token records. Returns the number deleted.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn delete_all_for_user(&self, user_id: &str) -> AuthResult<u64> {
        let index_key = Self::user_index_key(user_id);
        let mut deleted = 0;
        for hash in self.kv.set_members(&index_key).await? {
            if self.kv.delete(&Self::record_key(&hash)).await? {
                deleted += 1;
            }
            self.kv.delete(&Self::guard_key(&hash)).await?;
        }
        self.kv.delete(&index_key).await?;
        Ok(deleted)
    }

    /// Returns all live records for a user.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn user_tokens(&self, user_id: &str) -> AuthResult<Vec<RefreshTokenRecord>> {
        let mut records = Vec::new();
        for hash in self.kv.set_members(&Self::user_index_key(user_id)).await? {
            if let Some(record) = self.get_by_hash(&hash).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Returns the number of tokens indexed for a user.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn user_token_count(&self, user_id: &str) -> AuthResult<usize> {
        self.kv.set_len(&Self::user_index_key(user_id)).await
    }

    async fn put_preserving_ttl(&self, hash: &str, record: &RefreshTokenRecord) -> AuthResult<()> {
        let key = Self::record_key(hash);
        let remaining = self.kv.ttl(&key).await?.remaining();
        if remaining.is_none() {
            // Record already expired out from under us; nothing to update.
            return Ok(());
        }
        let json = serde_json::to_string(record)
            .map_err(|e| AuthError::internal(format!("Failed to serialize token record: {e}")))?;
        self.kv.put(&key, &json, remaining).await
    }
}
