//! Token family lineage tracking.
//!
//! A family is created once per login chain and records every refresh
//! token descended from it. The `tokens` list is append-only while the
//! family is live; a single reuse event revokes the family as a unit.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::error::AuthError;
use crate::storage::kv::KeyValueStore;

const FAMILY_PREFIX: &str = "token_family:";

/// One login chain's refresh token lineage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenFamily {
    /// Family ID.
    pub family_id: String,

    /// User the family belongs to.
    pub user_id: String,

    /// Creation time (Unix milliseconds).
    pub created_at: i64,

    /// Token IDs in issuance order. Append-only while `revoked` is false.
    pub tokens: Vec<String>,

    /// Set when the family has been revoked as a unit.
    pub revoked: bool,
}

/// Family counts, for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FamilyStats {
    /// All families currently stored.
    pub total_families: usize,
    /// Families revoked after a reuse event.
    pub revoked_families: usize,
    /// Families still accepting rotations.
    pub active_families: usize,
}

/// Tracks token families in the KV store.
pub struct FamilyTracker {
    kv: Arc<dyn KeyValueStore>,
    retention: Duration,
}

impl FamilyTracker {
    /// Creates a tracker whose families are retained for `retention`.
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, retention: Duration) -> Self {
        Self { kv, retention }
    }

    fn key(family_id: &str) -> String {
        format!("{FAMILY_PREFIX}{family_id}")
    }

    /// Creates a new family seeded with the login's first token.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn create_family(&self, user_id: &str, initial_token_id: &str) -> AuthResult<String> {
        let family = TokenFamily {
            family_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            tokens: vec![initial_token_id.to_string()],
            revoked: false,
        };
        self.put(&family, Some(self.retention)).await?;
        Ok(family.family_id)
    }

    /// Loads a family.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn get(&self, family_id: &str) -> AuthResult<Option<TokenFamily>> {
        match self.kv.get(&Self::key(family_id)).await? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| AuthError::storage(format!("Corrupt token family: {e}"))),
            None => Ok(None),
        }
    }

    /// Appends a token to a family's lineage, preserving the family TTL.
    ///
    /// # Errors
    /// Returns an internal error if the family does not exist.
    pub async fn add_token(&self, family_id: &str, token_id: &str) -> AuthResult<()> {
        let mut family = self
            .get(family_id)
            .await?
            .ok_or_else(|| AuthError::internal(format!("Token family not found: {family_id}")))?;
        family.tokens.push(token_id.to_string());
        self.put_preserving_ttl(&family).await
    }

    /// Revokes an entire family. A missing family is a no-op.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn revoke(&self, family_id: &str) -> AuthResult<()> {
        if let Some(mut family) = self.get(family_id).await? {
            family.revoked = true;
            self.put_preserving_ttl(&family).await?;
        }
        Ok(())
    }

    /// Returns `true` if the family exists and is revoked.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn is_revoked(&self, family_id: &str) -> AuthResult<bool> {
        Ok(self.get(family_id).await?.is_some_and(|f| f.revoked))
    }

    /// Returns `true` if `token_id` appears in the family's lineage.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn is_token_in_family(&self, family_id: &str, token_id: &str) -> AuthResult<bool> {
        Ok(self
            .get(family_id)
            .await?
            .is_some_and(|f| f.tokens.iter().any(|t| t == token_id)))
    }

    /// Returns the number of tokens in a family.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn family_size(&self, family_id: &str) -> AuthResult<usize> {
        Ok(self.get(family_id).await?.map_or(0, |f| f.tokens.len()))
    }

    /// Returns all families belonging to a user. Maintenance path only.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn user_families(&self, user_id: &str) -> AuthResult<Vec<TokenFamily>> {
        let mut families = Vec::new();
        for key in self.kv.scan_keys(FAMILY_PREFIX).await? {
            if let Some(json) = self.kv.get(&key).await?
                && let Ok(family) = serde_json::from_str::<TokenFamily>(&json)
                && family.user_id == user_id
            {
                families.push(family);
            }
        }
        Ok(families)
    }

    /// Deletes revoked families. Returns the number removed. Idempotent.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn cleanup_revoked(&self) -> AuthResult<u64> {
        let mut cleaned = 0;
        for key in self.kv.scan_keys(FAMILY_PREFIX).await? {
            if let Some(json) = self.kv.get(&key).await?
                && let Ok(family) = serde_json::from_str::<TokenFamily>(&json)
                && family.revoked
                && self.kv.delete(&key).await?
            {
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    /// Deletes a family outright.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn delete(&self, family_id: &str) -> AuthResult<()> {
        self.kv.delete(&Self::key(family_id)).await?;
        Ok(())
    }

    /// Returns family counts.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn stats(&self) -> AuthResult<FamilyStats> {
        let mut total = 0;
        let mut revoked = 0;
        for key in self.kv.scan_keys(FAMILY_PREFIX).await? {
            if let Some(json) = self.kv.get(&key).await?
                && let Ok(family) = serde_json::from_str::<TokenFamily>(&json)
            {
                total += 1;
                if family.revoked {
                    revoked += 1;
                }
            }
        }
        Ok(FamilyStats {
            total_families: total,
            revoked_families: revoked,
            active_families: total - revoked,
        })
    }

    async fn put(&self, family: &TokenFamily, ttl: Option<Duration>) -> AuthResult<()> {
        let json = serde_json::to_string(family)
            .map_err(|e| AuthError::internal(format!("Failed to serialize family: {e}")))?;
        self.kv.put(&Self::key(&family.family_id), &json, ttl).await
    }

    async fn put_preserving_ttl(&self, family: &TokenFamily) -> AuthResult<()> {
        let remaining = self.kv.ttl(&Self::key(&family.family_id)).await?.remaining();
        match remaining {
            Some(ttl) => self.put(family, Some(ttl)).await,
            // Family expired between read and write; drop the update.
            None => Ok(()),
        }
    }
}
