//! TTL-indexed registry of revocation facts.
//!
//! Four independent facts, each with its own key shape and TTL:
//!
//! | Fact | Key | TTL |
//! |---|---|---|
//! | token revoked | `revoked:{jti}` | token's remaining lifetime |
//! | user invalid-before | `user_tokens_invalid_before:{user_id}` | retention window (30d) |
//! | session invalid | `session_invalid:{session_id}` | token's remaining lifetime |
//! | tenant invalid-before | `tenant_tokens_invalid_before:{tenant_id}` | retention window (30d) |
//!
//! The invalid-before facts use the long retention window because a token
//! issued long ago could otherwise outlive the fact and wrongly appear
//! valid again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::storage::kv::{KeyTtl, KeyValueStore};

const TOKEN_PREFIX: &str = "revoked:";
const USER_PREFIX: &str = "user_tokens_invalid_before:";
const SESSION_PREFIX: &str = "session_invalid:";
const TENANT_PREFIX: &str = "tenant_tokens_invalid_before:";

/// Which revocation fact matched, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    /// The token's JTI is on the blacklist.
    TokenRevoked,
    /// The user's tokens issued before a cutoff are invalid.
    UserTokensRevoked,
    /// The session has been terminated.
    SessionTerminated,
    /// The tenant's tokens issued before a cutoff are invalid.
    TenantTokensRevoked,
}

impl RevocationReason {
    /// Returns the reason as the stable wire string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenRevoked => "token_revoked",
            Self::UserTokensRevoked => "user_tokens_revoked",
            Self::SessionTerminated => "session_terminated",
            Self::TenantTokensRevoked => "tenant_tokens_revoked",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-fact entry counts, for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RevocationStats {
    /// Individually revoked tokens.
    pub revoked_tokens: usize,
    /// Users with an invalid-before fact.
    pub revoked_users: usize,
    /// Flagged sessions.
    pub revoked_sessions: usize,
    /// Tenants with an invalid-before fact.
    pub revoked_tenants: usize,
}

/// Stores and evaluates the four revocation facts.
pub struct RevocationStore {
    kv: Arc<dyn KeyValueStore>,
    invalid_before_retention: Duration,
}

impl RevocationStore {
    /// Creates a new store.
    ///
    /// `invalid_before_retention` bounds the user/tenant invalid-before
    /// facts; it must cover the longest-lived token the platform issues.
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, invalid_before_retention: Duration) -> Self {
        Self {
            kv,
            invalid_before_retention,
        }
    }

    /// Revokes an individual token by JTI for `ttl` (its remaining
    /// lifetime).
    ///
    /// # Errors
    /// Propagates storage failures; revocation writes fail loud.
    pub async fn revoke_token(&self, jti: &str, ttl: Duration) -> AuthResult<()> {
        self.kv
            .put(&format!("{TOKEN_PREFIX}{jti}"), "1", Some(ttl))
            .await
    }

    /// Returns `true` if the token's JTI is revoked.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn is_token_revoked(&self, jti: &str) -> AuthResult<bool> {
        self.kv.exists(&format!("{TOKEN_PREFIX}{jti}")).await
    }

    /// Invalidates all of a user's tokens issued before `timestamp`
    /// (Unix seconds).
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn revoke_user_before(&self, user_id: &str, timestamp: i64) -> AuthResult<()> {
        self.kv
            .put(
                &format!("{USER_PREFIX}{user_id}"),
                &timestamp.to_string(),
                Some(self.invalid_before_retention),
            )
            .await
    }

    /// Returns `true` if the user fact invalidates a token issued at
    /// `issued_at` (Unix seconds).
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn are_user_tokens_revoked(&self, user_id: &str, issued_at: i64) -> AuthResult<bool> {
        match self.kv.get(&format!("{USER_PREFIX}{user_id}")).await? {
            Some(raw) => Ok(raw
                .parse::<i64>()
                .map(|invalid_before| issued_at < invalid_before)
                .unwrap_or(false)),
            None => Ok(false),
        }
    }

    /// Flags a session as terminated for `ttl`.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn revoke_session(&self, session_id: &str, ttl: Duration) -> AuthResult<()> {
        self.kv
            .put(&format!("{SESSION_PREFIX}{session_id}"), "1", Some(ttl))
            .await
    }

    /// Returns `true` if the session is flagged.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn is_session_revoked(&self, session_id: &str) -> AuthResult<bool> {
        self.kv
            .exists(&format!("{SESSION_PREFIX}{session_id}"))
            .await
    }

    /// Invalidates all of a tenant's tokens issued before `timestamp`
    /// (Unix seconds).
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn revoke_tenant_before(&self, tenant_id: &str, timestamp: i64) -> AuthResult<()> {
        self.kv
            .put(
                &format!("{TENANT_PREFIX}{tenant_id}"),
                &timestamp.to_string(),
                Some(self.invalid_before_retention),
            )
            .await
    }

    /// Returns `true` if the tenant fact invalidates a token issued at
    /// `issued_at` (Unix seconds).
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn are_tenant_tokens_revoked(
        &self,
        tenant_id: &str,
        issued_at: i64,
    ) -> AuthResult<bool> {
        match self.kv.get(&format!("{TENANT_PREFIX}{tenant_id}")).await? {
            Some(raw) => Ok(raw
                .parse::<i64>()
                .map(|invalid_before| issued_at < invalid_before)
                .unwrap_or(false)),
            None => Ok(false),
        }
    }

    /// Evaluates the four facts in order token → user → session → tenant
    /// and returns the first match.
    ///
    /// # Errors
    /// Propagates storage failures; the validator fails closed on them.
    pub async fn is_revoked(
        &self,
        jti: &str,
        user_id: &str,
        session_id: &str,
        tenant_id: &str,
        issued_at: i64,
    ) -> AuthResult<Option<RevocationReason>> {
        if self.is_token_revoked(jti).await? {
            return Ok(Some(RevocationReason::TokenRevoked));
        }
        if self.are_user_tokens_revoked(user_id, issued_at).await? {
            return Ok(Some(RevocationReason::UserTokensRevoked));
        }
        if self.is_session_revoked(session_id).await? {
            return Ok(Some(RevocationReason::SessionTerminated));
        }
        if self.are_tenant_tokens_revoked(tenant_id, issued_at).await? {
            return Ok(Some(RevocationReason::TenantTokensRevoked));
        }
        Ok(None)
    }

    /// Clears a user's invalid-before fact (restores access).
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn clear_user_revocation(&self, user_id: &str) -> AuthResult<()> {
        self.kv.delete(&format!("{USER_PREFIX}{user_id}")).await?;
        Ok(())
    }

    /// Clears a session's terminated flag.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn clear_session_revocation(&self, session_id: &str) -> AuthResult<()> {
        self.kv
            .delete(&format!("{SESSION_PREFIX}{session_id}"))
            .await?;
        Ok(())
    }

    /// Removes revocation entries that lost their TTL (defensive against
    /// non-atomic writes). Idempotent; safe to run from any number of
    /// instances.
    ///
    /// Returns the number of entries removed.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn cleanup(&self) -> AuthResult<u64> {
        let mut cleaned = 0;
        for key in self.kv.scan_keys(TOKEN_PREFIX).await? {
            if self.kv.ttl(&key).await? == KeyTtl::NoExpiry && self.kv.delete(&key).await? {
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    /// Returns per-fact entry counts.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn stats(&self) -> AuthResult<RevocationStats> {
        Ok(RevocationStats {
            revoked_tokens: self.kv.scan_keys(TOKEN_PREFIX).await?.len(),
            revoked_users: self.kv.scan_keys(USER_PREFIX).await?.len(),
            revoked_sessions: self.kv.scan_keys(SESSION_PREFIX).await?.len(),
            revoked_tenants: self.kv.scan_keys(TENANT_PREFIX).await?.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryKvStore;

    fn store() -> RevocationStore {
        RevocationStore::new(
            Arc::new(InMemoryKvStore::new()),
            Duration::from_secs(30 * 24 * 3600),
        )
    }

    #[tokio::test]
    async fn test_token_revocation() {
        let store = store();
        assert!(!store.is_token_revoked("jti-1").await.unwrap());

        store
            .revoke_token("jti-1", Duration::from_secs(900))
            .await
            .unwrap();
        assert!(store.is_token_revoked("jti-1").await.unwrap());
        assert!(!store.is_token_revoked("jti-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_user_invalid_before() {
        let store = store();
        store.revoke_user_before("user-1", 1_000).await.unwrap();

        assert!(store.are_user_tokens_revoked("user-1", 999).await.unwrap());
        assert!(!store.are_user_tokens_revoked("user-1", 1_000).await.unwrap());
        assert!(!store.are_user_tokens_revoked("user-1", 1_001).await.unwrap());
        assert!(!store.are_user_tokens_revoked("user-2", 999).await.unwrap());
    }

    #[tokio::test]
    async fn test_evaluation_order() {
        let store = store();
        store
            .revoke_token("jti-1", Duration::from_secs(900))
            .await
            .unwrap();
        store.revoke_user_before("user-1", i64::MAX).await.unwrap();

        // Both facts apply; the token fact wins by evaluation order.
        let reason = store
            .is_revoked("jti-1", "user-1", "session-1", "tenant-1", 0)
            .await
            .unwrap();
        assert_eq!(reason, Some(RevocationReason::TokenRevoked));

        let reason = store
            .is_revoked("jti-2", "user-1", "session-1", "tenant-1", 0)
            .await
            .unwrap();
        assert_eq!(reason, Some(RevocationReason::UserTokensRevoked));
    }

    #[tokio::test]
    async fn test_session_and_tenant_facts() {
        let store = store();
        store
            .revoke_session("session-1", Duration::from_secs(900))
            .await
            .unwrap();
        assert_eq!(
            store
                .is_revoked("jti", "user", "session-1", "tenant", 0)
                .await
                .unwrap(),
            Some(RevocationReason::SessionTerminated)
        );

        store.revoke_tenant_before("tenant-1", 500).await.unwrap();
        assert_eq!(
            store
                .is_revoked("jti", "user", "session-x", "tenant-1", 100)
                .await
                .unwrap(),
            Some(RevocationReason::TenantTokensRevoked)
        );
        assert_eq!(
            store
                .is_revoked("jti", "user", "session-x", "tenant-1", 600)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_clear_revocations() {
        let store = store();
        store.revoke_user_before("user-1", i64::MAX).await.unwrap();
        store
            .revoke_session("session-1", Duration::from_secs(900))
            .await
            .unwrap();

        store.clear_user_revocation("user-1").await.unwrap();
        store.clear_session_revocation("session-1").await.unwrap();

        assert_eq!(
            store
                .is_revoked("jti", "user-1", "session-1", "tenant", 0)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_cleanup_removes_unexpiring_entries() {
        let kv = Arc::new(InMemoryKvStore::new());
        let store = RevocationStore::new(kv.clone(), Duration::from_secs(3600));

        // Simulate a non-atomic write that lost its TTL.
        kv.put("revoked:stuck", "1", None).await.unwrap();
        store
            .revoke_token("fine", Duration::from_secs(900))
            .await
            .unwrap();

        assert_eq!(store.cleanup().await.unwrap(), 1);
        assert!(!store.is_token_revoked("stuck").await.unwrap());
        assert!(store.is_token_revoked("fine").await.unwrap());

        // Idempotent: nothing left to repair.
        assert_eq!(store.cleanup().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = store();
        store
            .revoke_token("a", Duration::from_secs(60))
            .await
            .unwrap();
        store
            .revoke_token("b", Duration::from_secs(60))
            .await
            .unwrap();
        store.revoke_user_before("u", 1).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.revoked_tokens, 2);
        assert_eq!(stats.revoked_users, 1);
        assert_eq!(stats.revoked_sessions, 0);
        assert_eq!(stats.revoked_tenants, 0);
    }
}
