//! Revocation service: store writes paired with best-effort events.
//!
//! Every revocation call writes its fact to the store first, then
//! publishes the corresponding event. The write is authoritative; a
//! publish failure is logged and otherwise ignored, so revocation
//! correctness never depends on downstream event delivery.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::revocation::events::{
    RevocationEvent, RevocationEventPublisher, RevocationEventType,
};
use crate::revocation::store::{RevocationReason, RevocationStats, RevocationStore};

/// Outcome of a revocation call.
///
/// `revoked_count` is `Some(n)` when the scope is precisely countable
/// (individual tokens) and `None` for unbounded scopes (user, session,
/// tenant), where the store records a fact rather than touching each token.
#[derive(Debug, Clone, Serialize)]
pub struct RevocationResult {
    /// Precise count, or `None` for unbounded scopes.
    pub revoked_count: Option<u64>,

    /// Why the revocation happened.
    pub reason: String,

    /// When the revocation was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Combines the revocation store with the event publisher.
pub struct RevocationService {
    store: RevocationStore,
    publisher: Arc<dyn RevocationEventPublisher>,
}

impl RevocationService {
    /// Creates a new service.
    #[must_use]
    pub fn new(store: RevocationStore, publisher: Arc<dyn RevocationEventPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Revokes an individual token.
    ///
    /// `ttl` should be the token's remaining lifetime.
    ///
    /// # Errors
    /// Propagates storage failures (the write fails loud).
    pub async fn revoke_token(
        &self,
        token_id: &str,
        user_id: &str,
        ttl: Duration,
        reason: impl Into<String>,
        metadata: serde_json::Value,
    ) -> AuthResult<RevocationResult> {
        let reason = reason.into();
        self.store.revoke_token(token_id, ttl).await?;

        self.publish(
            RevocationEventType::TokenRevoked,
            &reason,
            merge_metadata(
                metadata,
                &[("token_id", token_id), ("user_id", user_id)],
            ),
        )
        .await;

        Ok(RevocationResult {
            revoked_count: Some(1),
            reason,
            timestamp: OffsetDateTime::now_utc(),
        })
    }

    /// Invalidates all of a user's tokens issued before now.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn revoke_user_tokens(
        &self,
        user_id: &str,
        reason: impl Into<String>,
        metadata: serde_json::Value,
    ) -> AuthResult<RevocationResult> {
        let reason = reason.into();
        let cutoff = OffsetDateTime::now_utc().unix_timestamp();
        self.store.revoke_user_before(user_id, cutoff).await?;

        self.publish(
            RevocationEventType::UserTokensRevoked,
            &reason,
            merge_metadata(metadata, &[("user_id", user_id)]),
        )
        .await;

        Ok(RevocationResult {
            revoked_count: None,
            reason,
            timestamp: OffsetDateTime::now_utc(),
        })
    }

    /// Flags a session as terminated.
    ///
    /// `ttl` should be the longest remaining lifetime of tokens bound to
    /// the session.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn revoke_session_tokens(
        &self,
        session_id: &str,
        user_id: &str,
        ttl: Duration,
        reason: impl Into<String>,
        metadata: serde_json::Value,
    ) -> AuthResult<RevocationResult> {
        let reason = reason.into();
        self.store.revoke_session(session_id, ttl).await?;

        self.publish(
            RevocationEventType::SessionTerminated,
            &reason,
            merge_metadata(
                metadata,
                &[("session_id", session_id), ("user_id", user_id)],
            ),
        )
        .await;

        Ok(RevocationResult {
            revoked_count: None,
            reason,
            timestamp: OffsetDateTime::now_utc(),
        })
    }

    /// Invalidates all of a tenant's tokens issued before now.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn revoke_tenant_tokens(
        &self,
        tenant_id: &str,
        reason: impl Into<String>,
        metadata: serde_json::Value,
    ) -> AuthResult<RevocationResult> {
        let reason = reason.into();
        let cutoff = OffsetDateTime::now_utc().unix_timestamp();
        self.store.revoke_tenant_before(tenant_id, cutoff).await?;

        self.publish(
            RevocationEventType::TenantTokensRevoked,
            &reason,
            merge_metadata(metadata, &[("tenant_id", tenant_id)]),
        )
        .await;

        Ok(RevocationResult {
            revoked_count: None,
            reason,
            timestamp: OffsetDateTime::now_utc(),
        })
    }

    /// Evaluates the four revocation facts for a token.
    ///
    /// # Errors
    /// Propagates storage failures; the validator fails closed on them.
    pub async fn is_revoked(
        &self,
        token_id: &str,
        user_id: &str,
        session_id: &str,
        tenant_id: &str,
        issued_at: i64,
    ) -> AuthResult<Option<RevocationReason>> {
        self.store
            .is_revoked(token_id, user_id, session_id, tenant_id, issued_at)
            .await
    }

    /// Clears a user's invalid-before fact (restores access).
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn clear_user_revocation(&self, user_id: &str) -> AuthResult<()> {
        self.store.clear_user_revocation(user_id).await
    }

    /// Removes revocation entries without a TTL. Idempotent.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn cleanup(&self) -> AuthResult<u64> {
        self.store.cleanup().await
    }

    /// Returns per-fact entry counts.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn stats(&self) -> AuthResult<RevocationStats> {
        self.store.stats().await
    }

    /// Publishes best-effort; failures are logged and never propagated.
    async fn publish(
        &self,
        event_type: RevocationEventType,
        reason: &str,
        metadata: serde_json::Value,
    ) {
        let event = RevocationEvent::new(event_type, reason, metadata);
        if let Err(error) = self.publisher.publish(&event).await {
            tracing::warn!(
                %error,
                event_type = event.event_type.as_str(),
                "failed to publish revocation event"
            );
        } else {
            tracing::debug!(
                event_type = event.event_type.as_str(),
                reason,
                "revocation event published"
            );
        }
    }
}

fn merge_metadata(mut metadata: serde_json::Value, fields: &[(&str, &str)]) -> serde_json::Value {
    if !metadata.is_object() {
        metadata = serde_json::json!({});
    }
    if let Some(map) = metadata.as_object_mut() {
        for (key, value) in fields {
            map.insert((*key).to_string(), serde_json::json!(value));
        }
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::revocation::events::MemoryEventPublisher;
    use crate::storage::InMemoryKvStore;
    use crate::storage::kv::{KeyTtl, KeyValueStore};
    use async_trait::async_trait;

    fn service_with_spy() -> (RevocationService, Arc<MemoryEventPublisher>) {
        let store = RevocationStore::new(
            Arc::new(InMemoryKvStore::new()),
            Duration::from_secs(30 * 24 * 3600),
        );
        let publisher = Arc::new(MemoryEventPublisher::new());
        let service = RevocationService::new(store, publisher.clone());
        (service, publisher)
    }

    #[tokio::test]
    async fn test_revoke_token_counts_and_publishes() {
        let (service, spy) = service_with_spy();

        let result = service
            .revoke_token(
                "jti-1",
                "user-1",
                Duration::from_secs(900),
                "user_logout",
                serde_json::json!({"device_id": "d-1"}),
            )
            .await
            .unwrap();

        assert_eq!(result.revoked_count, Some(1));
        assert_eq!(result.reason, "user_logout");

        let events = spy.published();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, RevocationEventType::TokenRevoked);
        assert_eq!(events[0].metadata["token_id"], "jti-1");
        assert_eq!(events[0].metadata["user_id"], "user-1");
        assert_eq!(events[0].metadata["device_id"], "d-1");
    }

    #[tokio::test]
    async fn test_unbounded_scopes_have_no_count() {
        let (service, spy) = service_with_spy();

        let result = service
            .revoke_user_tokens("user-1", "password_change", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result.revoked_count, None);

        let result = service
            .revoke_tenant_tokens("tenant-1", "tenant_offboarded", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result.revoked_count, None);

        let result = service
            .revoke_session_tokens(
                "session-1",
                "user-1",
                Duration::from_secs(900),
                "hijack_detected",
                serde_json::json!({}),
            )
            .await
            .unwrap();
        assert_eq!(result.revoked_count, None);

        assert_eq!(spy.published().len(), 3);
    }

    #[tokio::test]
    async fn test_revoked_user_token_matches_fact() {
        let (service, _) = service_with_spy();
        let issued_before = OffsetDateTime::now_utc().unix_timestamp() - 10;

        service
            .revoke_user_tokens("user-1", "compromise", serde_json::json!({}))
            .await
            .unwrap();

        let reason = service
            .is_revoked("jti", "user-1", "session", "tenant", issued_before)
            .await
            .unwrap();
        assert_eq!(reason, Some(RevocationReason::UserTokensRevoked));
    }

    struct FailingPublisher;

    #[async_trait]
    impl RevocationEventPublisher for FailingPublisher {
        async fn publish(&self, _event: &RevocationEvent) -> crate::AuthResult<()> {
            Err(AuthError::storage("broker unavailable"))
        }
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_block_revocation() {
        let kv = Arc::new(InMemoryKvStore::new());
        let kv_port: Arc<dyn KeyValueStore> = kv.clone();
        let store = RevocationStore::new(kv_port, Duration::from_secs(3600));
        let service = RevocationService::new(store, Arc::new(FailingPublisher));

        // The revocation write must succeed even though publishing fails.
        let result = service
            .revoke_token(
                "jti-1",
                "user-1",
                Duration::from_secs(900),
                "logout",
                serde_json::json!({}),
            )
            .await
            .unwrap();
        assert_eq!(result.revoked_count, Some(1));
        assert!(matches!(
            kv.ttl("revoked:jti-1").await.unwrap(),
            KeyTtl::Expires(_)
        ));
    }
}
