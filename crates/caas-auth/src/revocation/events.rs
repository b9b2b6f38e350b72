//! Revocation event types and the publisher port.
//!
//! Events let other service instances invalidate their local caches
//! without polling the store on every check. They are never the source of
//! truth for enforcement: publishing is best-effort, and a publish failure
//! must not roll back or block the revocation write.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AuthResult;

/// The four revocation event concerns, one topic/channel each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevocationEventType {
    /// An individual token was revoked.
    #[serde(rename = "token.revoked")]
    TokenRevoked,
    /// All of a user's tokens were invalidated.
    #[serde(rename = "user.tokens.revoked")]
    UserTokensRevoked,
    /// A session was terminated.
    #[serde(rename = "session.terminated")]
    SessionTerminated,
    /// All of a tenant's tokens were invalidated.
    #[serde(rename = "tenant.tokens.revoked")]
    TenantTokensRevoked,
}

impl RevocationEventType {
    /// Returns the event type as the stable wire string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenRevoked => "token.revoked",
            Self::UserTokensRevoked => "user.tokens.revoked",
            Self::SessionTerminated => "session.terminated",
            Self::TenantTokensRevoked => "tenant.tokens.revoked",
        }
    }

    /// Returns the channel suffix for this concern.
    #[must_use]
    pub fn channel_suffix(&self) -> &'static str {
        match self {
            Self::TokenRevoked => "token",
            Self::UserTokensRevoked => "user",
            Self::SessionTerminated => "session",
            Self::TenantTokensRevoked => "tenant",
        }
    }
}

/// A published revocation fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationEvent {
    /// Which concern this event belongs to.
    pub event_type: RevocationEventType,

    /// When the revocation happened.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,

    /// Why the revocation happened (e.g. `user_logout`,
    /// `refresh_token_reuse`).
    pub reason: String,

    /// Concern-specific identifiers (token/user/session/tenant IDs).
    pub metadata: serde_json::Value,
}

impl RevocationEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(
        event_type: RevocationEventType,
        reason: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            timestamp: OffsetDateTime::now_utc(),
            reason: reason.into(),
            metadata,
        }
    }
}

/// Port for the durable event log.
///
/// Implementations must not block the caller beyond their transport
/// timeout; the revocation service treats any error as log-and-continue.
#[async_trait]
pub trait RevocationEventPublisher: Send + Sync {
    /// Publishes one event to the concern's topic.
    async fn publish(&self, event: &RevocationEvent) -> AuthResult<()>;
}

/// In-process publisher that records events, for tests and single-instance
/// deployments.
#[derive(Default)]
pub struct MemoryEventPublisher {
    events: Mutex<Vec<RevocationEvent>>,
}

impl MemoryEventPublisher {
    /// Creates an empty publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything published so far.
    #[must_use]
    pub fn published(&self) -> Vec<RevocationEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RevocationEventPublisher for MemoryEventPublisher {
    async fn publish(&self, event: &RevocationEvent) -> AuthResult<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_strings() {
        assert_eq!(RevocationEventType::TokenRevoked.as_str(), "token.revoked");
        assert_eq!(
            RevocationEventType::UserTokensRevoked.as_str(),
            "user.tokens.revoked"
        );
        assert_eq!(
            RevocationEventType::SessionTerminated.as_str(),
            "session.terminated"
        );
        assert_eq!(
            RevocationEventType::TenantTokensRevoked.as_str(),
            "tenant.tokens.revoked"
        );
    }

    #[test]
    fn test_event_serialization() {
        let event = RevocationEvent::new(
            RevocationEventType::SessionTerminated,
            "hijack_detected",
            serde_json::json!({"session_id": "s-1", "user_id": "u-1"}),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"session.terminated\""));
        assert!(json.contains("\"reason\":\"hijack_detected\""));

        let parsed: RevocationEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type, RevocationEventType::SessionTerminated);
    }

    #[tokio::test]
    async fn test_memory_publisher_records() {
        let publisher = MemoryEventPublisher::new();
        let event = RevocationEvent::new(
            RevocationEventType::TokenRevoked,
            "logout",
            serde_json::json!({"token_id": "jti-1"}),
        );
        publisher.publish(&event).await.unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].reason, "logout");
    }
}
