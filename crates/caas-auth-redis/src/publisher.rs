//! Revocation event publishing over Redis pub/sub.
//!
//! Each revocation concern gets its own channel
//! (`{prefix}.token`, `{prefix}.user`, `{prefix}.session`,
//! `{prefix}.tenant`); other instances subscribe to warm or invalidate
//! their local caches. The store remains the source of truth; a missed
//! event costs a cache hit, never correctness.

use async_trait::async_trait;
use caas_auth::error::AuthError;
use caas_auth::revocation::{RevocationEvent, RevocationEventPublisher};
use caas_auth::AuthResult;
use deadpool_redis::Pool;
use redis::AsyncCommands;

/// Publishes revocation events to per-concern Redis channels.
pub struct RedisEventPublisher {
    pool: Pool,
    channel_prefix: String,
}

impl RedisEventPublisher {
    /// Creates a publisher with the configured channel prefix
    /// (e.g. `auth.revocation`).
    #[must_use]
    pub fn new(pool: Pool, channel_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            channel_prefix: channel_prefix.into(),
        }
    }

    fn channel(&self, event: &RevocationEvent) -> String {
        format!(
            "{}.{}",
            self.channel_prefix,
            event.event_type.channel_suffix()
        )
    }
}

#[async_trait]
impl RevocationEventPublisher for RedisEventPublisher {
    async fn publish(&self, event: &RevocationEvent) -> AuthResult<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| AuthError::internal(format!("Failed to serialize event: {e}")))?;
        let channel = self.channel(event);

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AuthError::storage(format!("Failed to get Redis connection: {e}")))?;

        let receivers: i64 = conn
            .publish(&channel, payload)
            .await
            .map_err(|e| AuthError::storage(format!("Redis publish error: {e}")))?;

        tracing::debug!(
            channel,
            receivers,
            event_type = event.event_type.as_str(),
            "revocation event published"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caas_auth::revocation::RevocationEventType;
    use deadpool_redis::{Config, Runtime};

    fn publisher() -> RedisEventPublisher {
        // The pool is lazy; no connection is made until publish.
        let pool = Config::from_url("redis://127.0.0.1:6379")
            .create_pool(Some(Runtime::Tokio1))
            .unwrap();
        RedisEventPublisher::new(pool, "auth.revocation")
    }

    #[test]
    fn test_channel_per_concern() {
        let publisher = publisher();
        for (event_type, channel) in [
            (RevocationEventType::TokenRevoked, "auth.revocation.token"),
            (RevocationEventType::UserTokensRevoked, "auth.revocation.user"),
            (
                RevocationEventType::SessionTerminated,
                "auth.revocation.session",
            ),
            (
                RevocationEventType::TenantTokensRevoked,
                "auth.revocation.tenant",
            ),
        ] {
            let event = RevocationEvent::new(event_type, "test", serde_json::json!({}));
            assert_eq!(publisher.channel(&event), channel);
        }
    }
}
