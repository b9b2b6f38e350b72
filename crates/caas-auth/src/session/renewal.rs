//! Sliding-window session renewal.
//!
//! Renewal is lazy: it only fires when the session is within the renewal
//! threshold of its expiry, and a per-session cooldown keeps chatty
//! clients from rewriting the record on every request. The cooldown is
//! tracked per instance and is safe to race: the losing renewal is
//! rejected with a reason, not an error.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::AuthResult;
use crate::config::SessionConfig;
use crate::session::model::Session;
use crate::session::store::SessionStore;

/// Why a renewal did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalSkipReason {
    /// Renewal is disabled by configuration.
    Disabled,
    /// The session does not exist (or already expired).
    NotFound,
    /// The per-session cooldown has not elapsed.
    CooldownActive,
    /// The session has reached its maximum lifetime.
    MaxLifetimeReached,
    /// The session is not yet within the renewal threshold.
    NotNeeded,
}

impl fmt::Display for RenewalSkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "renewal disabled"),
            Self::NotFound => write!(f, "session not found"),
            Self::CooldownActive => write!(f, "renewal cooldown active"),
            Self::MaxLifetimeReached => write!(f, "maximum session lifetime reached"),
            Self::NotNeeded => write!(f, "session does not need renewal yet"),
        }
    }
}

/// Result of a renewal attempt.
#[derive(Debug, Clone)]
pub struct RenewalOutcome {
    /// Whether the session's expiry moved.
    pub renewed: bool,

    /// Why it did not, when `renewed` is false.
    pub reason: Option<RenewalSkipReason>,

    /// The session state after the attempt, when it exists.
    pub session: Option<Session>,
}

impl RenewalOutcome {
    fn skipped(reason: RenewalSkipReason, session: Option<Session>) -> Self {
        Self {
            renewed: false,
            reason: Some(reason),
            session,
        }
    }
}

/// Renews sessions near expiry, bounded by cooldown and max lifetime.
pub struct SessionRenewal {
    store: Arc<SessionStore>,
    config: SessionConfig,
    enabled: bool,
    last_renewals: DashMap<String, Instant>,
}

impl SessionRenewal {
    /// Creates a renewal component.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, config: SessionConfig) -> Self {
        Self {
            store,
            config,
            enabled: true,
            last_renewals: DashMap::new(),
        }
    }

    /// Disables renewal (every attempt returns `Disabled`).
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Attempts to renew a session.
    ///
    /// The expiry is extended by `min(remaining lifetime, session TTL)`,
    /// and only when `expires_at - now <= renewal_threshold`.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn renew(&self, session_id: &str) -> AuthResult<RenewalOutcome> {
        if !self.enabled {
            return Ok(RenewalOutcome::skipped(RenewalSkipReason::Disabled, None));
        }

        let Some(session) = self.store.get(session_id).await? else {
            return Ok(RenewalOutcome::skipped(RenewalSkipReason::NotFound, None));
        };

        if !self.cooldown_elapsed(session_id) {
            return Ok(RenewalOutcome::skipped(
                RenewalSkipReason::CooldownActive,
                Some(session),
            ));
        }

        let now = crate::session::model::now_unix_ms();
        let age = session.age_ms(now);
        let max_lifetime_ms = self.config.max_lifetime.as_millis() as i64;
        if age >= max_lifetime_ms {
            return Ok(RenewalOutcome::skipped(
                RenewalSkipReason::MaxLifetimeReached,
                Some(session),
            ));
        }

        if session.remaining_ms(now) > self.config.renewal_threshold.as_millis() as i64 {
            return Ok(RenewalOutcome::skipped(
                RenewalSkipReason::NotNeeded,
                Some(session),
            ));
        }

        let remaining_lifetime = (max_lifetime_ms - age).max(0) as u64;
        let extension = Duration::from_millis(
            remaining_lifetime.min(self.config.ttl.as_millis() as u64),
        );

        let renewed = self.store.renew(session_id, extension).await?;
        self.last_renewals
            .insert(session_id.to_string(), Instant::now());

        tracing::debug!(session_id, extension_secs = extension.as_secs(), "session renewed");
        Ok(RenewalOutcome {
            renewed: true,
            reason: None,
            session: Some(renewed),
        })
    }

    /// Renews immediately, bypassing cooldown and threshold. For
    /// privileged flows (e.g. step-up auth completing).
    ///
    /// # Errors
    /// Propagates storage failures and missing sessions.
    pub async fn force_renew(&self, session_id: &str, extension: Duration) -> AuthResult<Session> {
        let session = self.store.renew(session_id, extension).await?;
        self.last_renewals
            .insert(session_id.to_string(), Instant::now());
        Ok(session)
    }

    /// Time until the cooldown allows another renewal. Zero when eligible.
    #[must_use]
    pub fn time_until_next_renewal(&self, session_id: &str) -> Duration {
        match self.last_renewals.get(session_id) {
            Some(last) => self
                .config
                .renewal_cooldown
                .saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Drops the cooldown entry for a session (e.g. after termination).
    pub fn clear_history(&self, session_id: &str) {
        self.last_renewals.remove(session_id);
    }

    fn cooldown_elapsed(&self, session_id: &str) -> bool {
        self.last_renewals
            .get(session_id)
            .is_none_or(|last| last.elapsed() >= self.config.renewal_cooldown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::metrics::SessionMetrics;
    use crate::session::model::DeviceInfo;
    use crate::session::store::NewSession;
    use crate::storage::InMemoryKvStore;

    fn fixture(config: SessionConfig) -> (Arc<SessionStore>, SessionRenewal) {
        let store = Arc::new(SessionStore::new(
            Arc::new(InMemoryKvStore::new()),
            config.clone(),
            Arc::new(SessionMetrics::new()),
        ));
        let renewal = SessionRenewal::new(Arc::clone(&store), config);
        (store, renewal)
    }

    fn new_session() -> NewSession {
        NewSession {
            user_id: "user-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            device_id: "d-1".to_string(),
            device_info: DeviceInfo::default(),
            ip_address: "198.51.100.7".to_string(),
            location: None,
            mfa_verified: false,
        }
    }

    #[tokio::test]
    async fn test_renewal_not_needed_far_from_expiry() {
        // Default config: 24h TTL, 1h threshold. A fresh session is far
        // from its expiry.
        let (store, renewal) = fixture(SessionConfig::default());
        let session = store.create(new_session()).await.unwrap();

        let outcome = renewal.renew(&session.id).await.unwrap();
        assert!(!outcome.renewed);
        assert_eq!(outcome.reason, Some(RenewalSkipReason::NotNeeded));
    }

    #[tokio::test]
    async fn test_renewal_fires_within_threshold() {
        let mut config = SessionConfig::default();
        config.ttl = Duration::from_secs(2);
        // Any remaining lifetime is within a huge threshold.
        config.renewal_threshold = Duration::from_secs(3600);
        config.renewal_cooldown = Duration::from_millis(10);
        let (store, renewal) = fixture(config);
        let session = store.create(new_session()).await.unwrap();

        let outcome = renewal.renew(&session.id).await.unwrap();
        assert!(outcome.renewed);
        let renewed = outcome.session.unwrap();
        assert!(renewed.expires_at >= session.expires_at);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_second_renewal() {
        let mut config = SessionConfig::default();
        config.ttl = Duration::from_secs(2);
        config.renewal_threshold = Duration::from_secs(3600);
        config.renewal_cooldown = Duration::from_secs(60);
        let (store, renewal) = fixture(config);
        let session = store.create(new_session()).await.unwrap();

        assert!(renewal.renew(&session.id).await.unwrap().renewed);

        let outcome = renewal.renew(&session.id).await.unwrap();
        assert!(!outcome.renewed);
        assert_eq!(outcome.reason, Some(RenewalSkipReason::CooldownActive));
        assert!(renewal.time_until_next_renewal(&session.id) > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_max_lifetime_stops_renewal() {
        let mut config = SessionConfig::default();
        config.ttl = Duration::from_secs(2);
        config.renewal_threshold = Duration::from_secs(3600);
        config.renewal_cooldown = Duration::from_millis(1);
        config.max_lifetime = Duration::from_millis(50);
        let (store, renewal) = fixture(config);
        let session = store.create(new_session()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        let outcome = renewal.renew(&session.id).await.unwrap();
        assert!(!outcome.renewed);
        assert_eq!(outcome.reason, Some(RenewalSkipReason::MaxLifetimeReached));
    }

    #[tokio::test]
    async fn test_missing_session() {
        let (_, renewal) = fixture(SessionConfig::default());
        let outcome = renewal.renew("no-such-session").await.unwrap();
        assert!(!outcome.renewed);
        assert_eq!(outcome.reason, Some(RenewalSkipReason::NotFound));
    }

    #[tokio::test]
    async fn test_disabled_renewal() {
        let (store, renewal) = fixture(SessionConfig::default());
        let renewal = renewal.disabled();
        let session = store.create(new_session()).await.unwrap();

        let outcome = renewal.renew(&session.id).await.unwrap();
        assert_eq!(outcome.reason, Some(RenewalSkipReason::Disabled));
    }

    #[tokio::test]
    async fn test_force_renew_bypasses_cooldown() {
        let mut config = SessionConfig::default();
        config.ttl = Duration::from_secs(2);
        config.renewal_threshold = Duration::from_secs(3600);
        config.renewal_cooldown = Duration::from_secs(60);
        let (store, renewal) = fixture(config);
        let session = store.create(new_session()).await.unwrap();

        assert!(renewal.renew(&session.id).await.unwrap().renewed);
        // Cooldown is active, but force_renew goes through.
        let forced = renewal
            .force_renew(&session.id, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(forced.expires_at > 0);
    }

    #[tokio::test]
    async fn test_extension_capped_by_remaining_lifetime() {
        let mut config = SessionConfig::default();
        config.ttl = Duration::from_secs(3600);
        config.renewal_threshold = Duration::from_secs(7200);
        config.renewal_cooldown = Duration::from_millis(1);
        config.max_lifetime = Duration::from_secs(600);
        let (store, renewal) = fixture(config);
        let session = store.create(new_session()).await.unwrap();

        let outcome = renewal.renew(&session.id).await.unwrap();
        assert!(outcome.renewed);
        let renewed = outcome.session.unwrap();
        // Extension is min(remaining lifetime ≈ 600s, ttl = 3600s).
        let now = crate::session::model::now_unix_ms();
        assert!(renewed.remaining_ms(now) <= 600_000);
    }
}
