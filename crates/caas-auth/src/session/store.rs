//! Canonical session storage.
//!
//! Sessions live at `session:{id}` with a TTL equal to their remaining
//! lifetime; a per-user index set supports listing and bulk termination.
//! Creation enforces the per-user session cap by evicting the oldest
//! session.
//!
//! The active-session gauge is incremented once per create and
//! decremented exactly once per deleted session. Expiry is accounted for
//! solely by [`cleanup_expired`](SessionStore::cleanup_expired);
//! termination deactivates the record but leaves it to the sweep, so a
//! terminated-then-expired session can never be counted down twice.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::AuthResult;
use crate::config::SessionConfig;
use crate::error::AuthError;
use crate::metrics::SessionMetrics;
use crate::session::model::{DeviceInfo, GeoLocation, Session, now_unix_ms};
use crate::storage::kv::KeyValueStore;

const SESSION_PREFIX: &str = "session:";
const USER_INDEX_PREFIX: &str = "user_sessions:";

/// The user index must outlive its session records so the cleanup sweep
/// can account for sessions that expired out of the store.
const USER_INDEX_RETENTION: Duration = Duration::from_secs(30 * 24 * 3600);

/// Parameters for creating a session.
#[derive(Debug, Clone)]
pub struct NewSession {
    /// User logging in.
    pub user_id: String,

    /// Tenant the login belongs to.
    pub tenant_id: String,

    /// Stable device identifier.
    pub device_id: String,

    /// Device details.
    pub device_info: DeviceInfo,

    /// Login IP.
    pub ip_address: String,

    /// Geo lookup of the login IP.
    pub location: Option<GeoLocation>,

    /// Whether MFA already passed for this login.
    pub mfa_verified: bool,
}

/// Stores sessions with sliding expiry and a per-user index.
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    config: SessionConfig,
    metrics: Arc<SessionMetrics>,
}

impl SessionStore {
    /// Creates a new store.
    #[must_use]
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        config: SessionConfig,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            kv,
            config,
            metrics,
        }
    }

    fn session_key(session_id: &str) -> String {
        format!("{SESSION_PREFIX}{session_id}")
    }

    fn user_index_key(user_id: &str) -> String {
        format!("{USER_INDEX_PREFIX}{user_id}")
    }

    /// Creates a session, evicting the user's oldest session when the
    /// per-user cap is reached.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn create(&self, new_session: NewSession) -> AuthResult<Session> {
        let existing = self.user_sessions(&new_session.user_id).await?;
        if existing.len() >= self.config.max_sessions_per_user
            && let Some(oldest) = existing.iter().min_by_key(|s| s.created_at)
        {
            tracing::debug!(
                user_id = %new_session.user_id,
                evicted = %oldest.id,
                "session cap reached, evicting oldest session"
            );
            self.delete(&oldest.id).await?;
            self.metrics.decrement_active();
        }

        let now = now_unix_ms();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: new_session.user_id,
            tenant_id: new_session.tenant_id,
            device_id: new_session.device_id,
            device_info: new_session.device_info,
            ip_address: new_session.ip_address,
            location: new_session.location,
            created_at: now,
            last_activity: now,
            expires_at: now + self.config.ttl.as_millis() as i64,
            is_active: true,
            mfa_verified: new_session.mfa_verified,
        };

        self.put_session(&session).await?;

        let index_key = Self::user_index_key(&session.user_id);
        self.kv.set_add(&index_key, &session.id).await?;
        self.kv.expire(&index_key, USER_INDEX_RETENTION).await?;

        self.metrics.increment_active();
        Ok(session)
    }

    /// Loads a session by ID.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn get(&self, session_id: &str) -> AuthResult<Option<Session>> {
        match self.kv.get(&Self::session_key(session_id)).await? {
            Some(json) => Session::from_json(&json).map(Some),
            None => Ok(None),
        }
    }

    /// Bumps `last_activity`.
    ///
    /// # Errors
    /// Propagates storage failures; a missing session is a no-op.
    pub async fn touch(&self, session_id: &str) -> AuthResult<()> {
        if let Some(mut session) = self.get(session_id).await? {
            session.last_activity = now_unix_ms();
            self.put_session(&session).await?;
        }
        Ok(())
    }

    /// Extends a session's expiry to `now + extension`.
    ///
    /// # Errors
    /// Returns [`AuthError::SessionExpired`] for a missing session.
    pub async fn renew(&self, session_id: &str, extension: Duration) -> AuthResult<Session> {
        let mut session = self
            .get(session_id)
            .await?
            .ok_or(AuthError::SessionExpired)?;
        let now = now_unix_ms();
        session.expires_at = now + extension.as_millis() as i64;
        session.last_activity = now;
        self.put_session(&session).await?;
        Ok(session)
    }

    /// Marks the session's MFA check as passed.
    ///
    /// # Errors
    /// Returns [`AuthError::SessionExpired`] for a missing session.
    pub async fn mark_mfa_verified(&self, session_id: &str) -> AuthResult<Session> {
        let mut session = self
            .get(session_id)
            .await?
            .ok_or(AuthError::SessionExpired)?;
        session.mfa_verified = true;
        self.put_session(&session).await?;
        Ok(session)
    }

    /// Terminates a session: it stops validating immediately but its
    /// record stays until expiry, so the cleanup sweep accounts for it
    /// exactly once.
    ///
    /// # Errors
    /// Propagates storage failures; a missing session is a no-op.
    pub async fn terminate(&self, session_id: &str) -> AuthResult<()> {
        if let Some(mut session) = self.get(session_id).await? {
            session.is_active = false;
            self.put_session(&session).await?;
            tracing::info!(session = ?session.snapshot(), "session terminated");
        }
        Ok(())
    }

    /// Removes a session record and its index entry.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn delete(&self, session_id: &str) -> AuthResult<()> {
        if let Some(session) = self.get(session_id).await? {
            self.kv
                .set_remove(&Self::user_index_key(&session.user_id), session_id)
                .await?;
        }
        self.kv.delete(&Self::session_key(session_id)).await?;
        Ok(())
    }

    /// Returns all live sessions of a user.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn user_sessions(&self, user_id: &str) -> AuthResult<Vec<Session>> {
        let index_key = Self::user_index_key(user_id);
        let mut sessions = Vec::new();
        for session_id in self.kv.set_members(&index_key).await? {
            match self.get(&session_id).await? {
                Some(session) => sessions.push(session),
                // Stale index reference to an expired record.
                None => self.kv.set_remove(&index_key, &session_id).await?,
            }
        }
        Ok(sessions)
    }

    /// Terminates and deletes all of a user's sessions. Returns the count.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn delete_user_sessions(&self, user_id: &str) -> AuthResult<u64> {
        let mut deleted = 0;
        for session in self.user_sessions(user_id).await? {
            self.delete(&session.id).await?;
            self.metrics.decrement_active();
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Number of sessions indexed for a user.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn user_session_count(&self, user_id: &str) -> AuthResult<usize> {
        self.kv.set_len(&Self::user_index_key(user_id)).await
    }

    /// Returns `true` if the session record exists.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn exists(&self, session_id: &str) -> AuthResult<bool> {
        self.kv.exists(&Self::session_key(session_id)).await
    }

    /// Sweeps expired sessions out of every user index, decrementing the
    /// active-session gauge once per swept session. Idempotent and safe to
    /// run concurrently from multiple instances.
    ///
    /// Returns the number of sessions swept.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn cleanup_expired(&self) -> AuthResult<u64> {
        let now = now_unix_ms();
        let mut cleaned = 0;

        for index_key in self.kv.scan_keys(USER_INDEX_PREFIX).await? {
            for session_id in self.kv.set_members(&index_key).await? {
                let swept = match self.get(&session_id).await? {
                    // Record outlived its TTL safety margin but is past
                    // expiry.
                    Some(session) if session.is_expired_at(now) => {
                        self.kv.delete(&Self::session_key(&session_id)).await?;
                        true
                    }
                    Some(_) => false,
                    // Record already expired out of the store; the index
                    // entry is what remains to sweep.
                    None => true,
                };
                if swept {
                    self.kv.set_remove(&index_key, &session_id).await?;
                    self.metrics.decrement_active();
                    cleaned += 1;
                }
            }
        }
        Ok(cleaned)
    }

    async fn put_session(&self, session: &Session) -> AuthResult<()> {
        let now = now_unix_ms();
        let remaining = session.remaining_ms(now);
        if remaining <= 0 {
            return Ok(());
        }
        self.kv
            .put(
                &Self::session_key(&session.id),
                &session.to_json()?,
                Some(Duration::from_millis(remaining as u64)),
            )
            .await
    }
}
