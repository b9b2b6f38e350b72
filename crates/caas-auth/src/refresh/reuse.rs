//! Refresh token reuse detection and theft containment.
//!
//! A refresh token presented after it was rotated, revoked, or after its
//! family was revoked is evidence of theft: either the attacker or the
//! legitimate client holds a stale token, and there is no way to tell
//! which. Containment is family-wide: revoke the lineage, revoke all of
//! the user's refresh tokens, write a user-wide revocation fact, and
//! escalate.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::refresh::family::FamilyTracker;
use crate::refresh::store::{RefreshTokenRecord, RefreshTokenStore};
use crate::revocation::RevocationService;

/// What to do about a refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReuseAction {
    /// Legitimate rotation; proceed.
    Allow,
    /// Log and alert without revoking.
    Alert,
    /// Revoke the entire family and all of the user's refresh tokens.
    RevokeFamily,
}

/// Classification of one refresh attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ReuseVerdict {
    /// Whether the attempt is reuse.
    pub is_reuse: bool,

    /// The containment action to take.
    pub action: ReuseAction,

    /// What triggered the classification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReuseVerdict {
    fn allow() -> Self {
        Self {
            is_reuse: false,
            action: ReuseAction::Allow,
            reason: None,
        }
    }

    fn revoke_family(reason: impl Into<String>) -> Self {
        Self {
            is_reuse: true,
            action: ReuseAction::RevokeFamily,
            reason: Some(reason.into()),
        }
    }
}

/// Out-of-band pattern heuristics over a user's refresh behavior.
#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousActivity {
    /// Whether the pattern looks anomalous.
    pub suspicious: bool,

    /// What the pattern was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Maximum live families per user before the pattern is flagged.
const MAX_ACTIVE_FAMILIES: usize = 10;

/// Maximum families created within the last hour before the pattern is
/// flagged.
const MAX_RECENT_FAMILIES: usize = 5;

/// Detects and contains refresh token reuse.
pub struct ReuseDetector {
    token_store: Arc<RefreshTokenStore>,
    family_tracker: Arc<FamilyTracker>,
    revocation: Arc<RevocationService>,
}

impl ReuseDetector {
    /// Creates a new detector.
    #[must_use]
    pub fn new(
        token_store: Arc<RefreshTokenStore>,
        family_tracker: Arc<FamilyTracker>,
        revocation: Arc<RevocationService>,
    ) -> Self {
        Self {
            token_store,
            family_tracker,
            revocation,
        }
    }

    /// Classifies a refresh attempt against the stored record.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn detect(&self, record: &RefreshTokenRecord) -> AuthResult<ReuseVerdict> {
        if record.used {
            return Ok(ReuseVerdict::revoke_family("Token has already been used"));
        }
        if record.revoked {
            return Ok(ReuseVerdict::revoke_family("Token has been revoked"));
        }
        if self.family_tracker.is_revoked(&record.family_id).await? {
            return Ok(ReuseVerdict::revoke_family("Token family has been revoked"));
        }
        Ok(ReuseVerdict::allow())
    }

    /// Executes the verdict's containment action.
    ///
    /// `RevokeFamily` revokes the lineage, all of the user's refresh
    /// tokens, and writes a user-wide revocation fact so already-issued
    /// access tokens die with it. This path is never silent.
    ///
    /// # Errors
    /// Propagates storage failures from the revocation writes (they fail
    /// loud); the event publish inside the revocation service remains
    /// best-effort.
    pub async fn handle_reuse(
        &self,
        record: &RefreshTokenRecord,
        verdict: &ReuseVerdict,
    ) -> AuthResult<()> {
        if !verdict.is_reuse {
            return Ok(());
        }

        let reason = verdict.reason.as_deref().unwrap_or("reuse detected");
        match verdict.action {
            ReuseAction::RevokeFamily => {
                self.family_tracker.revoke(&record.family_id).await?;
                self.token_store
                    .revoke_all_for_user(&record.user_id)
                    .await?;
                self.revocation
                    .revoke_user_tokens(
                        &record.user_id,
                        "refresh_token_reuse",
                        serde_json::json!({
                            "family_id": record.family_id,
                            "session_id": record.session_id,
                            "trigger": reason,
                        }),
                    )
                    .await?;

                tracing::error!(
                    user_id = %record.user_id,
                    family_id = %record.family_id,
                    session_id = %record.session_id,
                    reason,
                    "refresh token reuse detected, family revoked"
                );
            }
            ReuseAction::Alert => {
                tracing::warn!(
                    user_id = %record.user_id,
                    family_id = %record.family_id,
                    session_id = %record.session_id,
                    reason,
                    "suspicious refresh token activity"
                );
            }
            ReuseAction::Allow => {}
        }
        Ok(())
    }

    /// Validates the record's lineage: a token with a parent must have that
    /// parent in its family's token list. A violation means tampering and
    /// is handled as reuse.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn validate_chain(&self, record: &RefreshTokenRecord) -> AuthResult<bool> {
        match record.parent_id {
            None => Ok(true),
            Some(ref parent_id) => {
                self.family_tracker
                    .is_token_in_family(&record.family_id, parent_id)
                    .await
            }
        }
    }

    /// Checks a user's refresh behavior for anomalous patterns. Flags the
    /// user for out-of-band alerting without blocking the request.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn check_refresh_pattern(&self, user_id: &str) -> AuthResult<SuspiciousActivity> {
        let families = self.family_tracker.user_families(user_id).await?;

        let active = families.iter().filter(|f| !f.revoked).count();
        if active > MAX_ACTIVE_FAMILIES {
            return Ok(SuspiciousActivity {
                suspicious: true,
                reason: Some("Too many active token families".to_string()),
            });
        }

        let hour_ago =
            (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64 - 3_600_000;
        let recent = families.iter().filter(|f| f.created_at > hour_ago).count();
        if recent > MAX_RECENT_FAMILIES {
            return Ok(SuspiciousActivity {
                suspicious: true,
                reason: Some("Rapid token family creation".to_string()),
            });
        }

        Ok(SuspiciousActivity {
            suspicious: false,
            reason: None,
        })
    }
}
