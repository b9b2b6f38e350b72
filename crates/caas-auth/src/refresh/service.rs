//! Refresh service: login issuance and rotation.
//!
//! The rotation flow, in order:
//!
//! 1. verify the refresh JWT's signature and claims
//! 2. look up the stored record by token hash (absent → not found)
//! 3. run reuse detection (used / revoked / family revoked → containment)
//! 4. validate chain integrity (unknown parent → containment)
//! 5. atomically mark the token used; the losing side of a concurrent
//!    rotation lands here and is handled exactly like replay
//! 6. issue the new pair, append the new token to the family
//!
//! Pattern heuristics run after a successful rotation and only flag the
//! user for out-of-band alerting; they never block the request.

use std::sync::Arc;
use std::time::Duration;

use crate::AuthResult;
use crate::config::{ConfigError, RotationConfig};
use crate::error::AuthError;
use crate::refresh::family::FamilyTracker;
use crate::refresh::reuse::{ReuseAction, ReuseDetector, ReuseVerdict};
use crate::refresh::store::{RefreshTokenRecord, RefreshTokenStore};
use crate::token::claims::{IssuedPair, RefreshTokenClaims, TokenPair};
use crate::token::issuer::{IssueRequest, TokenIssuer};
use crate::token::validator::TokenValidator;

/// Refresh token rotation policy.
///
/// Construction validates the flag combination: `revoke_family` without
/// `reuse_detection` is rejected, because family revocation is driven by
/// reuse verdicts.
#[derive(Debug, Clone, Copy)]
pub struct RotationPolicy {
    enabled: bool,
    reuse_detection: bool,
    revoke_family: bool,
}

impl RotationPolicy {
    /// Creates a policy, validating flag consistency.
    ///
    /// # Errors
    /// Returns a configuration error if `revoke_family` is set without
    /// `reuse_detection`.
    pub fn new(
        enabled: bool,
        reuse_detection: bool,
        revoke_family: bool,
    ) -> Result<Self, ConfigError> {
        if revoke_family && !reuse_detection {
            return Err(ConfigError::InvalidValue(
                "revoke_family requires reuse_detection".to_string(),
            ));
        }
        Ok(Self {
            enabled,
            reuse_detection,
            revoke_family,
        })
    }

    /// Builds a policy from the rotation config section.
    ///
    /// # Errors
    /// Returns a configuration error for inconsistent flags.
    pub fn from_config(config: &RotationConfig) -> Result<Self, ConfigError> {
        Self::new(config.enabled, config.reuse_detection, config.revoke_family)
    }

    /// Whether refresh tokens rotate on use.
    #[must_use]
    pub fn is_rotation_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether reuse detection runs on refresh.
    #[must_use]
    pub fn is_reuse_detection_enabled(&self) -> bool {
        self.reuse_detection
    }

    /// Whether detected reuse revokes the whole family.
    #[must_use]
    pub fn is_revoke_family_enabled(&self) -> bool {
        self.revoke_family
    }
}

/// Issues refresh tokens at login and rotates them on use.
pub struct RefreshService {
    issuer: Arc<TokenIssuer>,
    validator: Arc<TokenValidator>,
    store: Arc<RefreshTokenStore>,
    families: Arc<FamilyTracker>,
    reuse: ReuseDetector,
    policy: RotationPolicy,
    refresh_ttl: Duration,
}

impl RefreshService {
    /// Creates a new refresh service.
    #[must_use]
    pub fn new(
        issuer: Arc<TokenIssuer>,
        validator: Arc<TokenValidator>,
        store: Arc<RefreshTokenStore>,
        families: Arc<FamilyTracker>,
        reuse: ReuseDetector,
        policy: RotationPolicy,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            issuer,
            validator,
            store,
            families,
            reuse,
            policy,
            refresh_ttl,
        }
    }

    /// Issues the initial token pair at login, opening a new family.
    ///
    /// # Errors
    /// Propagates issuance and storage failures.
    pub async fn login(&self, request: &IssueRequest) -> AuthResult<IssuedPair> {
        let pair = self.issuer.issue_pair(request)?;

        let family_id = self
            .families
            .create_family(&request.user_id, &pair.refresh.jti)
            .await?;

        let record = RefreshTokenRecord {
            token_id: pair.refresh.jti.clone(),
            user_id: request.user_id.clone(),
            tenant_id: request.tenant_id.clone(),
            session_id: request.session_id.clone(),
            device_id: request.device_id.clone(),
            family_id,
            parent_id: None,
            scopes: request.scopes.clone(),
            issued_at: pair.refresh.iat,
            expires_at: pair.refresh.exp,
            used: false,
            revoked: false,
        };
        self.store
            .store(&pair.tokens.refresh_token, &record, self.refresh_ttl)
            .await?;

        Ok(pair)
    }

    /// Exchanges a refresh token for a new access/refresh pair.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TokenNotFound`] when the token has no stored record
    /// - [`AuthError::ReuseDetected`] on replay, chain violation, or a lost
    ///   rotation race (the family is revoked as containment)
    /// - validation errors for bad signatures or expired tokens
    pub async fn refresh(&self, raw_token: &str) -> AuthResult<IssuedPair> {
        // 1. Signature and claim checks on the presented JWT
        self.validator.validate_refresh(raw_token)?;

        // 2. Stored record lookup
        let record = self
            .store
            .get(raw_token)
            .await?
            .ok_or(AuthError::TokenNotFound)?;

        // 3. Reuse detection
        if self.policy.is_reuse_detection_enabled() {
            let mut verdict = self.reuse.detect(&record).await?;
            if verdict.is_reuse {
                if !self.policy.is_revoke_family_enabled() {
                    verdict.action = ReuseAction::Alert;
                }
                self.reuse.handle_reuse(&record, &verdict).await?;
                return Err(AuthError::reuse_detected(
                    verdict
                        .reason
                        .unwrap_or_else(|| "refresh token reuse".to_string()),
                ));
            }

            // 4. Chain integrity: an unknown parent means tampering
            if !self.reuse.validate_chain(&record).await? {
                let verdict = ReuseVerdict {
                    is_reuse: true,
                    action: if self.policy.is_revoke_family_enabled() {
                        ReuseAction::RevokeFamily
                    } else {
                        ReuseAction::Alert
                    },
                    reason: Some("Token chain integrity violation".to_string()),
                };
                self.reuse.handle_reuse(&record, &verdict).await?;
                return Err(AuthError::reuse_detected("Token chain integrity violation"));
            }
        }

        if !self.policy.is_rotation_enabled() {
            // Rotation disabled: reissue an access token against the same
            // session, leaving the refresh token untouched.
            let request = Self::issue_request(&record);
            let (access_token, access) = self.issuer.issue_access(&request)?;
            let refresh = RefreshTokenClaims {
                iss: self.issuer.issuer().to_string(),
                sub: record.user_id.clone(),
                jti: record.token_id.clone(),
                exp: record.expires_at,
                iat: record.issued_at,
                token_type: "refresh".to_string(),
            };
            return Ok(IssuedPair {
                tokens: TokenPair {
                    access_token,
                    refresh_token: raw_token.to_string(),
                    token_type: "Bearer".to_string(),
                    expires_in: (access.exp - access.iat).max(0) as u64,
                    refresh_expires_in: self.refresh_ttl.as_secs(),
                },
                access,
                refresh,
            });
        }

        // 5. Single conditional write; the loser of a concurrent rotation
        //    is treated exactly like replay.
        if !self.store.mark_used(raw_token).await? {
            let verdict = ReuseVerdict {
                is_reuse: true,
                action: if self.policy.is_revoke_family_enabled() {
                    ReuseAction::RevokeFamily
                } else {
                    ReuseAction::Alert
                },
                reason: Some("Concurrent rotation of the same token".to_string()),
            };
            self.reuse.handle_reuse(&record, &verdict).await?;
            return Err(AuthError::reuse_detected(
                "Concurrent rotation of the same token",
            ));
        }

        // 6. Issue the successor pair in the same family and session
        let request = Self::issue_request(&record);
        let pair = self.issuer.issue_pair(&request)?;

        let new_record = RefreshTokenRecord {
            token_id: pair.refresh.jti.clone(),
            user_id: record.user_id.clone(),
            tenant_id: record.tenant_id.clone(),
            session_id: record.session_id.clone(),
            device_id: record.device_id.clone(),
            family_id: record.family_id.clone(),
            parent_id: Some(record.token_id.clone()),
            scopes: record.scopes.clone(),
            issued_at: pair.refresh.iat,
            expires_at: pair.refresh.exp,
            used: false,
            revoked: false,
        };
        self.store
            .store(&pair.tokens.refresh_token, &new_record, self.refresh_ttl)
            .await?;
        self.families
            .add_token(&record.family_id, &pair.refresh.jti)
            .await?;

        // Retire the consumed token.
        self.store.revoke(raw_token).await?;

        match self.reuse.check_refresh_pattern(&record.user_id).await {
            Ok(activity) if activity.suspicious => {
                tracing::warn!(
                    user_id = %record.user_id,
                    reason = activity.reason.as_deref().unwrap_or("unknown"),
                    "suspicious refresh pattern"
                );
            }
            Ok(_) => {}
            Err(error) => {
                tracing::debug!(%error, "refresh pattern check failed");
            }
        }

        Ok(pair)
    }

    /// Revokes all of a user's refresh tokens.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn revoke_all_user_tokens(&self, user_id: &str) -> AuthResult<u64> {
        self.store.revoke_all_for_user(user_id).await
    }

    /// Returns the stored record for a raw token.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn token_info(&self, raw_token: &str) -> AuthResult<Option<RefreshTokenRecord>> {
        self.store.get(raw_token).await
    }

    /// Returns `true` if the token has a live, unconsumed record.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn is_valid(&self, raw_token: &str) -> AuthResult<bool> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        Ok(self
            .store
            .get(raw_token)
            .await?
            .is_some_and(|r| !r.used && !r.revoked && !r.is_expired_at(now)))
    }

    fn issue_request(record: &RefreshTokenRecord) -> IssueRequest {
        IssueRequest {
            user_id: record.user_id.clone(),
            tenant_id: record.tenant_id.clone(),
            session_id: record.session_id.clone(),
            device_id: record.device_id.clone(),
            scopes: record.scopes.clone(),
        }
    }
}
