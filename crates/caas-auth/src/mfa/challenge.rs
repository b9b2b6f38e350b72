//! MFA challenge state machine.
//!
//! A challenge is a one-shot, strictly TTL-bounded object:
//! `created → (verify attempt)* → verified | expired | exhausted`.
//!
//! Attempts are incremented *before* the verifier runs, so a crashed
//! verifier still consumes an attempt. Switching methods resets the
//! per-method attempt counter but is itself capped: cycling between two
//! methods cannot extend the attempt budget indefinitely.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::config::MfaConfig;
use crate::error::AuthError;
use crate::mfa::verifier::MethodVerifier;
use crate::session::model::now_unix_ms;
use crate::storage::kv::KeyValueStore;

const CHALLENGE_PREFIX: &str = "mfa_challenge:";

/// Supported MFA methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaMethod {
    /// Time-based one-time password.
    Totp,
    /// Single-use backup code.
    BackupCode,
}

impl MfaMethod {
    /// Returns the method as the stable wire string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::BackupCode => "backup_code",
        }
    }
}

impl fmt::Display for MfaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pending MFA challenge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MfaChallenge {
    /// Challenge ID.
    pub id: String,

    /// User being challenged.
    pub user_id: String,

    /// Session awaiting MFA.
    pub session_id: String,

    /// Currently selected method.
    pub method: MfaMethod,

    /// Methods the user may switch between.
    pub available_methods: Vec<MfaMethod>,

    /// Attempts consumed for the current method.
    pub attempts: u32,

    /// Attempt ceiling per method.
    pub max_attempts: u32,

    /// Method switches consumed.
    #[serde(default)]
    pub method_switches: u32,

    /// Expiry (Unix milliseconds).
    pub expires_at: i64,

    /// Creation time (Unix milliseconds).
    pub created_at: i64,
}

impl MfaChallenge {
    /// Returns `true` if the challenge is expired at `now_ms`.
    #[must_use]
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }
}

/// Outcome of one verification attempt.
#[derive(Debug, Clone, Serialize)]
pub struct MfaVerification {
    /// Whether the response verified.
    pub success: bool,

    /// The challenge this attempt was for.
    pub challenge_id: String,

    /// The method used.
    pub method: MfaMethod,

    /// Failure description, absent on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MfaVerification {
    fn failure(challenge_id: &str, method: MfaMethod, error: impl Into<String>) -> Self {
        Self {
            success: false,
            challenge_id: challenge_id.to_string(),
            method,
            error: Some(error.into()),
        }
    }
}

/// Manages the MFA challenge flow during authentication.
pub struct MfaChallengeService {
    kv: Arc<dyn KeyValueStore>,
    verifier: Arc<dyn MethodVerifier>,
    config: MfaConfig,
}

impl MfaChallengeService {
    /// Creates a new challenge service.
    #[must_use]
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        verifier: Arc<dyn MethodVerifier>,
        config: MfaConfig,
    ) -> Self {
        Self {
            kv,
            verifier,
            config,
        }
    }

    fn key(challenge_id: &str) -> String {
        format!("{CHALLENGE_PREFIX}{challenge_id}")
    }

    /// Creates a challenge defaulting to the first available method.
    ///
    /// # Errors
    /// Rejects an empty method list; propagates storage failures.
    pub async fn create_challenge(
        &self,
        user_id: &str,
        session_id: &str,
        available_methods: Vec<MfaMethod>,
    ) -> AuthResult<MfaChallenge> {
        let Some(&first_method) = available_methods.first() else {
            return Err(AuthError::invalid_request(
                "At least one MFA method is required",
            ));
        };

        let now = now_unix_ms();
        let challenge = MfaChallenge {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            method: first_method,
            available_methods,
            attempts: 0,
            max_attempts: self.config.max_attempts,
            method_switches: 0,
            expires_at: now + self.config.challenge_ttl.as_millis() as i64,
            created_at: now,
        };
        self.put(&challenge).await?;
        Ok(challenge)
    }

    /// Verifies a challenge response.
    ///
    /// Terminal failures (missing, expired, exhausted) destroy the
    /// challenge; a wrong code leaves it live for retry up to the limit.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn verify_challenge(
        &self,
        challenge_id: &str,
        method: MfaMethod,
        response: &str,
    ) -> AuthResult<MfaVerification> {
        let Some(mut challenge) = self.get_challenge(challenge_id).await? else {
            return Ok(MfaVerification::failure(
                challenge_id,
                method,
                "Challenge not found or expired",
            ));
        };

        if challenge.is_expired_at(now_unix_ms()) {
            self.delete_challenge(challenge_id).await?;
            return Ok(MfaVerification::failure(
                challenge_id,
                method,
                "Challenge expired",
            ));
        }

        if challenge.attempts >= challenge.max_attempts {
            self.delete_challenge(challenge_id).await?;
            tracing::warn!(
                challenge_id,
                user_id = %challenge.user_id,
                "MFA attempt ceiling reached, challenge destroyed"
            );
            return Ok(MfaVerification::failure(
                challenge_id,
                method,
                "Maximum attempts exceeded",
            ));
        }

        if !challenge.available_methods.contains(&method) {
            return Ok(MfaVerification::failure(
                challenge_id,
                method,
                "Method not available",
            ));
        }

        // Consume the attempt before verifying, so a crashed verifier
        // cannot grant a free retry.
        challenge.attempts += 1;
        self.put_preserving_ttl(&challenge).await?;

        let valid = self
            .verifier
            .verify(&challenge.user_id, method, response)
            .await?;
        if !valid {
            return Ok(MfaVerification::failure(
                challenge_id,
                method,
                "Invalid verification code",
            ));
        }

        // Single use: success destroys the challenge.
        self.delete_challenge(challenge_id).await?;
        Ok(MfaVerification {
            success: true,
            challenge_id: challenge_id.to_string(),
            method,
            error: None,
        })
    }

    /// Switches the active method, resetting the per-method attempt
    /// counter. Switches are capped; exceeding the cap destroys the
    /// challenge.
    ///
    /// # Errors
    ///
    /// - [`AuthError::ChallengeFailed`] for a missing challenge, an
    ///   unavailable method, or an exhausted switch budget
    /// - storage failures
    pub async fn switch_method(
        &self,
        challenge_id: &str,
        method: MfaMethod,
    ) -> AuthResult<MfaChallenge> {
        let mut challenge = self
            .get_challenge(challenge_id)
            .await?
            .ok_or_else(|| AuthError::challenge_failed("Challenge not found"))?;

        if !challenge.available_methods.contains(&method) {
            return Err(AuthError::challenge_failed("Method not available"));
        }

        if challenge.method_switches >= self.config.max_method_switches {
            self.delete_challenge(challenge_id).await?;
            tracing::warn!(
                challenge_id,
                user_id = %challenge.user_id,
                "MFA method switch ceiling reached, challenge destroyed"
            );
            return Err(AuthError::challenge_failed(
                "Maximum method switches exceeded",
            ));
        }

        challenge.method = method;
        challenge.method_switches += 1;
        challenge.attempts = 0;
        self.put_preserving_ttl(&challenge).await?;
        Ok(challenge)
    }

    /// Loads a challenge.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn get_challenge(&self, challenge_id: &str) -> AuthResult<Option<MfaChallenge>> {
        match self.kv.get(&Self::key(challenge_id)).await? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| AuthError::storage(format!("Corrupt MFA challenge: {e}"))),
            None => Ok(None),
        }
    }

    /// Deletes a challenge.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn delete_challenge(&self, challenge_id: &str) -> AuthResult<()> {
        self.kv.delete(&Self::key(challenge_id)).await?;
        Ok(())
    }

    async fn put(&self, challenge: &MfaChallenge) -> AuthResult<()> {
        let json = serde_json::to_string(challenge)
            .map_err(|e| AuthError::internal(format!("Failed to serialize challenge: {e}")))?;
        self.kv
            .put(
                &Self::key(&challenge.id),
                &json,
                Some(self.config.challenge_ttl),
            )
            .await
    }

    async fn put_preserving_ttl(&self, challenge: &MfaChallenge) -> AuthResult<()> {
        let key = Self::key(&challenge.id);
        let Some(remaining) = self.kv.ttl(&key).await?.remaining() else {
            return Ok(());
        };
        let json = serde_json::to_string(challenge)
            .map_err(|e| AuthError::internal(format!("Failed to serialize challenge: {e}")))?;
        self.kv.put(&key, &json, Some(remaining)).await
    }
}
