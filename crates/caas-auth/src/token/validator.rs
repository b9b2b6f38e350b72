//! Token validation pipeline.
//!
//! Validation short-circuits on the first failure, in a fixed order:
//!
//! 1. size limit
//! 2. structural check (three non-empty parts)
//! 3. algorithm allow-list (`none` is always rejected)
//! 4. signature, using the public key named by the header `kid`
//! 5. standard claims (`exp` with clock tolerance, `iss`)
//! 6. revocation facts
//!
//! Each failure maps to a distinct [`TokenValidationError`] variant so
//! callers can tell an expired token from a revoked one from a tampered
//! one. If the revocation store is unreachable the check **fails closed**:
//! the token is reported revoked rather than silently accepted.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::Validation;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::revocation::RevocationService;
use crate::token::claims::{AccessTokenClaims, RefreshTokenClaims};
use crate::token::keys::{KeyProvider, SigningAlgorithm};

/// Algorithms accepted during validation.
const ALLOWED_ALGORITHMS: [SigningAlgorithm; 2] =
    [SigningAlgorithm::RS256, SigningAlgorithm::ES256];

// ============================================================================
// Error Types
// ============================================================================

/// Validation failures, one variant per distinguishable cause.
#[derive(Debug, thiserror::Error)]
pub enum TokenValidationError {
    /// The token exceeds the configured size limit.
    #[error("Token size ({size} bytes) exceeds maximum allowed ({max} bytes)")]
    TooLarge {
        /// Actual token size in bytes.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The token is structurally invalid or cannot be parsed.
    #[error("Malformed token: {message}")]
    Malformed {
        /// Description of the structural problem.
        message: String,
    },

    /// The token's algorithm is not in the allow-list.
    #[error("Algorithm \"{algorithm}\" is not allowed")]
    BadAlgorithm {
        /// The rejected algorithm name.
        algorithm: String,
    },

    /// The signature does not verify, or the signing key is unknown.
    #[error("Invalid signature: {message}")]
    BadSignature {
        /// Description of the signature failure.
        message: String,
    },

    /// A standard claim failed validation.
    #[error("Invalid claim: {message}")]
    BadClaim {
        /// Description of the claim failure.
        message: String,
    },

    /// The token has expired (beyond the clock tolerance).
    #[error("Token expired")]
    Expired,

    /// A revocation fact applies to the token.
    #[error("Token revoked: {reason}")]
    Revoked {
        /// The matching revocation fact.
        reason: String,
    },
}

impl TokenValidationError {
    /// Creates a new `Malformed` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Creates a new `BadSignature` error.
    #[must_use]
    pub fn bad_signature(message: impl Into<String>) -> Self {
        Self::BadSignature {
            message: message.into(),
        }
    }

    /// Creates a new `BadClaim` error.
    #[must_use]
    pub fn bad_claim(message: impl Into<String>) -> Self {
        Self::BadClaim {
            message: message.into(),
        }
    }

    /// Stable kind name for logging and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TooLarge { .. } => "too_large",
            Self::Malformed { .. } => "malformed",
            Self::BadAlgorithm { .. } => "bad_algorithm",
            Self::BadSignature { .. } => "bad_signature",
            Self::BadClaim { .. } => "bad_claim",
            Self::Expired => "expired",
            Self::Revoked { .. } => "revoked",
        }
    }
}

impl From<TokenValidationError> for AuthError {
    fn from(err: TokenValidationError) -> Self {
        match err {
            TokenValidationError::Expired => Self::TokenExpired,
            TokenValidationError::Revoked { reason } => Self::TokenRevoked { reason },
            other => Self::invalid_token(other.to_string()),
        }
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> TokenValidationError {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::ExpiredSignature => TokenValidationError::Expired,
        ErrorKind::InvalidSignature => TokenValidationError::bad_signature("signature mismatch"),
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName | ErrorKind::MissingAlgorithm => {
            TokenValidationError::BadAlgorithm {
                algorithm: "unknown".to_string(),
            }
        }
        ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidSubject
        | ErrorKind::ImmatureSignature
        | ErrorKind::MissingRequiredClaim(_) => TokenValidationError::bad_claim(err.to_string()),
        _ => TokenValidationError::malformed(err.to_string()),
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Options for a single validation call.
#[derive(Debug, Clone, Copy)]
pub struct ValidateOptions {
    /// Consult the revocation store (step 6). Enabled by default.
    pub check_revocation: bool,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            check_revocation: true,
        }
    }
}

#[derive(Deserialize)]
struct RawHeader {
    alg: Option<String>,
    kid: Option<String>,
}

/// Validates signed tokens against keys, claims, and revocation facts.
pub struct TokenValidator {
    key_provider: Arc<KeyProvider>,
    revocation: Option<Arc<RevocationService>>,
    issuer: String,
    clock_tolerance_secs: u64,
    max_token_size: usize,
}

impl TokenValidator {
    /// Creates a validator without revocation checking (step 6 is skipped).
    #[must_use]
    pub fn new(key_provider: Arc<KeyProvider>, config: &AuthConfig) -> Self {
        Self {
            key_provider,
            revocation: None,
            issuer: config.issuer.clone(),
            clock_tolerance_secs: config.jwt.clock_tolerance.as_secs(),
            max_token_size: config.jwt.max_token_size,
        }
    }

    /// Attaches a revocation service; validation then consults the four
    /// revocation facts as its final step.
    #[must_use]
    pub fn with_revocation(mut self, revocation: Arc<RevocationService>) -> Self {
        self.revocation = Some(revocation);
        self
    }

    /// Validates an access token.
    ///
    /// # Errors
    ///
    /// Returns the first pipeline failure; see [`TokenValidationError`] for
    /// the distinguishable kinds.
    pub async fn validate(
        &self,
        token: &str,
        options: ValidateOptions,
    ) -> Result<AccessTokenClaims, TokenValidationError> {
        let claims: AccessTokenClaims = self.verify_signed(token)?;

        if options.check_revocation
            && let Some(ref revocation) = self.revocation
        {
            let result = revocation
                .is_revoked(
                    &claims.jti,
                    &claims.user_id,
                    &claims.session_id,
                    &claims.tenant_id,
                    claims.iat,
                )
                .await;

            match result {
                Ok(Some(reason)) => {
                    return Err(TokenValidationError::Revoked {
                        reason: reason.as_str().to_string(),
                    });
                }
                Ok(None) => {}
                Err(error) => {
                    // Fail closed: an unreachable revocation store must not
                    // let a potentially revoked token through.
                    tracing::warn!(%error, "revocation check unavailable, failing closed");
                    return Err(TokenValidationError::Revoked {
                        reason: "revocation_check_unavailable".to_string(),
                    });
                }
            }
        }

        Ok(claims)
    }

    /// Validates a refresh token's signature and claims.
    ///
    /// Revocation state for refresh tokens lives in the refresh token store
    /// and its family, checked by the refresh service.
    ///
    /// # Errors
    ///
    /// Returns the first pipeline failure.
    pub fn validate_refresh(&self, token: &str) -> Result<RefreshTokenClaims, TokenValidationError> {
        let claims: RefreshTokenClaims = self.verify_signed(token)?;
        if claims.token_type != "refresh" {
            return Err(TokenValidationError::bad_claim(format!(
                "Expected refresh token, got token_type \"{}\"",
                claims.token_type
            )));
        }
        Ok(claims)
    }

    /// Runs pipeline steps 1-5 and deserializes the verified claims.
    fn verify_signed<T: DeserializeOwned>(&self, token: &str) -> Result<T, TokenValidationError> {
        // 1. Size limit
        if token.len() > self.max_token_size {
            return Err(TokenValidationError::TooLarge {
                size: token.len(),
                max: self.max_token_size,
            });
        }

        // 2. Structure: header.payload.signature, all non-empty
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(TokenValidationError::malformed(format!(
                "Token must have 3 parts, found {}",
                parts.len()
            )));
        }
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(TokenValidationError::malformed("Token parts cannot be empty"));
        }

        // 3. Algorithm allow-list, checked on the raw header before any
        //    cryptographic work
        let header = decode_header_part(parts[0])?;
        let alg_name = header
            .alg
            .ok_or_else(|| TokenValidationError::malformed("Token header missing \"alg\""))?;
        let algorithm = match SigningAlgorithm::parse(&alg_name) {
            Some(alg) if ALLOWED_ALGORITHMS.contains(&alg) => alg,
            _ => {
                return Err(TokenValidationError::BadAlgorithm {
                    algorithm: alg_name,
                });
            }
        };

        // 4. Resolve the verification key by the header kid; tenant keys are
        //    routed by the (unverified) tenant claim, which is only trusted
        //    after the signature check succeeds
        let kid = header
            .kid
            .ok_or_else(|| TokenValidationError::bad_signature("Token header missing \"kid\""))?;
        let tenant_hint = decode_tenant_hint(parts[1]);
        let key = self
            .key_provider
            .public_key(&kid, tenant_hint.as_deref())
            .ok_or_else(|| {
                TokenValidationError::bad_signature(format!("Unknown key ID: {kid}"))
            })?;

        // 5. Signature and standard claims
        let mut validation = Validation::new(algorithm.to_jwt_algorithm());
        validation.leeway = self.clock_tolerance_secs;
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = true;
        validation.validate_aud = false;

        jsonwebtoken::decode::<T>(token, key.decoding_key(), &validation)
            .map(|data| data.claims)
            .map_err(map_jwt_error)
    }
}

fn decode_header_part(part: &str) -> Result<RawHeader, TokenValidationError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|_| TokenValidationError::malformed("Failed to decode token header"))?;
    serde_json::from_slice(&bytes)
        .map_err(|_| TokenValidationError::malformed("Token header is not valid JSON"))
}

/// Extracts the `tenant_id` claim without verification, for key routing
/// only. Returns `None` for any shape mismatch.
fn decode_tenant_hint(part: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(part).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value
        .get("tenant_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::revocation::{MemoryEventPublisher, RevocationStore};
    use crate::storage::InMemoryKvStore;
    use crate::token::issuer::{IssueRequest, TokenIssuer};
    use crate::token::keys::SigningKey;
    use std::time::Duration;

    fn setup() -> (Arc<KeyProvider>, TokenIssuer, AuthConfig) {
        let config = AuthConfig::default();
        let provider = Arc::new(KeyProvider::with_platform_key(
            SigningKey::generate_rsa().unwrap(),
            false,
        ));
        let issuer = TokenIssuer::new(Arc::clone(&provider), &config);
        (provider, issuer, config)
    }

    fn request() -> IssueRequest {
        IssueRequest {
            user_id: "user-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            session_id: "session-1".to_string(),
            device_id: None,
            scopes: Vec::new(),
        }
    }

    fn revocation_service() -> Arc<RevocationService> {
        let kv = Arc::new(InMemoryKvStore::new());
        let store = RevocationStore::new(kv, Duration::from_secs(30 * 24 * 3600));
        Arc::new(RevocationService::new(
            store,
            Arc::new(MemoryEventPublisher::new()),
        ))
    }

    #[tokio::test]
    async fn test_verify_roundtrip() {
        let (provider, issuer, config) = setup();
        let validator = TokenValidator::new(provider, &config);

        let pair = issuer.issue_pair(&request()).unwrap();
        let claims = validator
            .validate(&pair.tokens.access_token, ValidateOptions::default())
            .await
            .unwrap();

        assert_eq!(claims.user_id, "user-1");
        assert_eq!(claims.session_id, "session-1");
        assert_eq!(claims.jti, pair.access.jti);
    }

    #[tokio::test]
    async fn test_es256_roundtrip() {
        let config = AuthConfig::default();
        let provider = Arc::new(KeyProvider::with_platform_key(
            SigningKey::generate_ec().unwrap(),
            false,
        ));
        let issuer = TokenIssuer::new(Arc::clone(&provider), &config);
        let validator = TokenValidator::new(provider, &config);

        let pair = issuer.issue_pair(&request()).unwrap();
        let claims = validator
            .validate(&pair.tokens.access_token, ValidateOptions::default())
            .await
            .unwrap();
        assert_eq!(claims.user_id, "user-1");
    }

    #[tokio::test]
    async fn test_oversized_token_rejected() {
        let (provider, _, mut config) = setup();
        config.jwt.max_token_size = 16;
        let validator = TokenValidator::new(provider, &config);

        let err = validator
            .validate("a.very.long-token-over-sixteen-bytes", ValidateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::TooLarge { .. }));
        assert_eq!(err.kind(), "too_large");
    }

    #[tokio::test]
    async fn test_malformed_token_rejected() {
        let (provider, _, config) = setup();
        let validator = TokenValidator::new(provider, &config);

        for token in ["nodots", "one.two", "a..c", "..."] {
            let err = validator
                .validate(token, ValidateOptions::default())
                .await
                .unwrap_err();
            assert!(
                matches!(err, TokenValidationError::Malformed { .. }),
                "token {token:?} should be malformed, got {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_none_algorithm_rejected() {
        let (provider, _, config) = setup();
        let validator = TokenValidator::new(provider, &config);

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","kid":"k"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"u"}"#);
        let token = format!("{header}.{payload}.sig");

        let err = validator
            .validate(&token, ValidateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::BadAlgorithm { .. }));
    }

    #[tokio::test]
    async fn test_disallowed_algorithm_rejected() {
        let (provider, _, config) = setup();
        let validator = TokenValidator::new(provider, &config);

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","kid":"k"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"u"}"#);
        let token = format!("{header}.{payload}.sig");

        let err = validator
            .validate(&token, ValidateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TokenValidationError::BadAlgorithm { algorithm } if algorithm == "HS256"
        ));
    }

    #[tokio::test]
    async fn test_unknown_kid_rejected() {
        let (_, issuer, config) = setup();
        // A different provider that does not know the signing key.
        let other_provider = Arc::new(KeyProvider::with_platform_key(
            SigningKey::generate_rsa().unwrap(),
            false,
        ));
        let validator = TokenValidator::new(other_provider, &config);

        let pair = issuer.issue_pair(&request()).unwrap();
        let err = validator
            .validate(&pair.tokens.access_token, ValidateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::BadSignature { .. }));
    }

    #[tokio::test]
    async fn test_tampered_signature_rejected() {
        let (provider, issuer, config) = setup();
        let validator = TokenValidator::new(Arc::clone(&provider), &config);

        let pair = issuer.issue_pair(&request()).unwrap();
        // Re-sign the same claims with a different key under the same kid.
        let mut forged_key = SigningKey::generate_rsa().unwrap();
        forged_key.kid = pair.access.key_id.clone();
        let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        header.kid = Some(forged_key.kid.clone());
        let forged =
            jsonwebtoken::encode(&header, &pair.access, forged_key.encoding_key()).unwrap();

        let err = validator
            .validate(&forged, ValidateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::BadSignature { .. }));
    }

    #[tokio::test]
    async fn test_wrong_issuer_rejected() {
        let (provider, _, config) = setup();
        let validator = TokenValidator::new(Arc::clone(&provider), &config);

        let mut other_config = AuthConfig::default();
        other_config.issuer = "evil.example.com".to_string();
        let other_issuer = TokenIssuer::new(provider, &other_config);

        let pair = other_issuer.issue_pair(&request()).unwrap();
        let err = validator
            .validate(&pair.tokens.access_token, ValidateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::BadClaim { .. }));
    }

    #[tokio::test]
    async fn test_expired_beyond_tolerance_rejected() {
        let (provider, _, mut config) = setup();
        config.jwt.clock_tolerance = Duration::from_secs(5);
        let validator = TokenValidator::new(Arc::clone(&provider), &config);

        let key = provider.signing_key(None).unwrap();
        let claims = AccessTokenClaims::builder("caas.io", "u", "t", "s")
            .expires_in_seconds(-60)
            .key_id(&key.kid)
            .build();
        let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        header.kid = Some(key.kid.clone());
        let token = jsonwebtoken::encode(&header, &claims, key.encoding_key()).unwrap();

        let err = validator
            .validate(&token, ValidateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::Expired));
    }

    #[tokio::test]
    async fn test_expired_within_tolerance_accepted() {
        let (provider, _, mut config) = setup();
        config.jwt.clock_tolerance = Duration::from_secs(120);
        let validator = TokenValidator::new(Arc::clone(&provider), &config);

        let key = provider.signing_key(None).unwrap();
        let claims = AccessTokenClaims::builder("caas.io", "u", "t", "s")
            .expires_in_seconds(-60)
            .key_id(&key.kid)
            .build();
        let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        header.kid = Some(key.kid.clone());
        let token = jsonwebtoken::encode(&header, &claims, key.encoding_key()).unwrap();

        assert!(validator
            .validate(&token, ValidateOptions::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_revoked_token_rejected() {
        let (provider, issuer, config) = setup();
        let revocation = revocation_service();
        let validator =
            TokenValidator::new(provider, &config).with_revocation(Arc::clone(&revocation));

        let pair = issuer.issue_pair(&request()).unwrap();

        // Valid before revocation
        assert!(validator
            .validate(&pair.tokens.access_token, ValidateOptions::default())
            .await
            .is_ok());

        revocation
            .revoke_token(
                &pair.access.jti,
                &pair.access.user_id,
                Duration::from_secs(900),
                "logout",
                serde_json::json!({}),
            )
            .await
            .unwrap();

        let err = validator
            .validate(&pair.tokens.access_token, ValidateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TokenValidationError::Revoked { ref reason } if reason == "token_revoked"
        ));
    }

    #[tokio::test]
    async fn test_revocation_check_can_be_skipped() {
        let (provider, issuer, config) = setup();
        let revocation = revocation_service();
        let validator =
            TokenValidator::new(provider, &config).with_revocation(Arc::clone(&revocation));

        let pair = issuer.issue_pair(&request()).unwrap();
        revocation
            .revoke_token(
                &pair.access.jti,
                &pair.access.user_id,
                Duration::from_secs(900),
                "logout",
                serde_json::json!({}),
            )
            .await
            .unwrap();

        let options = ValidateOptions {
            check_revocation: false,
        };
        assert!(validator
            .validate(&pair.tokens.access_token, options)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_validate_refresh() {
        let (provider, issuer, config) = setup();
        let validator = TokenValidator::new(provider, &config);

        let pair = issuer.issue_pair(&request()).unwrap();
        let claims = validator
            .validate_refresh(&pair.tokens.refresh_token)
            .unwrap();
        assert_eq!(claims.token_type, "refresh");
        assert_eq!(claims.jti, pair.refresh.jti);

        // An access token is not a refresh token: it is rejected either at
        // deserialization (missing token_type) or at the claim check.
        let err = validator
            .validate_refresh(&pair.tokens.access_token)
            .unwrap_err();
        assert!(matches!(
            err,
            TokenValidationError::Malformed { .. } | TokenValidationError::BadClaim { .. }
        ));
    }
}
