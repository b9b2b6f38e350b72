//! Token claims and issued pair types.
//!
//! Access tokens carry the full platform context (tenant, session, device,
//! scopes); refresh tokens carry only identity and lineage; service tokens
//! identify a calling service. All claim sets are immutable once signed:
//! validity is a pure function of the signature, the claims, and the
//! revocation store at verification time.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Access token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessTokenClaims {
    /// Issuer.
    pub iss: String,

    /// Subject (user ID).
    pub sub: String,

    /// Audience (tenant ID).
    pub aud: String,

    /// Expiration time (Unix timestamp, seconds).
    pub exp: i64,

    /// Issued at (Unix timestamp, seconds).
    pub iat: i64,

    /// JWT ID (unique identifier for revocation).
    pub jti: String,

    /// ID of the key the token was signed with (mirrors the header `kid`).
    pub key_id: String,

    /// Tenant the token is scoped to.
    pub tenant_id: String,

    /// User the token was issued to.
    pub user_id: String,

    /// Session the token is bound to.
    pub session_id: String,

    /// Device the session was created from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Granted scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl AccessTokenClaims {
    /// Creates a new builder for access token claims.
    #[must_use]
    pub fn builder(
        issuer: impl Into<String>,
        user_id: impl Into<String>,
        tenant_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> AccessTokenClaimsBuilder {
        AccessTokenClaimsBuilder::new(issuer, user_id, tenant_id, session_id)
    }

    /// Returns `true` if the token is expired at `now` (no tolerance).
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now.unix_timestamp() >= self.exp
    }
}

/// Builder for [`AccessTokenClaims`].
#[derive(Debug)]
pub struct AccessTokenClaimsBuilder {
    iss: String,
    sub: String,
    aud: String,
    exp: i64,
    iat: i64,
    jti: String,
    key_id: String,
    tenant_id: String,
    user_id: String,
    session_id: String,
    device_id: Option<String>,
    scopes: Vec<String>,
}

impl AccessTokenClaimsBuilder {
    fn new(
        issuer: impl Into<String>,
        user_id: impl Into<String>,
        tenant_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let user_id = user_id.into();
        let tenant_id = tenant_id.into();
        Self {
            iss: issuer.into(),
            sub: user_id.clone(),
            aud: tenant_id.clone(),
            exp: now + 900,
            iat: now,
            jti: Uuid::new_v4().to_string(),
            key_id: String::new(),
            tenant_id,
            user_id,
            session_id: session_id.into(),
            device_id: None,
            scopes: Vec::new(),
        }
    }

    /// Sets the expiration time in seconds from `iat`.
    #[must_use]
    pub fn expires_in_seconds(mut self, seconds: i64) -> Self {
        self.exp = self.iat + seconds;
        self
    }

    /// Sets the signing key ID.
    #[must_use]
    pub fn key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = key_id.into();
        self
    }

    /// Sets the device ID.
    #[must_use]
    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Sets the granted scopes.
    #[must_use]
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Builds the access token claims.
    #[must_use]
    pub fn build(self) -> AccessTokenClaims {
        AccessTokenClaims {
            iss: self.iss,
            sub: self.sub,
            aud: self.aud,
            exp: self.exp,
            iat: self.iat,
            jti: self.jti,
            key_id: self.key_id,
            tenant_id: self.tenant_id,
            user_id: self.user_id,
            session_id: self.session_id,
            device_id: self.device_id,
            scopes: self.scopes,
        }
    }
}

/// Refresh token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshTokenClaims {
    /// Issuer.
    pub iss: String,

    /// Subject (user ID).
    pub sub: String,

    /// JWT ID; this is the token ID tracked in its family.
    pub jti: String,

    /// Expiration time (Unix timestamp, seconds).
    pub exp: i64,

    /// Issued at (Unix timestamp, seconds).
    pub iat: i64,

    /// Always `"refresh"`.
    pub token_type: String,
}

/// Service-to-service token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceTokenClaims {
    /// Issuer.
    pub iss: String,

    /// Subject (service name).
    pub sub: String,

    /// JWT ID.
    pub jti: String,

    /// Expiration time (Unix timestamp, seconds).
    pub exp: i64,

    /// Issued at (Unix timestamp, seconds).
    pub iat: i64,

    /// Calling service name.
    pub service: String,

    /// Always `"service"`.
    pub token_type: String,
}

/// The wire-format token pair returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// Signed access token.
    pub access_token: String,

    /// Signed refresh token.
    pub refresh_token: String,

    /// Always `"Bearer"`.
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: u64,

    /// Refresh token lifetime in seconds.
    pub refresh_expires_in: u64,
}

/// An issued token pair along with the claims that went into it, so callers
/// can reach the token IDs without re-parsing the JWTs.
#[derive(Debug, Clone)]
pub struct IssuedPair {
    /// The wire-format pair.
    pub tokens: TokenPair,

    /// Claims of the signed access token.
    pub access: AccessTokenClaims,

    /// Claims of the signed refresh token.
    pub refresh: RefreshTokenClaims,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let claims = AccessTokenClaims::builder("caas.io", "user-1", "tenant-1", "session-1")
            .key_id("key-1")
            .build();

        assert_eq!(claims.iss, "caas.io");
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.aud, "tenant-1");
        assert_eq!(claims.user_id, "user-1");
        assert_eq!(claims.tenant_id, "tenant-1");
        assert_eq!(claims.session_id, "session-1");
        assert_eq!(claims.key_id, "key-1");
        assert!(!claims.jti.is_empty());
        assert_eq!(claims.exp - claims.iat, 900);
        assert!(claims.device_id.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let claims = AccessTokenClaims::builder("caas.io", "u", "t", "s")
            .expires_in_seconds(60)
            .device_id("device-9")
            .scopes(vec!["chat:read".to_string(), "chat:write".to_string()])
            .build();

        assert_eq!(claims.exp - claims.iat, 60);
        assert_eq!(claims.device_id.as_deref(), Some("device-9"));
        assert_eq!(claims.scopes.len(), 2);
    }

    #[test]
    fn test_serialization_skips_absent_device() {
        let claims = AccessTokenClaims::builder("caas.io", "u", "t", "s").build();
        let json = serde_json::to_string(&claims).unwrap();
        assert!(!json.contains("device_id"));
        assert!(json.contains("\"tenant_id\":\"t\""));
    }

    #[test]
    fn test_expiry_check() {
        let claims = AccessTokenClaims::builder("caas.io", "u", "t", "s")
            .expires_in_seconds(-10)
            .build();
        assert!(claims.is_expired_at(OffsetDateTime::now_utc()));
    }

    #[test]
    fn test_refresh_claims_roundtrip() {
        let claims = RefreshTokenClaims {
            iss: "caas.io".to_string(),
            sub: "user-1".to_string(),
            jti: Uuid::new_v4().to_string(),
            exp: 2_000_000_000,
            iat: 1_900_000_000,
            token_type: "refresh".to_string(),
        };
        let json = serde_json::to_string(&claims).unwrap();
        let parsed: RefreshTokenClaims = serde_json::from_str(&json).unwrap();
        assert_eq!(claims, parsed);
    }
}
