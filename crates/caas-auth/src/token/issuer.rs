//! Token issuance.
//!
//! Signs access/refresh token pairs and service tokens with the key
//! selected by the [`KeyProvider`], embedding the key ID in both the header
//! and the `key_id` claim.

use std::sync::Arc;

use jsonwebtoken::Header;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::token::claims::{
    AccessTokenClaims, IssuedPair, RefreshTokenClaims, ServiceTokenClaims, TokenPair,
};
use crate::token::keys::{KeyError, KeyProvider, SigningKey};
use crate::AuthResult;

/// Parameters for issuing a token pair.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    /// User the tokens are issued to.
    pub user_id: String,

    /// Tenant the tokens are scoped to.
    pub tenant_id: String,

    /// Session the tokens are bound to.
    pub session_id: String,

    /// Device the session was created from.
    pub device_id: Option<String>,

    /// Granted scopes.
    pub scopes: Vec<String>,
}

/// Signs tokens with the active key from the [`KeyProvider`].
pub struct TokenIssuer {
    key_provider: Arc<KeyProvider>,
    issuer: String,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
    service_ttl_secs: i64,
}

impl TokenIssuer {
    /// Creates a new token issuer.
    #[must_use]
    pub fn new(key_provider: Arc<KeyProvider>, config: &AuthConfig) -> Self {
        Self {
            key_provider,
            issuer: config.issuer.clone(),
            access_ttl_secs: config.jwt.access_token_ttl.as_secs() as i64,
            refresh_ttl_secs: config.jwt.refresh_token_ttl.as_secs() as i64,
            service_ttl_secs: config.jwt.service_token_ttl.as_secs() as i64,
        }
    }

    /// Returns the configured issuer string.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Issues an access/refresh token pair.
    ///
    /// # Errors
    ///
    /// Returns an error if no signing key is available or signing fails.
    pub fn issue_pair(&self, request: &IssueRequest) -> AuthResult<IssuedPair> {
        let key = self.signing_key(&request.tenant_id)?;
        let (access_token, access) = self.sign_access(request, &key)?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let refresh = RefreshTokenClaims {
            iss: self.issuer.clone(),
            sub: request.user_id.clone(),
            jti: Uuid::new_v4().to_string(),
            exp: now + self.refresh_ttl_secs,
            iat: now,
            token_type: "refresh".to_string(),
        };
        let refresh_token = self.sign(&refresh, &key)?;

        Ok(IssuedPair {
            tokens: TokenPair {
                access_token,
                refresh_token,
                token_type: "Bearer".to_string(),
                expires_in: self.access_ttl_secs as u64,
                refresh_expires_in: self.refresh_ttl_secs as u64,
            },
            access,
            refresh,
        })
    }

    /// Issues an access token only (used when rotation is disabled).
    ///
    /// # Errors
    ///
    /// Returns an error if no signing key is available or signing fails.
    pub fn issue_access(&self, request: &IssueRequest) -> AuthResult<(String, AccessTokenClaims)> {
        let key = self.signing_key(&request.tenant_id)?;
        self.sign_access(request, &key)
    }

    /// Issues a service-to-service token.
    ///
    /// # Errors
    ///
    /// Returns an error if no signing key is available or signing fails.
    pub fn issue_service_token(&self, service: &str) -> AuthResult<String> {
        let key = self
            .key_provider
            .signing_key(None)
            .map_err(map_key_error)?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = ServiceTokenClaims {
            iss: self.issuer.clone(),
            sub: service.to_string(),
            jti: Uuid::new_v4().to_string(),
            exp: now + self.service_ttl_secs,
            iat: now,
            service: service.to_string(),
            token_type: "service".to_string(),
        };
        self.sign(&claims, &key)
    }

    fn sign_access(
        &self,
        request: &IssueRequest,
        key: &SigningKey,
    ) -> AuthResult<(String, AccessTokenClaims)> {
        let mut builder = AccessTokenClaims::builder(
            &self.issuer,
            &request.user_id,
            &request.tenant_id,
            &request.session_id,
        )
        .expires_in_seconds(self.access_ttl_secs)
        .key_id(&key.kid)
        .scopes(request.scopes.clone());

        if let Some(ref device_id) = request.device_id {
            builder = builder.device_id(device_id);
        }

        let claims = builder.build();
        let token = self.sign(&claims, key)?;
        Ok((token, claims))
    }

    fn signing_key(&self, tenant_id: &str) -> AuthResult<SigningKey> {
        self.key_provider
            .signing_key(Some(tenant_id))
            .map_err(map_key_error)
    }

    fn sign<T: serde::Serialize>(&self, claims: &T, key: &SigningKey) -> AuthResult<String> {
        let mut header = Header::new(key.algorithm.to_jwt_algorithm());
        header.kid = Some(key.kid.clone());

        jsonwebtoken::encode(&header, claims, key.encoding_key())
            .map_err(|e| AuthError::internal(format!("Failed to encode token: {e}")))
    }
}

fn map_key_error(err: KeyError) -> AuthError {
    match err {
        KeyError::NoSigningKey => AuthError::configuration("No signing key available"),
        other => AuthError::internal(other.to_string()),
    }
}
