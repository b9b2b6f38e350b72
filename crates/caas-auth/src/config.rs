//! Authentication core configuration.
//!
//! All settings deserialize from the server configuration file and can be
//! overridden individually from the environment (`CAAS_AUTH_*` variables).
//! Validation failures are fatal: a service must not serve traffic with an
//! inconsistent token or rotation configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth]
//! issuer = "caas.io"
//!
//! [auth.jwt]
//! algorithm = "RS256"
//! access_token_ttl = "15m"
//! refresh_token_ttl = "7d"
//!
//! [auth.session]
//! ttl = "24h"
//! renewal_cooldown = "60s"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the authentication core.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Issuer string embedded in every token (`iss` claim).
    pub issuer: String,

    /// Token signing and validation settings.
    pub jwt: JwtConfig,

    /// Refresh token rotation policy.
    pub rotation: RotationConfig,

    /// Session lifetime and renewal settings.
    pub session: SessionConfig,

    /// MFA challenge settings.
    pub mfa: MfaConfig,

    /// Revocation store and event settings.
    pub revocation: RevocationConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "caas.io".to_string(),
            jwt: JwtConfig::default(),
            rotation: RotationConfig::default(),
            session: SessionConfig::default(),
            mfa: MfaConfig::default(),
            revocation: RevocationConfig::default(),
        }
    }
}

/// Token signing and validation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Signing algorithm. Must be `RS256` or `ES256`.
    pub algorithm: String,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,

    /// Refresh token lifetime. Must exceed the access token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_ttl: Duration,

    /// Service-to-service token lifetime.
    #[serde(with = "humantime_serde")]
    pub service_token_ttl: Duration,

    /// Allowed clock skew when validating `exp`/`iat`.
    #[serde(with = "humantime_serde")]
    pub clock_tolerance: Duration,

    /// Maximum accepted token size in bytes.
    pub max_token_size: usize,

    /// Whether per-tenant signing keys are consulted before the platform key.
    pub enable_tenant_keys: bool,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            algorithm: "RS256".to_string(),
            access_token_ttl: Duration::from_secs(900),
            refresh_token_ttl: Duration::from_secs(604_800),
            service_token_ttl: Duration::from_secs(3600),
            clock_tolerance: Duration::from_secs(30),
            max_token_size: 8192,
            enable_tenant_keys: false,
        }
    }
}

/// Refresh token rotation policy.
///
/// `revoke_family` requires `reuse_detection`: revoking a family is only
/// meaningful when reuse is being detected in the first place. The
/// combination is rejected by [`AuthConfig::validate`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Rotate refresh tokens on every use.
    pub enabled: bool,

    /// Detect reuse of already-rotated tokens.
    pub reuse_detection: bool,

    /// Revoke the entire token family when reuse is detected.
    pub revoke_family: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reuse_detection: true,
            revoke_family: true,
        }
    }
}

/// Session lifetime and renewal settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Default session TTL (sliding window extension size).
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Maximum concurrent sessions per user. The oldest session is evicted
    /// when the limit is reached.
    pub max_sessions_per_user: usize,

    /// Minimum interval between two renewals of the same session.
    #[serde(with = "humantime_serde")]
    pub renewal_cooldown: Duration,

    /// Renewal fires only when the session is within this window of expiry.
    #[serde(with = "humantime_serde")]
    pub renewal_threshold: Duration,

    /// Hard cap on total session age; renewal never extends past this.
    #[serde(with = "humantime_serde")]
    pub max_lifetime: Duration,

    /// Interval of the background expired-session sweep.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            max_sessions_per_user: 10,
            renewal_cooldown: Duration::from_secs(60),
            renewal_threshold: Duration::from_secs(3600),
            max_lifetime: Duration::from_secs(7 * 24 * 3600),
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

/// MFA challenge settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MfaConfig {
    /// Challenge lifetime.
    #[serde(with = "humantime_serde")]
    pub challenge_ttl: Duration,

    /// Maximum verification attempts per method before the challenge is
    /// destroyed.
    pub max_attempts: u32,

    /// Maximum method switches per challenge. Switching resets the attempt
    /// counter, so the switch count itself must be bounded.
    pub max_method_switches: u32,
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self {
            challenge_ttl: Duration::from_secs(300),
            max_attempts: 5,
            max_method_switches: 3,
        }
    }
}

/// Revocation store and event settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RevocationConfig {
    /// Retention window for user/tenant `invalid-before` facts. Must be at
    /// least as long as the longest-lived token, or an old token could
    /// outlive the fact and wrongly appear valid.
    #[serde(with = "humantime_serde")]
    pub invalid_before_retention: Duration,

    /// Channel prefix for published revocation events.
    pub channel_prefix: String,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            invalid_before_retention: Duration::from_secs(30 * 24 * 3600),
            channel_prefix: "auth.revocation".to_string(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// Callers must treat a validation failure as fatal and refuse to serve
    /// traffic.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The issuer is empty
    /// - The signing algorithm is not RS256 or ES256
    /// - Any token or session TTL is zero
    /// - The refresh token TTL does not exceed the access token TTL
    /// - `revoke_family` is enabled without `reuse_detection`
    /// - MFA `max_attempts` is zero
    /// - The renewal cooldown is not shorter than the session TTL
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::Missing("issuer".to_string()));
        }

        match self.jwt.algorithm.as_str() {
            "RS256" | "ES256" => {}
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid signing algorithm: '{other}'. Must be RS256 or ES256"
                )));
            }
        }

        for (name, ttl) in [
            ("jwt.access_token_ttl", self.jwt.access_token_ttl),
            ("jwt.refresh_token_ttl", self.jwt.refresh_token_ttl),
            ("jwt.service_token_ttl", self.jwt.service_token_ttl),
            ("session.ttl", self.session.ttl),
            ("session.max_lifetime", self.session.max_lifetime),
            ("session.cleanup_interval", self.session.cleanup_interval),
            ("mfa.challenge_ttl", self.mfa.challenge_ttl),
            (
                "revocation.invalid_before_retention",
                self.revocation.invalid_before_retention,
            ),
        ] {
            if ttl.is_zero() {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }

        if self.jwt.refresh_token_ttl <= self.jwt.access_token_ttl {
            return Err(ConfigError::InvalidValue(
                "jwt.refresh_token_ttl must exceed jwt.access_token_ttl".to_string(),
            ));
        }

        if self.rotation.revoke_family && !self.rotation.reuse_detection {
            return Err(ConfigError::InvalidValue(
                "rotation.revoke_family requires rotation.reuse_detection".to_string(),
            ));
        }

        if self.mfa.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "mfa.max_attempts must be > 0".to_string(),
            ));
        }

        if self.session.renewal_cooldown >= self.session.ttl {
            return Err(ConfigError::InvalidValue(
                "session.renewal_cooldown must be shorter than session.ttl".to_string(),
            ));
        }

        if self.jwt.max_token_size == 0 {
            return Err(ConfigError::InvalidValue(
                "jwt.max_token_size must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Overlays environment variables on top of this configuration.
    ///
    /// Recognized variables: `CAAS_AUTH_ISSUER`, `CAAS_AUTH_JWT_ALGORITHM`,
    /// `CAAS_AUTH_ACCESS_TOKEN_TTL_SECS`, `CAAS_AUTH_REFRESH_TOKEN_TTL_SECS`,
    /// `CAAS_AUTH_SESSION_TTL_SECS`, `CAAS_AUTH_MFA_MAX_ATTEMPTS`.
    /// Unparseable values are rejected.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set but cannot
    /// be parsed.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(issuer) = std::env::var("CAAS_AUTH_ISSUER") {
            self.issuer = issuer;
        }
        if let Ok(alg) = std::env::var("CAAS_AUTH_JWT_ALGORITHM") {
            self.jwt.algorithm = alg;
        }
        if let Some(secs) = parse_env_u64("CAAS_AUTH_ACCESS_TOKEN_TTL_SECS")? {
            self.jwt.access_token_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env_u64("CAAS_AUTH_REFRESH_TOKEN_TTL_SECS")? {
            self.jwt.refresh_token_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env_u64("CAAS_AUTH_SESSION_TTL_SECS")? {
            self.session.ttl = Duration::from_secs(secs);
        }
        if let Some(n) = parse_env_u64("CAAS_AUTH_MFA_MAX_ATTEMPTS")? {
            self.mfa.max_attempts = n as u32;
        }
        Ok(self)
    }
}

fn parse_env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(format!("{name} must be an integer: '{raw}'"))),
        Err(_) => Ok(None),
    }
}
