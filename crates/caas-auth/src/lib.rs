//! # caas-auth
//!
//! Token and session security core for the CaaS chat platform.
//!
//! This crate provides:
//! - Signed access token issuance and validation with key rotation
//! - Four-fact revocation (token, user, session, tenant) with cache
//!   invalidation events
//! - Refresh token rotation with family tracking and reuse detection
//! - Session tracking with sliding expiration, renewal, and cleanup
//! - Anomaly and hijack detection over sessions
//! - An attempt-limited MFA challenge engine (TOTP, backup codes)
//!
//! ## Overview
//!
//! The core is designed for many stateless service instances sharing a
//! TTL-capable key-value store and an event log. There is no in-process
//! locking model: correctness rides on the storage port's atomic
//! primitives (set-with-TTL, set-if-absent), and every component is
//! explicitly constructed and dependency-injected so tests run against
//! isolated in-memory instances.
//!
//! Storage backends live behind [`storage::KeyValueStore`]; the production
//! Redis backend is provided by the `caas-auth-redis` crate.
//!
//! ## Modules
//!
//! - [`config`] - configuration with fatal startup validation
//! - [`token`] - key provider, token issuer, validation pipeline
//! - [`revocation`] - revocation facts, events, and the combined service
//! - [`refresh`] - refresh token rotation and reuse detection
//! - [`session`] - session store, renewal, cleanup, security detectors
//! - [`mfa`] - MFA challenge engine and method verifiers
//! - [`storage`] - the key-value port and the in-memory backend
//! - [`metrics`] - dependency-injected metrics

pub mod config;
pub mod error;
pub mod metrics;
pub mod mfa;
pub mod refresh;
pub mod revocation;
pub mod session;
pub mod storage;
pub mod token;

pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, ErrorCategory};
pub use metrics::SessionMetrics;
pub use mfa::{
    BackupCodeVerifier, MethodVerifier, MfaChallenge, MfaChallengeService, MfaMethod,
    MfaVerification, MultiMethodVerifier, TotpVerifier,
};
pub use refresh::{
    FamilyTracker, RefreshService, RefreshTokenRecord, RefreshTokenStore, ReuseAction,
    ReuseDetector, ReuseVerdict, RotationPolicy, TokenFamily,
};
pub use revocation::{
    MemoryEventPublisher, RevocationEvent, RevocationEventPublisher, RevocationEventType,
    RevocationReason, RevocationResult, RevocationService, RevocationStore,
};
pub use session::{
    DeviceInfo, GeoLocation, NewSession, RenewalOutcome, RenewalSkipReason, Session,
    SessionCleanup, SessionRenewal, SessionSnapshot, SessionStore,
};
pub use session::security::{
    AnomalyConfig, AnomalyDetector, HijackDetector, SecurityEvent, SecurityEventType,
    SessionAction, Severity,
};
pub use storage::{InMemoryKvStore, KeyTtl, KeyValueStore};
pub use token::{
    AccessTokenClaims, IssueRequest, IssuedPair, Jwk, Jwks, KeyError, KeyProvider,
    KeyRotationStatus, RefreshTokenClaims, SigningAlgorithm, SigningKey, TokenIssuer, TokenPair,
    TokenValidationError, TokenValidator, ValidateOptions,
};

/// Type alias for authentication results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use caas_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::config::{AuthConfig, ConfigError};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::metrics::SessionMetrics;
    pub use crate::mfa::{
        MethodVerifier, MfaChallenge, MfaChallengeService, MfaMethod, MultiMethodVerifier,
    };
    pub use crate::refresh::{
        FamilyTracker, RefreshService, RefreshTokenStore, ReuseDetector, RotationPolicy,
    };
    pub use crate::revocation::{
        RevocationEventPublisher, RevocationReason, RevocationService, RevocationStore,
    };
    pub use crate::session::security::{AnomalyDetector, HijackDetector, SessionAction};
    pub use crate::session::{NewSession, Session, SessionCleanup, SessionRenewal, SessionStore};
    pub use crate::storage::{InMemoryKvStore, KeyValueStore};
    pub use crate::token::{
        IssueRequest, KeyProvider, SigningKey, TokenIssuer, TokenValidator, ValidateOptions,
    };
}
