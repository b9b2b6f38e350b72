//! Error types for the authentication core.
//!
//! The error set is a closed enum: callers dispatch on the variant (or on
//! [`ErrorCategory`]) rather than on type identity, so a `match` over the
//! kinds is exhaustively checkable by the compiler.
//!
//! The taxonomy follows the security model of the service:
//!
//! - *Validation* errors are rejected locally and never retried
//! - *Expiry* is routine and must stay distinguishable from revocation, so
//!   callers can render "session timed out" instead of "signed out elsewhere"
//! - *Revocation* and *Security* errors carry the reason that produced them
//! - *Storage* errors propagate for writes; the validation hot path fails
//!   closed instead (see [`crate::token::TokenValidator`])

use std::fmt;

/// Errors that can occur in the authentication core.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The request is malformed or missing required parameters.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The token is invalid, malformed, or failed verification.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the token is invalid.
        message: String,
    },

    /// The token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// The token has been revoked.
    #[error("Token revoked: {reason}")]
    TokenRevoked {
        /// The revocation fact that matched (e.g. `user_tokens_revoked`).
        reason: String,
    },

    /// The presented refresh token has no record in the store.
    #[error("Refresh token not found")]
    TokenNotFound,

    /// Refresh token reuse was detected and the token family revoked.
    #[error("Token reuse detected: {message}")]
    ReuseDetected {
        /// What triggered the reuse classification.
        message: String,
    },

    /// The session is missing or expired.
    #[error("Session expired or not found")]
    SessionExpired,

    /// The MFA challenge is missing, expired, or exhausted.
    #[error("MFA challenge failed: {message}")]
    ChallengeFailed {
        /// Terminal failure reason.
        message: String,
    },

    /// An error occurred while storing or retrieving auth data.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The auth configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `TokenRevoked` error.
    #[must_use]
    pub fn token_revoked(reason: impl Into<String>) -> Self {
        Self::TokenRevoked {
            reason: reason.into(),
        }
    }

    /// Creates a new `ReuseDetected` error.
    #[must_use]
    pub fn reuse_detected(message: impl Into<String>) -> Self {
        Self::ReuseDetected {
            message: message.into(),
        }
    }

    /// Creates a new `ChallengeFailed` error.
    #[must_use]
    pub fn challenge_failed(message: impl Into<String>) -> Self {
        Self::ChallengeFailed {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. }
                | Self::InvalidToken { .. }
                | Self::TokenExpired
                | Self::TokenRevoked { .. }
                | Self::TokenNotFound
                | Self::ReuseDetected { .. }
                | Self::SessionExpired
                | Self::ChallengeFailed { .. }
        )
    }

    /// Returns `true` if this error represents routine expiry rather than a
    /// security condition.
    #[must_use]
    pub fn is_expiry(&self) -> bool {
        matches!(self, Self::TokenExpired | Self::SessionExpired)
    }

    /// Returns `true` if this error must be escalated as a security event.
    #[must_use]
    pub fn is_security_event(&self) -> bool {
        matches!(self, Self::ReuseDetected { .. })
    }

    /// Returns the error category for logging and monitoring.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest { .. } | Self::InvalidToken { .. } => ErrorCategory::Validation,
            Self::TokenExpired | Self::SessionExpired => ErrorCategory::Expiry,
            Self::TokenRevoked { .. } => ErrorCategory::Revocation,
            Self::TokenNotFound => ErrorCategory::Validation,
            Self::ReuseDetected { .. } => ErrorCategory::Security,
            Self::ChallengeFailed { .. } => ErrorCategory::Validation,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of authentication errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Request/token validation errors. Rejected locally, never retried.
    Validation,
    /// Routine expiry (token, session, challenge). Not a security event.
    Expiry,
    /// Explicit revocation. Distinct from expiry for user messaging.
    Revocation,
    /// Detected attacks (reuse, hijack). Always escalated.
    Security,
    /// Storage/transport failures.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Expiry => write!(f, "expiry"),
            Self::Revocation => write!(f, "revocation"),
            Self::Security => write!(f, "security"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
