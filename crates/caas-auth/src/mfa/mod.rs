//! MFA challenge engine.
//!
//! - [`challenge`] - the short-lived, attempt-limited challenge state
//!   machine
//! - [`verifier`] - method verifiers (TOTP, backup codes) behind a port

pub mod challenge;
pub mod verifier;

pub use challenge::{MfaChallenge, MfaChallengeService, MfaMethod, MfaVerification};
pub use verifier::{BackupCodeVerifier, MethodVerifier, MultiMethodVerifier, TotpVerifier};
