//! Refresh token rotation with reuse detection.
//!
//! Each login opens a token *family*; every rotation appends the new token
//! to the family lineage. Presenting an already-rotated (or revoked) token
//! again is treated as theft: the entire family is revoked, along with all
//! of the user's refresh tokens.

pub mod family;
pub mod reuse;
pub mod service;
pub mod store;

pub use family::{FamilyStats, FamilyTracker, TokenFamily};
pub use reuse::{ReuseAction, ReuseDetector, ReuseVerdict, SuspiciousActivity};
pub use service::{RefreshService, RotationPolicy};
pub use store::{RefreshTokenRecord, RefreshTokenStore};
