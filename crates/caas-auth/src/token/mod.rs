//! Token issuance and validation.
//!
//! - [`keys`] - signing key material and the tenant-aware key provider
//! - [`claims`] - access/refresh/service token claims and the issued pair
//! - [`issuer`] - signs token pairs with the active key
//! - [`validator`] - the ordered validation pipeline with distinct failures

pub mod claims;
pub mod issuer;
pub mod keys;
pub mod validator;

pub use claims::{
    AccessTokenClaims, AccessTokenClaimsBuilder, IssuedPair, RefreshTokenClaims,
    ServiceTokenClaims, TokenPair,
};
pub use issuer::{IssueRequest, TokenIssuer};
pub use keys::{Jwk, Jwks, KeyError, KeyProvider, KeyRotationStatus, SigningAlgorithm, SigningKey};
pub use validator::{TokenValidator, TokenValidationError, ValidateOptions};
