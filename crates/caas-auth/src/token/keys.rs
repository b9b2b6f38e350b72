//! Signing key material and the tenant-aware key provider.
//!
//! Keys are never deleted, only deactivated: deactivation stops new
//! issuance immediately, but verification of already-issued, unexpired
//! tokens must keep succeeding against the stored public material until the
//! last token signed with the key has expired.
//!
//! Tenant keys are optional. When enabled and present they take priority
//! over the platform key for both signing and verification lookup.
//!
//! ## Supported Algorithms
//!
//! - **RS256**: RSA with SHA-256
//! - **ES256**: ECDSA with the P-256 curve (smaller keys)

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use p256::SecretKey as EcSecretKey;
use p256::ecdsa::SigningKey as EcSigningKey;
use p256::pkcs8::{DecodePrivateKey as EcDecodePrivateKey, EncodePrivateKey as EcEncodePrivateKey};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during key management.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// No platform signing key is loaded.
    #[error("No signing key available")]
    NoSigningKey,

    /// The specified key was not found.
    #[error("Key not found: {kid}")]
    KeyNotFound {
        /// The key ID that was not found.
        kid: String,
    },

    /// Failed to generate a cryptographic key.
    #[error("Key generation error: {message}")]
    KeyGeneration {
        /// Description of the key generation error.
        message: String,
    },

    /// Invalid key format or data.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of why the key is invalid.
        message: String,
    },
}

impl KeyError {
    /// Creates a new `KeyNotFound` error.
    #[must_use]
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates a new `KeyGeneration` error.
    #[must_use]
    pub fn key_generation(message: impl Into<String>) -> Self {
        Self::KeyGeneration {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    /// RSA with SHA-256.
    RS256,
    /// ECDSA with P-256 curve.
    ES256,
}

impl SigningAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::ES256 => Algorithm::ES256,
        }
    }

    /// Returns the algorithm name as used in JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::ES256 => "ES256",
        }
    }

    /// Parses an algorithm name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "RS256" => Some(Self::RS256),
            "ES256" => Some(Self::ES256),
            _ => None,
        }
    }

    /// Returns `true` if this is an RSA-based algorithm.
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set of the provider's active public keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

/// JSON Web Key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "EC").
    pub kty: String,

    /// Key ID.
    pub kid: String,

    /// Key use ("sig" for signing).
    #[serde(rename = "use")]
    pub use_: String,

    /// Algorithm.
    pub alg: String,

    /// RSA modulus (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// Internal representation of public key data for JWK export.
#[derive(Clone)]
enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
}

// ============================================================================
// Signing Key
// ============================================================================

/// A signing key pair.
#[derive(Clone)]
pub struct SigningKey {
    /// Key ID.
    pub kid: String,

    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    /// Encoding key (private) for signing.
    encoding_key: EncodingKey,

    /// Decoding key (public) for verification.
    decoding_key: DecodingKey,

    /// PEM-encoded public key, exposed for out-of-band verification.
    public_key_pem: String,

    /// Public key components for JWK export.
    public_key_data: PublicKeyData,

    /// When the key was created.
    pub created_at: OffsetDateTime,

    /// Whether the key is eligible for new issuance.
    active: bool,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Generates a new RSA (RS256) key pair.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub fn generate_rsa() -> Result<Self, KeyError> {
        let bits = 2048;
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| KeyError::key_generation(e.to_string()))?;

        let public_key = private_key.to_public_key();
        let n = public_key.n().to_bytes_be();
        let e = public_key.e().to_bytes_be();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::key_generation(e.to_string()))?;

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| KeyError::key_generation(e.to_string()))?;

        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyError::key_generation(e.to_string()))?;

        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| KeyError::key_generation(e.to_string()))?;

        Ok(Self {
            kid: uuid::Uuid::new_v4().to_string(),
            algorithm: SigningAlgorithm::RS256,
            encoding_key,
            decoding_key,
            public_key_pem: public_pem,
            public_key_data: PublicKeyData::Rsa { n, e },
            created_at: OffsetDateTime::now_utc(),
            active: true,
        })
    }

    /// Generates a new EC (ES256, P-256) key pair.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub fn generate_ec() -> Result<Self, KeyError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        let signing_key = EcSigningKey::from(&secret_key);
        let public_key = signing_key.verifying_key();

        let point = public_key.to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| KeyError::key_generation("Missing x coordinate"))?;
        let y = point
            .y()
            .ok_or_else(|| KeyError::key_generation("Missing y coordinate"))?;

        // jsonwebtoken requires PKCS8 for EC private keys
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::key_generation(e.to_string()))?;

        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| KeyError::key_generation(e.to_string()))?;

        let x_b64 = URL_SAFE_NO_PAD.encode(x.as_slice());
        let y_b64 = URL_SAFE_NO_PAD.encode(y.as_slice());
        let decoding_key = DecodingKey::from_ec_components(&x_b64, &y_b64)
            .map_err(|e| KeyError::key_generation(e.to_string()))?;

        let public_pem = secret_key
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyError::key_generation(e.to_string()))?;

        Ok(Self {
            kid: uuid::Uuid::new_v4().to_string(),
            algorithm: SigningAlgorithm::ES256,
            encoding_key,
            decoding_key,
            public_key_pem: public_pem,
            public_key_data: PublicKeyData::Ec {
                x: x.to_vec(),
                y: y.to_vec(),
            },
            created_at: OffsetDateTime::now_utc(),
            active: true,
        })
    }

    /// Generates a key pair for the given algorithm.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub fn generate(algorithm: SigningAlgorithm) -> Result<Self, KeyError> {
        match algorithm {
            SigningAlgorithm::RS256 => Self::generate_rsa(),
            SigningAlgorithm::ES256 => Self::generate_ec(),
        }
    }

    /// Loads a key pair from PEM strings.
    ///
    /// # Errors
    /// Returns an error if the PEM data is invalid.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        private_pem: &str,
        public_pem: &str,
    ) -> Result<Self, KeyError> {
        let (encoding_key, decoding_key, public_key_data) = if algorithm.is_rsa() {
            let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
                .map_err(|e| KeyError::invalid_key(e.to_string()))?;
            let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
                .map_err(|e| KeyError::invalid_key(e.to_string()))?;

            let public_key = RsaPublicKey::from_public_key_pem(public_pem)
                .map_err(|e| KeyError::invalid_key(e.to_string()))?;
            let n = public_key.n().to_bytes_be();
            let e = public_key.e().to_bytes_be();

            (encoding_key, decoding_key, PublicKeyData::Rsa { n, e })
        } else {
            let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
                .map_err(|e| KeyError::invalid_key(e.to_string()))?;

            let secret_key = EcSecretKey::from_pkcs8_pem(private_pem)
                .map_err(|e| KeyError::invalid_key(e.to_string()))?;
            let signing_key = EcSigningKey::from(&secret_key);
            let point = signing_key.verifying_key().to_encoded_point(false);
            let x = point
                .x()
                .ok_or_else(|| KeyError::invalid_key("Missing x coordinate"))?;
            let y = point
                .y()
                .ok_or_else(|| KeyError::invalid_key("Missing y coordinate"))?;

            let x_b64 = URL_SAFE_NO_PAD.encode(x.as_slice());
            let y_b64 = URL_SAFE_NO_PAD.encode(y.as_slice());
            let decoding_key = DecodingKey::from_ec_components(&x_b64, &y_b64)
                .map_err(|e| KeyError::invalid_key(e.to_string()))?;

            (
                encoding_key,
                decoding_key,
                PublicKeyData::Ec {
                    x: x.to_vec(),
                    y: y.to_vec(),
                },
            )
        };

        Ok(Self {
            kid: kid.into(),
            algorithm,
            encoding_key,
            decoding_key,
            public_key_pem: public_pem.to_string(),
            public_key_data,
            created_at: OffsetDateTime::now_utc(),
            active: true,
        })
    }

    /// Returns the encoding (private) key for signing.
    #[must_use]
    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// Returns the decoding (public) key for verification.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Returns the PEM-encoded public key.
    #[must_use]
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Returns `true` if this key is eligible for new issuance.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Exports the public key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        match &self.public_key_data {
            PublicKeyData::Rsa { n, e } => Jwk {
                kty: "RSA".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: Some(URL_SAFE_NO_PAD.encode(n)),
                e: Some(URL_SAFE_NO_PAD.encode(e)),
                crv: None,
                x: None,
                y: None,
            },
            PublicKeyData::Ec { x, y } => Jwk {
                kty: "EC".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: None,
                e: None,
                crv: Some("P-256".to_string()),
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                y: Some(URL_SAFE_NO_PAD.encode(y)),
            },
        }
    }
}

// ============================================================================
// Key Provider
// ============================================================================

/// Key rotation bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRotationStatus {
    /// Number of platform keys (active and deactivated).
    pub platform_keys: usize,
    /// Number of tenant keys across all tenants.
    pub tenant_keys: usize,
    /// Number of keys currently eligible for issuance.
    pub active_keys: usize,
}

/// Holds signing key material and selects the active signing key.
///
/// Thread-safe; a single provider is shared across the issuer and validator.
pub struct KeyProvider {
    platform_keys: RwLock<HashMap<String, SigningKey>>,
    tenant_keys: RwLock<HashMap<String, HashMap<String, SigningKey>>>,
    enable_tenant_keys: bool,
}

impl KeyProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new(enable_tenant_keys: bool) -> Self {
        Self {
            platform_keys: RwLock::new(HashMap::new()),
            tenant_keys: RwLock::new(HashMap::new()),
            enable_tenant_keys,
        }
    }

    /// Creates a provider seeded with one platform key.
    #[must_use]
    pub fn with_platform_key(key: SigningKey, enable_tenant_keys: bool) -> Self {
        let provider = Self::new(enable_tenant_keys);
        provider.add_key(key, None);
        provider
    }

    /// Returns the signing key for token generation.
    ///
    /// Priority: newest active tenant key (when tenant keys are enabled and
    /// a tenant is given) over the newest active platform key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::NoSigningKey`] if no active platform key is
    /// loaded.
    pub fn signing_key(&self, tenant_id: Option<&str>) -> Result<SigningKey, KeyError> {
        if self.enable_tenant_keys
            && let Some(tenant_id) = tenant_id
            && let Some(key) = self.newest_active_tenant_key(tenant_id)
        {
            return Ok(key);
        }

        self.platform_keys
            .read()
            .map_err(|_| KeyError::key_generation("key provider lock poisoned"))?
            .values()
            .filter(|k| k.active)
            .max_by_key(|k| k.created_at)
            .cloned()
            .ok_or(KeyError::NoSigningKey)
    }

    fn newest_active_tenant_key(&self, tenant_id: &str) -> Option<SigningKey> {
        self.tenant_keys
            .read()
            .ok()?
            .get(tenant_id)?
            .values()
            .filter(|k| k.active)
            .max_by_key(|k| k.created_at)
            .cloned()
    }

    /// Resolves a key by ID for verification, tenant keys taking priority.
    ///
    /// Deactivated keys still resolve: tokens signed before deactivation
    /// must keep verifying until they expire.
    #[must_use]
    pub fn public_key(&self, kid: &str, tenant_id: Option<&str>) -> Option<SigningKey> {
        if let Some(tenant_id) = tenant_id
            && let Ok(tenants) = self.tenant_keys.read()
            && let Some(key) = tenants.get(tenant_id).and_then(|m| m.get(kid))
        {
            return Some(key.clone());
        }

        self.platform_keys.read().ok()?.get(kid).cloned()
    }

    /// Adds a signing key (for rotation). Existing tokens signed with older
    /// keys remain verifiable.
    pub fn add_key(&self, key: SigningKey, tenant_id: Option<&str>) {
        match tenant_id {
            Some(tenant_id) => {
                if let Ok(mut tenants) = self.tenant_keys.write() {
                    tenants
                        .entry(tenant_id.to_string())
                        .or_default()
                        .insert(key.kid.clone(), key);
                }
            }
            None => {
                if let Ok(mut keys) = self.platform_keys.write() {
                    keys.insert(key.kid.clone(), key);
                }
            }
        }
    }

    /// Deactivates a signing key. Issuance stops immediately; the key is
    /// retained for verification. Returns `false` if the key is unknown.
    pub fn deactivate_key(&self, kid: &str, tenant_id: Option<&str>) -> bool {
        match tenant_id {
            Some(tenant_id) => self
                .tenant_keys
                .write()
                .ok()
                .and_then(|mut tenants| {
                    tenants
                        .get_mut(tenant_id)
                        .and_then(|m| m.get_mut(kid))
                        .map(|key| key.active = false)
                })
                .is_some(),
            None => self
                .platform_keys
                .write()
                .ok()
                .and_then(|mut keys| keys.get_mut(kid).map(|key| key.active = false))
                .is_some(),
        }
    }

    /// Returns `true` if the key exists and is active.
    #[must_use]
    pub fn is_key_active(&self, kid: &str, tenant_id: Option<&str>) -> bool {
        self.public_key(kid, tenant_id)
            .is_some_and(|key| key.active)
    }

    /// Returns all active platform public keys as a JWKS.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        let keys = self
            .platform_keys
            .read()
            .map(|keys| {
                keys.values()
                    .filter(|k| k.active)
                    .map(SigningKey::to_jwk)
                    .collect()
            })
            .unwrap_or_default();
        Jwks { keys }
    }

    /// Returns key rotation bookkeeping counts.
    #[must_use]
    pub fn rotation_status(&self) -> KeyRotationStatus {
        let platform = self.platform_keys.read();
        let tenants = self.tenant_keys.read();

        let (platform_count, platform_active) = platform
            .as_ref()
            .map(|keys| (keys.len(), keys.values().filter(|k| k.active).count()))
            .unwrap_or((0, 0));

        let (tenant_count, tenant_active) = tenants
            .as_ref()
            .map(|tenants| {
                let all = tenants.values().flat_map(|m| m.values());
                let count = tenants.values().map(HashMap::len).sum();
                let active = all.filter(|k| k.active).count();
                (count, active)
            })
            .unwrap_or((0, 0));

        KeyRotationStatus {
            platform_keys: platform_count,
            tenant_keys: tenant_count,
            active_keys: platform_active + tenant_active,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
