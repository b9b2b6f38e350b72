//! MFA method verifiers.
//!
//! The challenge engine dispatches to a [`MethodVerifier`]; this module
//! provides the TOTP and backup-code implementations over the KV port and
//! a composite that routes by method.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;
use crate::mfa::challenge::MfaMethod;
use crate::storage::kv::KeyValueStore;

const TOTP_SECRET_PREFIX: &str = "mfa_totp_secret:";
const BACKUP_CODES_PREFIX: &str = "mfa_backup_codes:";
const BACKUP_USED_PREFIX: &str = "mfa_backup_used:";

/// One-time-use markers outlive any plausible replay window.
const BACKUP_USED_RETENTION: Duration = Duration::from_secs(30 * 24 * 3600);

type HmacSha1 = Hmac<Sha1>;

/// Port the challenge engine verifies responses through.
#[async_trait]
pub trait MethodVerifier: Send + Sync {
    /// Verifies a response for the given user and method.
    async fn verify(&self, user_id: &str, method: MfaMethod, response: &str) -> AuthResult<bool>;

    /// Returns the methods the user has enrolled.
    async fn available_methods(&self, user_id: &str) -> AuthResult<Vec<MfaMethod>>;
}

// ============================================================================
// TOTP
// ============================================================================

/// RFC 6238 TOTP verifier with a ±1 step window.
pub struct TotpVerifier {
    kv: Arc<dyn KeyValueStore>,
    step_secs: u64,
    window: i64,
    digits: u32,
}

impl TotpVerifier {
    /// Creates a verifier with the standard 30-second step, six digits,
    /// and a one-step window in both directions.
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            step_secs: 30,
            window: 1,
            digits: 6,
        }
    }

    fn secret_key(user_id: &str) -> String {
        format!("{TOTP_SECRET_PREFIX}{user_id}")
    }

    /// Stores a user's TOTP secret.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn enroll(&self, user_id: &str, secret: &[u8]) -> AuthResult<()> {
        self.kv
            .put(&Self::secret_key(user_id), &hex::encode(secret), None)
            .await
    }

    /// Returns `true` if the user has a TOTP secret enrolled.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn is_enrolled(&self, user_id: &str) -> AuthResult<bool> {
        self.kv.exists(&Self::secret_key(user_id)).await
    }

    /// Removes a user's TOTP secret.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn unenroll(&self, user_id: &str) -> AuthResult<()> {
        self.kv.delete(&Self::secret_key(user_id)).await?;
        Ok(())
    }

    /// Verifies a code against the current time window and its neighbors.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn verify_code(&self, user_id: &str, code: &str) -> AuthResult<bool> {
        let Some(stored) = self.kv.get(&Self::secret_key(user_id)).await? else {
            return Ok(false);
        };
        let secret = hex::decode(&stored)
            .map_err(|_| AuthError::storage("Corrupt TOTP secret encoding"))?;

        let counter = OffsetDateTime::now_utc().unix_timestamp() / self.step_secs as i64;
        for offset in -self.window..=self.window {
            let candidate = hotp(&secret, (counter + offset) as u64, self.digits);
            if candidate == code {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// RFC 4226 HOTP with dynamic truncation.
fn hotp(secret: &[u8], counter: u64, digits: u32) -> String {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[19] & 0x0f) as usize;
    let code = (u32::from(digest[offset]) & 0x7f) << 24
        | u32::from(digest[offset + 1]) << 16
        | u32::from(digest[offset + 2]) << 8
        | u32::from(digest[offset + 3]);

    let modulus = 10u32.pow(digits);
    format!("{:0width$}", code % modulus, width = digits as usize)
}

// ============================================================================
// Backup codes
// ============================================================================

/// Single-use backup code verifier. Codes are stored as SHA-256 hashes and
/// consumed atomically on first use.
pub struct BackupCodeVerifier {
    kv: Arc<dyn KeyValueStore>,
}

impl BackupCodeVerifier {
    /// Creates a verifier.
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn codes_key(user_id: &str) -> String {
        format!("{BACKUP_CODES_PREFIX}{user_id}")
    }

    fn used_key(user_id: &str, hash: &str) -> String {
        format!("{BACKUP_USED_PREFIX}{user_id}:{hash}")
    }

    fn hash_code(code: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(code.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Generates `count` fresh codes for a user, replacing any existing
    /// set, and returns the raw codes (shown to the user exactly once).
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn generate_codes(&self, user_id: &str, count: usize) -> AuthResult<Vec<String>> {
        use rand::Rng;

        let key = Self::codes_key(user_id);
        self.kv.delete(&key).await?;

        let mut codes = Vec::with_capacity(count);
        for _ in 0..count {
            let code: String = rand::thread_rng()
                .sample_iter(rand::distributions::Alphanumeric)
                .take(10)
                .map(char::from)
                .collect();
            self.kv.set_add(&key, &Self::hash_code(&code)).await?;
            codes.push(code);
        }
        Ok(codes)
    }

    /// Number of unused codes remaining.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn remaining(&self, user_id: &str) -> AuthResult<usize> {
        self.kv.set_len(&Self::codes_key(user_id)).await
    }

    /// Consumes a code if it is valid and unused. One-time use holds under
    /// concurrent presentation: the used-marker is a conditional write.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn consume(&self, user_id: &str, code: &str) -> AuthResult<bool> {
        let hash = Self::hash_code(code);
        let codes_key = Self::codes_key(user_id);

        let known = self
            .kv
            .set_members(&codes_key)
            .await?
            .iter()
            .any(|h| *h == hash);
        if !known {
            return Ok(false);
        }

        if !self
            .kv
            .put_if_absent(&Self::used_key(user_id, &hash), "1", BACKUP_USED_RETENTION)
            .await?
        {
            // Lost the race: someone already spent this code.
            return Ok(false);
        }

        self.kv.set_remove(&codes_key, &hash).await?;
        Ok(true)
    }
}

// ============================================================================
// Composite
// ============================================================================

/// Routes verification to the enrolled method implementations.
pub struct MultiMethodVerifier {
    totp: TotpVerifier,
    backup: BackupCodeVerifier,
}

impl MultiMethodVerifier {
    /// Creates a composite verifier over one KV store.
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            totp: TotpVerifier::new(Arc::clone(&kv)),
            backup: BackupCodeVerifier::new(kv),
        }
    }

    /// The TOTP verifier, for enrollment flows.
    #[must_use]
    pub fn totp(&self) -> &TotpVerifier {
        &self.totp
    }

    /// The backup code verifier, for generation flows.
    #[must_use]
    pub fn backup_codes(&self) -> &BackupCodeVerifier {
        &self.backup
    }
}

#[async_trait]
impl MethodVerifier for MultiMethodVerifier {
    async fn verify(&self, user_id: &str, method: MfaMethod, response: &str) -> AuthResult<bool> {
        match method {
            MfaMethod::Totp => self.totp.verify_code(user_id, response).await,
            MfaMethod::BackupCode => self.backup.consume(user_id, response).await,
        }
    }

    async fn available_methods(&self, user_id: &str) -> AuthResult<Vec<MfaMethod>> {
        let mut methods = Vec::new();
        if self.totp.is_enrolled(user_id).await? {
            methods.push(MfaMethod::Totp);
        }
        if self.backup.remaining(user_id).await? > 0 {
            methods.push(MfaMethod::BackupCode);
        }
        Ok(methods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryKvStore;

    fn kv() -> Arc<InMemoryKvStore> {
        Arc::new(InMemoryKvStore::new())
    }

    #[test]
    fn test_hotp_reference_vectors() {
        // RFC 4226 appendix D, secret "12345678901234567890".
        let secret = b"12345678901234567890";
        assert_eq!(hotp(secret, 0, 6), "755224");
        assert_eq!(hotp(secret, 1, 6), "287082");
        assert_eq!(hotp(secret, 9, 6), "520489");
    }

    #[tokio::test]
    async fn test_totp_verifies_current_window() {
        let verifier = TotpVerifier::new(kv());
        let secret = b"a-test-secret-of-sorts";
        verifier.enroll("user-1", secret).await.unwrap();
        assert!(verifier.is_enrolled("user-1").await.unwrap());

        let counter = OffsetDateTime::now_utc().unix_timestamp() / 30;
        let code = hotp(secret, counter as u64, 6);
        assert!(verifier.verify_code("user-1", &code).await.unwrap());
    }

    #[tokio::test]
    async fn test_totp_accepts_adjacent_window() {
        let verifier = TotpVerifier::new(kv());
        let secret = b"a-test-secret-of-sorts";
        verifier.enroll("user-1", secret).await.unwrap();

        let counter = OffsetDateTime::now_utc().unix_timestamp() / 30;
        let previous = hotp(secret, (counter - 1) as u64, 6);
        assert!(verifier.verify_code("user-1", &previous).await.unwrap());
    }

    #[tokio::test]
    async fn test_totp_rejects_wrong_code_and_unenrolled_user() {
        let verifier = TotpVerifier::new(kv());
        verifier.enroll("user-1", b"secret").await.unwrap();

        assert!(!verifier.verify_code("user-1", "000000").await.unwrap());
        assert!(!verifier.verify_code("user-2", "000000").await.unwrap());
    }

    #[tokio::test]
    async fn test_backup_codes_single_use() {
        let verifier = BackupCodeVerifier::new(kv());
        let codes = verifier.generate_codes("user-1", 8).await.unwrap();
        assert_eq!(codes.len(), 8);
        assert_eq!(verifier.remaining("user-1").await.unwrap(), 8);

        assert!(verifier.consume("user-1", &codes[0]).await.unwrap());
        assert_eq!(verifier.remaining("user-1").await.unwrap(), 7);

        // Spent code does not work twice.
        assert!(!verifier.consume("user-1", &codes[0]).await.unwrap());
        // Unknown code never works.
        assert!(!verifier.consume("user-1", "made-up-code").await.unwrap());
    }

    #[tokio::test]
    async fn test_backup_codes_race_single_winner() {
        let verifier = Arc::new(BackupCodeVerifier::new(kv()));
        let codes = verifier.generate_codes("user-1", 1).await.unwrap();
        let code = codes[0].clone();

        let (a, b) = tokio::join!(
            verifier.consume("user-1", &code),
            verifier.consume("user-1", &code)
        );
        let winners = [a.unwrap(), b.unwrap()].iter().filter(|w| **w).count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_regenerating_codes_invalidates_old_set() {
        let verifier = BackupCodeVerifier::new(kv());
        let old = verifier.generate_codes("user-1", 4).await.unwrap();
        let _new = verifier.generate_codes("user-1", 4).await.unwrap();

        assert!(!verifier.consume("user-1", &old[0]).await.unwrap());
        assert_eq!(verifier.remaining("user-1").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_available_methods_follow_enrollment() {
        let kv = kv();
        let verifier = MultiMethodVerifier::new(kv);

        assert!(verifier.available_methods("user-1").await.unwrap().is_empty());

        verifier.totp().enroll("user-1", b"secret").await.unwrap();
        assert_eq!(
            verifier.available_methods("user-1").await.unwrap(),
            vec![MfaMethod::Totp]
        );

        verifier
            .backup_codes()
            .generate_codes("user-1", 4)
            .await
            .unwrap();
        assert_eq!(
            verifier.available_methods("user-1").await.unwrap(),
            vec![MfaMethod::Totp, MfaMethod::BackupCode]
        );
    }

    #[tokio::test]
    async fn test_composite_dispatch() {
        let verifier = MultiMethodVerifier::new(kv());
        let codes = verifier
            .backup_codes()
            .generate_codes("user-1", 1)
            .await
            .unwrap();

        assert!(verifier
            .verify("user-1", MfaMethod::BackupCode, &codes[0])
            .await
            .unwrap());
        assert!(!verifier
            .verify("user-1", MfaMethod::Totp, "123456")
            .await
            .unwrap());
    }
}
