//! Session record, serialization, and log masking.
//!
//! Timestamps are stored as Unix milliseconds. Records written by older
//! service versions may carry second-resolution timestamps; magnitude
//! detection normalizes them on read.
//!
//! IP addresses and locations are masked before any external logging: the
//! snapshot type is the only session shape that should ever reach a log
//! line or an outbound event.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::AuthError;

/// Timestamps below this magnitude are seconds, not milliseconds
/// (the cutoff is the year 3000 in seconds).
const SECONDS_CUTOFF: i64 = 32_503_680_000;

/// Returns the current time as Unix milliseconds.
#[must_use]
pub(crate) fn now_unix_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Normalizes a timestamp to milliseconds by magnitude.
#[must_use]
pub(crate) fn normalize_timestamp_ms(timestamp: i64) -> i64 {
    if timestamp < SECONDS_CUTOFF {
        timestamp * 1000
    } else {
        timestamp
    }
}

/// Device details captured at login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Coarse device class ("web", "mobile", "desktop", "tablet").
    pub device_type: String,

    /// Operating system name.
    pub os: String,

    /// Browser name, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,

    /// Raw user agent string the session was created with.
    pub user_agent: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            device_type: "web".to_string(),
            os: "unknown".to_string(),
            browser: None,
            user_agent: String::new(),
        }
    }
}

/// Coarse geo lookup result for a session's IP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    /// ISO country code or name.
    pub country: String,

    /// City, when the lookup resolves one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

/// The canonical record of a logged-in device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session ID.
    pub id: String,

    /// User the session belongs to.
    pub user_id: String,

    /// Tenant the session belongs to.
    pub tenant_id: String,

    /// Stable device identifier.
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Device details.
    #[serde(default)]
    pub device_info: DeviceInfo,

    /// IP the session was created from.
    #[serde(default = "default_ip")]
    pub ip_address: String,

    /// Geo lookup of the IP, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,

    /// Creation time (Unix milliseconds).
    pub created_at: i64,

    /// Last activity time (Unix milliseconds).
    pub last_activity: i64,

    /// Expiry (Unix milliseconds); pushed forward by renewal.
    pub expires_at: i64,

    /// Cleared by termination or security action.
    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Set after a successful MFA challenge.
    #[serde(default)]
    pub mfa_verified: bool,
}

fn default_device_id() -> String {
    "unknown".to_string()
}

fn default_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_true() -> bool {
    true
}

impl Session {
    /// Returns `true` if the session is past its expiry at `now_ms`.
    #[must_use]
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }

    /// Total age of the session at `now_ms`, in milliseconds.
    #[must_use]
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.created_at).max(0)
    }

    /// Time until expiry at `now_ms`, in milliseconds (zero if past).
    #[must_use]
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        (self.expires_at - now_ms).max(0)
    }

    /// Parses a stored session, normalizing timestamps.
    ///
    /// # Errors
    ///
    /// Returns a storage error if required fields are missing or the JSON
    /// is unparseable.
    pub fn from_json(data: &str) -> Result<Self, AuthError> {
        let mut session: Session = serde_json::from_str(data)
            .map_err(|e| AuthError::storage(format!("Failed to deserialize session: {e}")))?;
        if session.id.is_empty() || session.user_id.is_empty() || session.tenant_id.is_empty() {
            return Err(AuthError::storage("Session missing required fields"));
        }
        session.created_at = normalize_timestamp_ms(session.created_at);
        session.last_activity = normalize_timestamp_ms(session.last_activity);
        session.expires_at = normalize_timestamp_ms(session.expires_at);
        Ok(session)
    }

    /// Serializes the session for storage.
    ///
    /// # Errors
    ///
    /// Returns an internal error if serialization fails.
    pub fn to_json(&self) -> Result<String, AuthError> {
        serde_json::to_string(self)
            .map_err(|e| AuthError::internal(format!("Failed to serialize session: {e}")))
    }

    /// Builds the maskable shape used for any external logging.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            tenant_id: self.tenant_id.clone(),
            device_type: self.device_info.device_type.clone(),
            ip_address: mask_ip(&self.ip_address),
            country: self.location.as_ref().map(|l| l.country.clone()),
            created_at: self.created_at,
            last_activity: self.last_activity,
            is_active: self.is_active,
        }
    }
}

/// Masked session shape, safe to log or publish.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Session ID.
    pub id: String,
    /// User ID.
    pub user_id: String,
    /// Tenant ID.
    pub tenant_id: String,
    /// Coarse device class.
    pub device_type: String,
    /// Masked IP address.
    pub ip_address: String,
    /// Country only; city is dropped.
    pub country: Option<String>,
    /// Creation time (Unix milliseconds).
    pub created_at: i64,
    /// Last activity (Unix milliseconds).
    pub last_activity: i64,
    /// Whether the session is live.
    pub is_active: bool,
}

/// Masks an IP for logging: last octet for IPv4, the tail segments for
/// IPv6, a fully masked placeholder for anything unrecognizable.
#[must_use]
pub fn mask_ip(ip: &str) -> String {
    let v4_parts: Vec<&str> = ip.split('.').collect();
    if v4_parts.len() == 4 {
        return format!("{}.{}.{}.xxx", v4_parts[0], v4_parts[1], v4_parts[2]);
    }
    let v6_parts: Vec<&str> = ip.split(':').collect();
    if v6_parts.len() > 2 {
        let kept = &v6_parts[..v6_parts.len() - 2];
        return format!("{}:xxxx:xxxx", kept.join(":"));
    }
    "xxx.xxx.xxx.xxx".to_string()
}
