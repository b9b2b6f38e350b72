//! Anomaly detection over session creation.
//!
//! Compares a freshly created session against the user's prior sessions
//! and emits zero or more typed events. Detection is heuristic and
//! advisory: the caller maps events (or the aggregated risk score) to an
//! action.
//!
//! Event details only ever contain masked IPs and country-level location.

use serde::{Deserialize, Serialize};

use crate::session::model::{Session, mask_ip, now_unix_ms};

/// Event severity, with a fixed score contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine signal.
    Low,
    /// Worth surfacing to the user.
    Medium,
    /// Likely attack indicator.
    High,
    /// Active attack indicator.
    Critical,
}

impl Severity {
    /// Risk score contribution of one event of this severity.
    #[must_use]
    pub fn score(&self) -> u8 {
        match self {
            Self::Low => 10,
            Self::Medium => 25,
            Self::High => 50,
            Self::Critical => 100,
        }
    }
}

/// The typed security events the detectors can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    /// Sessions from incompatible countries within an implausible window.
    ImpossibleTravel,
    /// Device ID never seen for this user.
    NewDevice,
    /// IP differs from the most recent prior session.
    IpChange,
    /// User agent changed mid-session.
    DeviceChange,
    /// IP and user agent changed simultaneously mid-session.
    SessionHijack,
}

/// One detected security event.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    /// What was detected.
    pub event_type: SecurityEventType,

    /// How bad it is.
    pub severity: Severity,

    /// The session the event is about.
    pub session_id: String,

    /// The affected user.
    pub user_id: String,

    /// Detection time (Unix milliseconds).
    pub timestamp: i64,

    /// Masked, event-specific context.
    pub details: serde_json::Value,
}

impl SecurityEvent {
    pub(crate) fn new(
        event_type: SecurityEventType,
        severity: Severity,
        session: &Session,
        details: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            severity,
            session_id: session.id.clone(),
            user_id: session.user_id.clone(),
            timestamp: now_unix_ms(),
            details,
        }
    }
}

/// Toggles for the individual anomaly checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Master switch.
    pub enabled: bool,
    /// Flag logins from incompatible countries in a short window.
    pub impossible_travel_enabled: bool,
    /// Flag logins from unseen devices.
    pub new_device_enabled: bool,
    /// Flag IP changes between consecutive sessions.
    pub ip_change_enabled: bool,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            impossible_travel_enabled: true,
            new_device_enabled: true,
            ip_change_enabled: true,
        }
    }
}

/// Window below which cross-country logins are impossible travel.
const IMPOSSIBLE_TRAVEL_WINDOW_MS: i64 = 3_600_000;

/// Detects anomalies at session creation.
pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    /// Creates a detector.
    #[must_use]
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    /// Compares a new session against the user's prior sessions.
    #[must_use]
    pub fn detect(&self, session: &Session, previous: &[Session]) -> Vec<SecurityEvent> {
        if !self.config.enabled {
            return Vec::new();
        }

        let mut events = Vec::new();

        if self.config.impossible_travel_enabled
            && let Some(event) = self.detect_impossible_travel(session, previous)
        {
            events.push(event);
        }
        if self.config.new_device_enabled
            && let Some(event) = self.detect_new_device(session, previous)
        {
            events.push(event);
        }
        if self.config.ip_change_enabled
            && let Some(event) = self.detect_ip_change(session, previous)
        {
            events.push(event);
        }

        events
    }

    /// Aggregates event severities into a 0-100 risk score.
    #[must_use]
    pub fn risk_score(&self, events: &[SecurityEvent]) -> u8 {
        let total: u32 = events.iter().map(|e| u32::from(e.severity.score())).sum();
        total.min(100) as u8
    }

    fn detect_impossible_travel(
        &self,
        session: &Session,
        previous: &[Session],
    ) -> Option<SecurityEvent> {
        let location = session.location.as_ref()?;

        let recent = previous
            .iter()
            .filter(|s| s.location.is_some())
            .max_by_key(|s| s.created_at)?;
        let recent_location = recent.location.as_ref()?;

        if location.country == recent_location.country {
            return None;
        }

        let delta_ms = session.created_at - recent.created_at;
        if delta_ms >= IMPOSSIBLE_TRAVEL_WINDOW_MS {
            return None;
        }

        Some(SecurityEvent::new(
            SecurityEventType::ImpossibleTravel,
            Severity::Critical,
            session,
            serde_json::json!({
                "previous_country": recent_location.country,
                "current_country": location.country,
                "time_diff_ms": delta_ms,
            }),
        ))
    }

    fn detect_new_device(&self, session: &Session, previous: &[Session]) -> Option<SecurityEvent> {
        let known = previous.iter().any(|s| s.device_id == session.device_id);
        if known {
            return None;
        }

        Some(SecurityEvent::new(
            SecurityEventType::NewDevice,
            Severity::Medium,
            session,
            serde_json::json!({
                "device_type": session.device_info.device_type,
                "os": session.device_info.os,
                "browser": session.device_info.browser,
            }),
        ))
    }

    fn detect_ip_change(&self, session: &Session, previous: &[Session]) -> Option<SecurityEvent> {
        let recent = previous.iter().max_by_key(|s| s.created_at)?;
        if session.ip_address == recent.ip_address {
            return None;
        }

        Some(SecurityEvent::new(
            SecurityEventType::IpChange,
            Severity::Low,
            session,
            serde_json::json!({
                "previous_ip": mask_ip(&recent.ip_address),
                "current_ip": mask_ip(&session.ip_address),
            }),
        ))
    }
}
