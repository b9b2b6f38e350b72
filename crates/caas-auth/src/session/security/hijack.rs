//! Mid-session hijack detection.
//!
//! Runs on privileged actions, comparing the session's bound IP and user
//! agent to the current request. A lone IP change can be a mobile network
//! hop; a simultaneous IP and user-agent change almost never is, so that
//! combination escalates to a single `session_hijack` event superseding
//! the individual ones.

use serde::Serialize;

use crate::session::model::{Session, mask_ip};
use crate::session::security::anomaly::{SecurityEvent, SecurityEventType, Severity};

/// What the caller should do about a session after detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    /// Continue serving the session.
    Allow,
    /// Require re-authentication (e.g. an MFA challenge).
    Challenge,
    /// Terminate the session immediately.
    Terminate,
}

/// Detects session takeover from request/session binding deltas.
#[derive(Debug, Default)]
pub struct HijackDetector;

impl HijackDetector {
    /// Creates a detector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Compares the session's bound IP and user agent against the current
    /// request's.
    #[must_use]
    pub fn inspect(
        &self,
        session: &Session,
        current_ip: &str,
        current_user_agent: &str,
    ) -> Vec<SecurityEvent> {
        let ip_changed = session.ip_address != current_ip;
        let agent_changed = !session.device_info.user_agent.is_empty()
            && session.device_info.user_agent != current_user_agent;

        if ip_changed && agent_changed {
            // Both at once supersedes the individual events.
            return vec![SecurityEvent::new(
                SecurityEventType::SessionHijack,
                Severity::Critical,
                session,
                serde_json::json!({
                    "bound_ip": mask_ip(&session.ip_address),
                    "current_ip": mask_ip(current_ip),
                    "user_agent_changed": true,
                }),
            )];
        }

        let mut events = Vec::new();
        if ip_changed {
            events.push(SecurityEvent::new(
                SecurityEventType::IpChange,
                Severity::High,
                session,
                serde_json::json!({
                    "bound_ip": mask_ip(&session.ip_address),
                    "current_ip": mask_ip(current_ip),
                }),
            ));
        }
        if agent_changed {
            events.push(SecurityEvent::new(
                SecurityEventType::DeviceChange,
                Severity::Critical,
                session,
                serde_json::json!({
                    "user_agent_changed": true,
                }),
            ));
        }
        events
    }

    /// Maps one event to the action the caller should take.
    #[must_use]
    pub fn recommended_action(&self, event: &SecurityEvent) -> SessionAction {
        match event.event_type {
            SecurityEventType::SessionHijack | SecurityEventType::DeviceChange => {
                SessionAction::Terminate
            }
            SecurityEventType::IpChange => {
                if event.severity == Severity::Critical {
                    SessionAction::Terminate
                } else {
                    SessionAction::Challenge
                }
            }
            _ => SessionAction::Allow,
        }
    }

    /// Folds a batch of events into the strictest recommended action.
    #[must_use]
    pub fn strictest_action(&self, events: &[SecurityEvent]) -> SessionAction {
        events
            .iter()
            .map(|e| self.recommended_action(e))
            .max_by_key(|action| match action {
                SessionAction::Allow => 0,
                SessionAction::Challenge => 1,
                SessionAction::Terminate => 2,
            })
            .unwrap_or(SessionAction::Allow)
    }
}
