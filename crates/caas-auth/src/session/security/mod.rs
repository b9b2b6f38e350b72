//! Session security detectors.
//!
//! - [`anomaly`] - runs at session creation against the user's prior
//!   sessions (impossible travel, new device, IP change)
//! - [`hijack`] - runs mid-session on privileged actions, comparing the
//!   session's bound IP and user agent to the current request

pub mod anomaly;
pub mod hijack;

pub use anomaly::{AnomalyConfig, AnomalyDetector, SecurityEvent, SecurityEventType, Severity};
pub use hijack::{HijackDetector, SessionAction};
