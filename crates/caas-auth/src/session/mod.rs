//! Session tracking with sliding expiration.
//!
//! - [`model`] - the session record, serialization normalization, masking
//! - [`store`] - canonical session storage with a per-user index
//! - [`renewal`] - lazy sliding-window renewal with cooldown
//! - [`cleanup`] - the periodic expired-session sweep
//! - [`security`] - anomaly and hijack detection

pub mod cleanup;
pub mod model;
pub mod renewal;
pub mod security;
pub mod store;

pub use cleanup::SessionCleanup;
pub use model::{DeviceInfo, GeoLocation, Session, SessionSnapshot};
pub use renewal::{RenewalOutcome, RenewalSkipReason, SessionRenewal};
pub use store::{NewSession, SessionStore};
