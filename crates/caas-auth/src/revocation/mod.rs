//! Token revocation: facts, events, and the combined service.
//!
//! Revocation is expressed as four independent facts, each with its own
//! TTL, evaluated token → user → session → tenant. The store is the source
//! of truth; published events exist only so other instances can invalidate
//! local caches without polling.

pub mod events;
pub mod service;
pub mod store;

pub use events::{
    MemoryEventPublisher, RevocationEvent, RevocationEventPublisher, RevocationEventType,
};
pub use service::{RevocationResult, RevocationService};
pub use store::{RevocationReason, RevocationStats, RevocationStore};
