//! Periodic expired-session sweep.
//!
//! Runs [`SessionStore::cleanup_expired`] on a fixed interval. The sweep
//! is idempotent and safe to run from any number of service instances; it
//! is also the only place the active-session gauge is decremented.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::AuthResult;
use crate::session::store::SessionStore;

/// Background task sweeping expired sessions.
pub struct SessionCleanup {
    store: Arc<SessionStore>,
    interval: Duration,
}

impl SessionCleanup {
    /// Creates a cleanup task with the configured sweep interval.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Runs one sweep. Returns the number of sessions swept.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn cleanup_once(&self) -> AuthResult<u64> {
        self.store.cleanup_expired().await
    }

    /// Spawns the periodic sweep loop. Storage errors are logged and the
    /// loop continues; abort the handle to stop it.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick fires immediately; skip it so a fleet of
            // restarting instances doesn't stampede the store.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.store.cleanup_expired().await {
                    Ok(0) => {}
                    Ok(cleaned) => {
                        tracing::info!(cleaned, "expired sessions swept");
                    }
                    Err(error) => {
                        tracing::warn!(%error, "session cleanup sweep failed");
                    }
                }
            }
        })
    }
}
