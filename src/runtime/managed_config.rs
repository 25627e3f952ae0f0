//! Keeping the managed configuration current.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::clock::{SharedClock, system_clock};
use crate::connector::RUNTIME_VERSION;
use crate::remote::{ManagedConfig, ManagedConfigRequest, RemoteClient, RemoteError};

/// A configuration this close to expiry is fetched again.
pub const RENEWAL_THRESHOLD_MINS: i64 = 20;

/// Caches the managed configuration and refetches it near expiry.
#[derive(Debug)]
pub struct ManagedConfigRefresher<C> {
    client: Arc<C>,
    connector_type: String,
    clock: SharedClock,
    cached: Mutex<Option<ManagedConfig>>,
}

impl<C: RemoteClient> ManagedConfigRefresher<C> {
    pub fn new(client: Arc<C>, connector_type: impl Into<String>) -> Self {
        ManagedConfigRefresher {
            client,
            connector_type: connector_type.into(),
            clock: system_clock(),
            cached: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// The most recently fetched configuration.
    pub fn current(&self) -> Option<ManagedConfig> {
        self.cached.lock().clone()
    }

    /// True if nothing is cached, the cached configuration has no expiry, or
    /// it expires within [`RENEWAL_THRESHOLD_MINS`].
    pub fn needs_refresh(&self) -> bool {
        let expires_at = self.cached.lock().as_ref().and_then(|c| c.expires_at);
        match expires_at {
            None => true,
            Some(expires_at) => {
                self.clock.now() + chrono::Duration::minutes(RENEWAL_THRESHOLD_MINS) > expires_at
            }
        }
    }

    /// Fetches a new configuration if the cached one is due for renewal.
    ///
    /// Returns whether a fetch happened. A failed fetch keeps the cached
    /// configuration.
    pub async fn refresh(&self) -> Result<bool, RemoteError> {
        if !self.needs_refresh() {
            debug!("Managed config still current");
            return Ok(false);
        }

        let request = ManagedConfigRequest {
            connector_type: self.connector_type.clone(),
            runtime_version: RUNTIME_VERSION.to_string(),
            client_timestamp: self.clock.now_millis(),
        };
        let config = self.client.fetch_managed_config(&request).await?;
        info!(expires_at = ?config.expires_at, "Managed config refreshed");
        *self.cached.lock() = Some(config);
        Ok(true)
    }
}
