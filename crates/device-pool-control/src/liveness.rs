//! Heartbeat leases.
//!
//! A client process proves it is alive by refreshing a TTL key per device.
//! Nothing sweeps expired heartbeats: readers consult [`Liveness::is_alive`]
//! and report the device accordingly.

use std::sync::Arc;
use std::time::Duration;

use device_pool_core::DeviceId;
use device_pool_store::{keys, Store};

use crate::error::Result;

/// Heartbeat lease access for one store.
pub struct Liveness<S> {
    store: Arc<S>,
    ttl: Duration,
}

impl<S: Store> Liveness<S> {
    /// Create a liveness view with the given heartbeat TTL.
    #[must_use]
    pub const fn new(store: Arc<S>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// The heartbeat TTL.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// (Re)set the heartbeat lease of a device.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    pub async fn beat(&self, device_id: &DeviceId) -> Result<()> {
        self.store
            .set_with_ttl(&keys::heartbeat_key(device_id), "1", self.ttl)
            .await?;
        tracing::trace!(device_id = %device_id, "Heartbeat refreshed");
        Ok(())
    }

    /// Whether the device holds a live heartbeat lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    pub async fn is_alive(&self, device_id: &DeviceId) -> Result<bool> {
        Ok(self.store.exists(&keys::heartbeat_key(device_id)).await?)
    }
}
