//! Reservation protocol.
//!
//! A reservation moves a device from `available` to `in_use` while holding
//! the device's reservation lock. The lock is a plain TTL flag taken with a
//! single set-if-absent: no holder identity, no waiting. Release runs under
//! the same lock so it cannot interleave with a reservation of the same
//! device.
//!
//! ```text
//! reserve:  check ─▶ lock ─▶ re-check ─▶ port ─▶ server ─▶ session ─▶ record
//!                      │                             │         │
//!                      │                             └─ fail ──┴─▶ server back
//!                      └──────────── unlock on every exit ─────────────────┘
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use device_pool_core::DeviceId;
use device_pool_store::{keys, Device, DeviceStatus, Store};

use crate::error::{PoolError, Result};
use crate::lifecycle::ensure_status;
use crate::pool::ServerPool;
use crate::ports::PortAllocator;
use crate::registry::Registry;
use crate::session_client::{SessionController, SessionTarget};
use crate::types::Reservation;

/// Per-device mutual exclusion backed by a TTL key.
pub struct ReservationLock<S> {
    store: Arc<S>,
    ttl: Duration,
}

impl<S: Store> ReservationLock<S> {
    /// Create a lock helper with the given TTL.
    #[must_use]
    pub const fn new(store: Arc<S>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Try once to take the lock. Returns `true` if this call took it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    pub async fn try_acquire(&self, device_id: &DeviceId) -> Result<bool> {
        Ok(self
            .store
            .set_if_absent(&keys::reservation_lock_key(device_id), "1", self.ttl)
            .await?)
    }

    /// Drop the lock. Failures are logged; the TTL bounds how long a lock
    /// that could not be deleted lingers.
    pub async fn release(&self, device_id: &DeviceId) {
        if let Err(e) = self
            .store
            .delete(&keys::reservation_lock_key(device_id))
            .await
        {
            tracing::warn!(device_id = %device_id, error = %e, "Failed to release reservation lock");
        }
    }

    /// Run `work` while holding the lock, releasing it however `work` ends.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Locked` if the lock is held elsewhere, otherwise
    /// whatever `work` returns.
    pub async fn scoped<T, F>(&self, device_id: &DeviceId, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.try_acquire(device_id).await? {
            return Err(PoolError::Locked(device_id.clone()));
        }
        let result = work.await;
        self.release(device_id).await;
        result
    }
}

/// Reserve and release of devices.
pub struct LeaseManager<S, C> {
    registry: Arc<Registry<S>>,
    ports: PortAllocator<S>,
    servers: Arc<ServerPool<S>>,
    lock: ReservationLock<S>,
    sessions: Arc<C>,
}

impl<S: Store, C: SessionController> LeaseManager<S, C> {
    /// Create a lease manager from its collaborators.
    #[must_use]
    pub const fn new(
        registry: Arc<Registry<S>>,
        ports: PortAllocator<S>,
        servers: Arc<ServerPool<S>>,
        lock: ReservationLock<S>,
        sessions: Arc<C>,
    ) -> Self {
        Self {
            registry,
            ports,
            servers,
            lock,
            sessions,
        }
    }

    /// Reserve a device, opening a driver session on a pooled server.
    ///
    /// On any failure after the server was taken, the server is returned
    /// to the pool and the device status is left unchanged. A port
    /// allocated for the attempt stays assigned to the device.
    ///
    /// # Errors
    ///
    /// - `PoolError::DeviceNotFound` if the device is not registered
    /// - `PoolError::Conflict` if it is not stored as `available`
    /// - `PoolError::Locked` if another reserve or release holds the lock
    /// - `PoolError::RangeExhausted` / `AllocationBusy` from port allocation
    /// - `PoolError::PoolExhausted` if no server is free
    /// - `PoolError::SessionStartFailed` if the session did not start
    pub async fn reserve(
        &self,
        device_id: &DeviceId,
        requested_port: Option<u16>,
    ) -> Result<Reservation> {
        let device = self.registry.get_stored(device_id).await?;
        ensure_status(&device, DeviceStatus::Available)?;

        self.lock
            .scoped(device_id, self.reserve_locked(device_id, requested_port))
            .await
    }

    async fn reserve_locked(
        &self,
        device_id: &DeviceId,
        requested_port: Option<u16>,
    ) -> Result<Reservation> {
        let device = self.registry.get_stored(device_id).await?;
        ensure_status(&device, DeviceStatus::Available)?;

        let device = self.ensure_port(device, requested_port).await?;
        let server = self.servers.acquire().await?;

        let target = SessionTarget {
            device_id,
            platform: device.platform,
            platform_version: &device.version,
            wda_local_port: device.wda_local_port,
        };
        let session_id = match self.sessions.start_session(&server, target).await {
            Ok(session_id) => session_id,
            Err(e) => {
                tracing::error!(
                    device_id = %device_id,
                    server = %server,
                    error = %e,
                    "Session start failed, returning server"
                );
                self.servers.release(&server).await?;
                return Err(match e {
                    PoolError::SessionStartFailed(_) => e,
                    other => PoolError::SessionStartFailed(other.to_string()),
                });
            }
        };

        let leased = match self
            .registry
            .record_lease(&device, session_id.clone(), server.clone())
            .await
        {
            Ok(leased) => leased,
            Err(e) => {
                if let Err(stop) = self.sessions.stop_session(&server, &session_id).await {
                    tracing::warn!(session_id = %session_id, error = %stop, "Failed to stop orphaned session");
                }
                self.servers.release(&server).await?;
                return Err(e);
            }
        };

        tracing::info!(
            device_id = %device_id,
            session_id = %session_id,
            server = %server,
            wda_local_port = ?leased.wda_local_port,
            "Device reserved"
        );

        Ok(Reservation {
            device_id: leased.device_id,
            session_id,
            wda_local_port: leased.wda_local_port,
            appium_server: server,
        })
    }

    /// Give an iOS device a port: the requested one, else its assigned one,
    /// else a freshly allocated one. The chosen port is marked used.
    async fn ensure_port(&self, device: Device, requested_port: Option<u16>) -> Result<Device> {
        if !device.platform.needs_port() {
            return Ok(device);
        }

        let port = match requested_port.or(device.wda_local_port) {
            Some(port) => port,
            None => self.ports.allocate().await?,
        };
        self.registry.assign_port(&device, port).await
    }

    /// Release a reserved device, stopping its session.
    ///
    /// A session that cannot be stopped is logged and otherwise ignored;
    /// the device and server are freed regardless.
    ///
    /// # Errors
    ///
    /// - `PoolError::DeviceNotFound` if the device is not registered
    /// - `PoolError::Conflict` if it is not stored as `in_use`
    /// - `PoolError::Locked` if another reserve or release holds the lock
    pub async fn release(&self, device_id: &DeviceId, reason: Option<&str>) -> Result<Device> {
        let device = self.registry.get_stored(device_id).await?;
        ensure_status(&device, DeviceStatus::InUse)?;

        self.lock
            .scoped(device_id, self.release_locked(device_id, reason))
            .await
    }

    async fn release_locked(&self, device_id: &DeviceId, reason: Option<&str>) -> Result<Device> {
        let device = self.registry.get_stored(device_id).await?;
        ensure_status(&device, DeviceStatus::InUse)?;

        if let (Some(server), Some(session_id)) = (&device.appium_server, &device.current_session) {
            if let Err(e) = self.sessions.stop_session(server, session_id).await {
                tracing::warn!(
                    device_id = %device_id,
                    session_id = %session_id,
                    error = %e,
                    "Failed to stop session, releasing anyway"
                );
            }
        }
        if let Some(server) = &device.appium_server {
            self.servers.release(server).await?;
        }

        let released = self.registry.clear_lease(&device).await?;
        tracing::info!(device_id = %device_id, reason = ?reason, "Device released");
        Ok(released)
    }

    /// The per-device reservation lock.
    #[must_use]
    pub const fn lock(&self) -> &ReservationLock<S> {
        &self.lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_pool_store::RocksStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn scoped_lock_is_released_on_error() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let lock = ReservationLock::new(Arc::clone(&store), Duration::from_secs(60));
        let id = DeviceId::new("d1").unwrap();

        let result: Result<()> = lock
            .scoped(&id, async { Err(PoolError::PoolExhausted) })
            .await;
        assert!(matches!(result, Err(PoolError::PoolExhausted)));
        assert!(lock.try_acquire(&id).await.unwrap());
    }

    #[tokio::test]
    async fn scoped_lock_reports_contention() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let lock = ReservationLock::new(Arc::clone(&store), Duration::from_secs(60));
        let id = DeviceId::new("d1").unwrap();

        assert!(lock.try_acquire(&id).await.unwrap());
        let result = lock.scoped(&id, async { Ok(()) }).await;
        assert!(matches!(result, Err(PoolError::Locked(_))));

        // The failed attempt must not have dropped the holder's lock
        assert!(!lock.try_acquire(&id).await.unwrap());
    }

    #[tokio::test]
    async fn lock_expires_when_holder_vanishes() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let lock = ReservationLock::new(Arc::clone(&store), Duration::from_millis(80));
        let id = DeviceId::new("d1").unwrap();

        assert!(lock.try_acquire(&id).await.unwrap());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(lock.try_acquire(&id).await.unwrap());
    }
}
