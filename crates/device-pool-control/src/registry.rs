//! Device registry.
//!
//! The registry owns device records and their indexes. Every mutation that
//! touches more than one key (a record and its status index, a lease and
//! its port marker) is written as a single [`Batch`], so the store never
//! exposes a half-applied transition.
//!
//! Nothing is cached: every read goes to the store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use device_pool_core::{DeviceId, ServerEndpoint};
use device_pool_store::{keys, Batch, Device, DeviceStatus, Platform, Store};

use crate::error::{PoolError, Result};
use crate::lifecycle::{reported_status, validate_transition};
use crate::liveness::Liveness;
use crate::ports;
use crate::types::{DeviceFilter, RegisterDevice};

/// Add `device_id` to the `to` status index and remove it from every other.
///
/// Removing from all other sets instead of just the previous one means a
/// drifted index is healed by the next transition.
fn move_status(batch: &mut Batch, device_id: &DeviceId, to: DeviceStatus) {
    for status in DeviceStatus::ALL {
        let key = keys::status_index_key(status);
        if status == to {
            batch.set_add(key, device_id);
        } else {
            batch.set_remove(key, device_id);
        }
    }
}

/// Stage a full overwrite of the device record.
fn write_record(batch: &mut Batch, device: &mut Device) {
    let now = Utc::now();
    batch.hash_set(keys::device_key(&device.device_id), device.to_fields(now));
    device.updated_at = Some(now);
}

/// Device records and their status and platform indexes.
pub struct Registry<S> {
    store: Arc<S>,
    liveness: Liveness<S>,
}

impl<S: Store> Registry<S> {
    /// Create a registry over `store`.
    #[must_use]
    pub fn new(store: Arc<S>, heartbeat_ttl: Duration) -> Self {
        let liveness = Liveness::new(Arc::clone(&store), heartbeat_ttl);
        Self { store, liveness }
    }

    /// The heartbeat leases backing the derived `offline` status.
    #[must_use]
    pub const fn liveness(&self) -> &Liveness<S> {
        &self.liveness
    }

    /// Register a device, or update a registered one.
    ///
    /// Registration is an upsert: the record is overwritten (last write
    /// wins) and the device is moved to the requested status index. A device
    /// that is currently leased keeps its lease and port; only its
    /// descriptive fields are updated.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidDevice` if the device is registered as
    /// `in_use`, or an error if the store operation fails.
    pub async fn register(&self, request: RegisterDevice) -> Result<Device> {
        if request.status == DeviceStatus::InUse {
            return Err(PoolError::InvalidDevice(
                "devices cannot be registered as in_use".into(),
            ));
        }

        let existing = self.load(&request.device_id).await?;
        let port = request
            .wda_local_port
            .filter(|_| request.platform.needs_port());

        let mut batch = Batch::new();
        let mut device = match existing {
            Some(current) if current.status == DeviceStatus::InUse => {
                tracing::info!(
                    device_id = %current.device_id,
                    "Device is leased, updating metadata only"
                );
                Device {
                    platform: request.platform,
                    version: request.version,
                    location: request.location,
                    ..current
                }
            }
            previous => {
                let previous_port = previous.and_then(|d| d.wda_local_port);
                if let Some(old) = previous_port.filter(|old| Some(*old) != port) {
                    ports::mark_free(&mut batch, old);
                }
                if let Some(port) = port {
                    ports::mark_used(&mut batch, port);
                }
                Device {
                    location: request.location,
                    status: request.status,
                    wda_local_port: port,
                    ..Device::new(request.device_id, request.platform, request.version)
                }
            }
        };

        write_record(&mut batch, &mut device);
        for platform in Platform::ALL {
            let key = keys::platform_index_key(platform);
            if platform == device.platform {
                batch.set_add(key, &device.device_id);
            } else {
                batch.set_remove(key, &device.device_id);
            }
        }
        move_status(&mut batch, &device.device_id, device.status);
        self.store.execute(batch).await?;

        tracing::info!(
            device_id = %device.device_id,
            platform = %device.platform,
            status = %device.status,
            "Device registered"
        );
        Ok(device)
    }

    async fn load(&self, device_id: &DeviceId) -> Result<Option<Device>> {
        let key = keys::device_key(device_id);
        let fields = self.store.hash_get_all(&key).await?;
        Ok(Device::from_fields(&key, &fields)?)
    }

    /// Get a device exactly as stored.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::DeviceNotFound` if the device is not registered.
    pub async fn get_stored(&self, device_id: &DeviceId) -> Result<Device> {
        self.load(device_id)
            .await?
            .ok_or_else(|| PoolError::DeviceNotFound(device_id.clone()))
    }

    /// Get a device as callers see it.
    ///
    /// A device stored as `available` without a live heartbeat is reported
    /// as `offline`. The stored record is not modified.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::DeviceNotFound` if the device is not registered.
    pub async fn get(&self, device_id: &DeviceId) -> Result<Device> {
        let mut device = self.get_stored(device_id).await?;
        if device.status == DeviceStatus::Available {
            let alive = self.liveness.is_alive(device_id).await?;
            device.status = reported_status(device.status, alive);
        }
        Ok(device)
    }

    /// List devices matching `filter`, ordered by identifier.
    ///
    /// The status filter selects on the stored status index; each match is
    /// then reported as [`get`](Self::get) would report it. Index entries
    /// without a record are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    pub async fn list(&self, filter: DeviceFilter) -> Result<Vec<Device>> {
        let mut ids = match filter.status {
            Some(status) => {
                self.store
                    .set_members(&keys::status_index_key(status))
                    .await?
            }
            None => {
                let mut all = BTreeSet::new();
                for status in DeviceStatus::ALL {
                    all.extend(
                        self.store
                            .set_members(&keys::status_index_key(status))
                            .await?,
                    );
                }
                all
            }
        };

        if let Some(platform) = filter.platform {
            let on_platform = self
                .store
                .set_members(&keys::platform_index_key(platform))
                .await?;
            ids.retain(|id| on_platform.contains(id));
        }

        let mut devices = Vec::with_capacity(ids.len());
        for id in ids {
            let Ok(device_id) = DeviceId::new(id) else {
                continue;
            };
            match self.get(&device_id).await {
                Ok(device) => devices.push(device),
                Err(PoolError::DeviceNotFound(_)) => {
                    tracing::debug!(device_id = %device_id, "Index entry without record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(devices)
    }

    /// Move a device to a new stored status.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::DeviceNotFound` if the device is not registered, or
    /// `PoolError::InvalidTransition` if the lifecycle forbids the move.
    pub async fn transition_status(&self, device_id: &DeviceId, to: DeviceStatus) -> Result<Device> {
        let mut device = self.get_stored(device_id).await?;
        device.status = validate_transition(device_id, device.status, to)?;

        let mut batch = Batch::new();
        write_record(&mut batch, &mut device);
        move_status(&mut batch, device_id, to);
        self.store.execute(batch).await?;

        tracing::info!(device_id = %device_id, status = %to, "Device status changed");
        Ok(device)
    }

    /// Record a new port assignment on the device and mark it used.
    ///
    /// A different previously assigned port has its marker freed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    pub async fn assign_port(&self, device: &Device, port: u16) -> Result<Device> {
        let mut updated = device.clone();
        updated.wda_local_port = Some(port);

        let mut batch = Batch::new();
        if let Some(old) = device.wda_local_port.filter(|old| *old != port) {
            ports::mark_free(&mut batch, old);
        }
        ports::mark_used(&mut batch, port);
        write_record(&mut batch, &mut updated);
        self.store.execute(batch).await?;

        tracing::debug!(device_id = %device.device_id, port, "Assigned WDA local port");
        Ok(updated)
    }

    /// Mark the device leased by `session_id` on `server`.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidTransition` unless the device is stored as
    /// `available`, or an error if the store operation fails.
    pub async fn record_lease(
        &self,
        device: &Device,
        session_id: String,
        server: ServerEndpoint,
    ) -> Result<Device> {
        let mut updated = device.clone();
        updated.status = validate_transition(&device.device_id, device.status, DeviceStatus::InUse)?;
        updated.current_session = Some(session_id);
        updated.appium_server = Some(server);

        let mut batch = Batch::new();
        write_record(&mut batch, &mut updated);
        move_status(&mut batch, &updated.device_id, DeviceStatus::InUse);
        self.store.execute(batch).await?;

        Ok(updated)
    }

    /// Clear the lease and return the device to `available`.
    ///
    /// The device keeps its port assignment but the port's global marker is
    /// freed.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidTransition` unless the device is stored as
    /// `in_use`, or an error if the store operation fails.
    pub async fn clear_lease(&self, device: &Device) -> Result<Device> {
        let mut updated = device.clone();
        updated.status =
            validate_transition(&device.device_id, device.status, DeviceStatus::Available)?;
        updated.current_session = None;
        updated.appium_server = None;

        let mut batch = Batch::new();
        write_record(&mut batch, &mut updated);
        move_status(&mut batch, &updated.device_id, DeviceStatus::Available);
        if let Some(port) = updated.wda_local_port {
            ports::mark_free(&mut batch, port);
        }
        self.store.execute(batch).await?;

        Ok(updated)
    }

    /// Refresh the device's heartbeat lease.
    ///
    /// A device stored as `offline` is promoted to `available`; this is the
    /// only way out of `offline`.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::DeviceNotFound` if the device is not registered.
    pub async fn heartbeat(&self, device_id: &DeviceId) -> Result<Device> {
        let device = self.get_stored(device_id).await?;
        self.liveness.beat(device_id).await?;

        if device.status == DeviceStatus::Offline {
            tracing::info!(device_id = %device_id, "Heartbeat from offline device");
            return self.promote_offline(device_id).await;
        }
        Ok(device)
    }

    /// Move a device stored as `offline` to `available`. A device that is
    /// no longer `offline` when re-read is returned unchanged, so racing
    /// heartbeats all succeed.
    async fn promote_offline(&self, device_id: &DeviceId) -> Result<Device> {
        let mut device = self.get_stored(device_id).await?;
        if device.status != DeviceStatus::Offline {
            return Ok(device);
        }
        device.status = validate_transition(device_id, device.status, DeviceStatus::Available)?;

        let mut batch = Batch::new();
        write_record(&mut batch, &mut device);
        move_status(&mut batch, device_id, DeviceStatus::Available);
        self.store.execute(batch).await?;

        tracing::info!(device_id = %device_id, "Device back online");
        Ok(device)
    }
}
