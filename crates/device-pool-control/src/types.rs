//! Request and response types for device pool operations.
//!
//! These types define the API contracts for registration, leasing and pool
//! inspection.

use std::time::Duration;

use device_pool_core::{DeviceId, ServerEndpoint};
use device_pool_store::{DeviceStatus, Platform};
use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};

/// Tunables of the leasing engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// How long a reservation lock may be held before it expires.
    pub reserve_lock_ttl: Duration,
    /// How long a heartbeat keeps a device alive.
    pub heartbeat_ttl: Duration,
    /// First WDA local port handed out (inclusive).
    pub wda_port_start: u16,
    /// Last WDA local port handed out (inclusive).
    pub wda_port_end: u16,
    /// TTL of the coarse lock serializing port range scans.
    pub port_lock_ttl: Duration,
    /// Delay between attempts to take the port lock.
    pub port_retry_delay: Duration,
    /// The configured driver-server universe.
    pub servers: Vec<ServerEndpoint>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            reserve_lock_ttl: Duration::from_secs(60),
            heartbeat_ttl: Duration::from_secs(120),
            wda_port_start: 8100,
            wda_port_end: 8199,
            port_lock_ttl: Duration::from_secs(5),
            port_retry_delay: Duration::from_millis(100),
            servers: Vec::new(),
        }
    }
}

impl PoolConfig {
    /// Check that the configuration can drive a pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.wda_port_start > self.wda_port_end {
            return Err(PoolError::Config(format!(
                "port range start {} is after end {}",
                self.wda_port_start, self.wda_port_end
            )));
        }
        for (name, ttl) in [
            ("reserve lock TTL", self.reserve_lock_ttl),
            ("heartbeat TTL", self.heartbeat_ttl),
            ("port lock TTL", self.port_lock_ttl),
        ] {
            if ttl.is_zero() {
                return Err(PoolError::Config(format!("{name} must be positive")));
            }
        }
        if self.port_retry_delay.is_zero() {
            return Err(PoolError::Config("port retry delay must be positive".into()));
        }
        Ok(())
    }
}

/// Request to register (or re-register) a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDevice {
    /// Unique device identifier.
    pub device_id: DeviceId,
    /// Mobile platform.
    pub platform: Platform,
    /// Platform version.
    pub version: String,
    /// Free-text location.
    #[serde(default)]
    pub location: Option<String>,
    /// Initial status. Only `available` and `offline` are accepted.
    #[serde(default = "RegisterDevice::default_status")]
    pub status: DeviceStatus,
    /// Pre-assigned WDA local port (iOS only).
    #[serde(default)]
    pub wda_local_port: Option<u16>,
}

impl RegisterDevice {
    /// Create a registration for an available device.
    #[must_use]
    pub fn new(device_id: DeviceId, platform: Platform, version: impl Into<String>) -> Self {
        Self {
            device_id,
            platform,
            version: version.into(),
            location: None,
            status: Self::default_status(),
            wda_local_port: None,
        }
    }

    /// Set the pre-assigned port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.wda_local_port = Some(port);
        self
    }

    /// Set the initial status.
    #[must_use]
    pub const fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = status;
        self
    }

    const fn default_status() -> DeviceStatus {
        DeviceStatus::Available
    }
}

/// Request to reserve a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveRequest {
    /// The device to reserve.
    pub device_id: DeviceId,
    /// Caller-supplied test identifier, only logged.
    #[serde(default)]
    pub test_id: Option<String>,
    /// Port to use instead of the assigned or allocated one (iOS only).
    #[serde(default)]
    pub wda_local_port: Option<u16>,
}

impl ReserveRequest {
    /// Reserve a device with no port preference.
    #[must_use]
    pub const fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            test_id: None,
            wda_local_port: None,
        }
    }
}

/// Optional release details.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseRequest {
    /// Why the device is being released, only logged.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Filters for listing devices. Absent filters match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFilter {
    /// Only devices in this (stored) status.
    #[serde(default)]
    pub status: Option<DeviceStatus>,
    /// Only devices on this platform.
    #[serde(default)]
    pub platform: Option<Platform>,
}

/// A successful reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// The reserved device.
    pub device_id: DeviceId,
    /// Driver session holding the device.
    pub session_id: String,
    /// WDA local port in use (iOS only).
    pub wda_local_port: Option<u16>,
    /// Driver server the session runs on.
    pub appium_server: ServerEndpoint,
}

/// Snapshot of the driver-server pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPoolStatus {
    /// The configured universe.
    pub configured: Vec<ServerEndpoint>,
    /// Servers free to be handed out.
    pub available: Vec<String>,
    /// Servers backing a session.
    pub in_use: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.wda_port_start, 8100);
        assert_eq!(config.wda_port_end, 8199);
    }

    #[test]
    fn inverted_port_range_is_rejected() {
        let config = PoolConfig {
            wda_port_start: 9000,
            wda_port_end: 8000,
            ..PoolConfig::default()
        };
        assert!(matches!(config.validate(), Err(PoolError::Config(_))));
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let config = PoolConfig {
            heartbeat_ttl: Duration::ZERO,
            ..PoolConfig::default()
        };
        assert!(matches!(config.validate(), Err(PoolError::Config(_))));
    }

    #[test]
    fn register_defaults_to_available() {
        let req: RegisterDevice = serde_json::from_str(
            r#"{"device_id":"emulator-5554","platform":"android","version":"13"}"#,
        )
        .unwrap();
        assert_eq!(req.status, DeviceStatus::Available);
        assert!(req.location.is_none());
        assert!(req.wda_local_port.is_none());
    }

    #[test]
    fn register_rejects_blank_id() {
        let result: std::result::Result<RegisterDevice, _> =
            serde_json::from_str(r#"{"device_id":"  ","platform":"ios","version":"17"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn register_rejects_unknown_platform() {
        let result: std::result::Result<RegisterDevice, _> =
            serde_json::from_str(r#"{"device_id":"d1","platform":"windows","version":"11"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn filter_from_query_fields() {
        let filter: DeviceFilter =
            serde_json::from_str(r#"{"status":"in_use","platform":"ios"}"#).unwrap();
        assert_eq!(filter.status, Some(DeviceStatus::InUse));
        assert_eq!(filter.platform, Some(Platform::Ios));
    }
}
