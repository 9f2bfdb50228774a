//! Domain types stored in the shared store.
//!
//! A device is persisted as a hash of named string fields, so this module
//! also owns the conversion between [`Device`] and that field map.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use device_pool_core::{DeviceId, ServerEndpoint};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// A device record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Unique identifier for the device.
    pub device_id: DeviceId,
    /// Mobile platform.
    pub platform: Platform,
    /// Platform (OS) version, e.g. `"13"` or `"17.4"`.
    pub version: String,
    /// Free-text physical location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Lifecycle status.
    pub status: DeviceStatus,
    /// Driver session holding the device. Set iff `status` is `in_use`.
    #[serde(default)]
    pub current_session: Option<String>,
    /// WebDriverAgent local port. Only meaningful for iOS devices.
    #[serde(default)]
    pub wda_local_port: Option<u16>,
    /// Driver server the current session runs on. Set iff `status` is `in_use`.
    #[serde(default)]
    pub appium_server: Option<ServerEndpoint>,
    /// Last modification time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Create a fresh, available device with no lease or port.
    #[must_use]
    pub fn new(device_id: DeviceId, platform: Platform, version: impl Into<String>) -> Self {
        Self {
            device_id,
            platform,
            version: version.into(),
            location: None,
            status: DeviceStatus::Available,
            current_session: None,
            wda_local_port: None,
            appium_server: None,
            updated_at: None,
        }
    }

    /// Returns true if the session/server pair is consistent with the status.
    #[must_use]
    pub fn lease_is_consistent(&self) -> bool {
        match self.status {
            DeviceStatus::InUse => self.current_session.is_some() && self.appium_server.is_some(),
            DeviceStatus::Available | DeviceStatus::Offline => {
                self.current_session.is_none() && self.appium_server.is_none()
            }
        }
    }

    /// Encode the record as hash fields.
    ///
    /// Absent optional values are written as empty strings so that an
    /// overwrite always clears them.
    #[must_use]
    pub fn to_fields(&self, now: DateTime<Utc>) -> Vec<(String, String)> {
        vec![
            (field::DEVICE_ID.into(), self.device_id.to_string()),
            (field::PLATFORM.into(), self.platform.as_str().into()),
            (field::VERSION.into(), self.version.clone()),
            (
                field::LOCATION.into(),
                self.location.clone().unwrap_or_default(),
            ),
            (field::STATUS.into(), self.status.as_str().into()),
            (
                field::CURRENT_SESSION.into(),
                self.current_session.clone().unwrap_or_default(),
            ),
            (
                field::WDA_LOCAL_PORT.into(),
                self.wda_local_port.map(|p| p.to_string()).unwrap_or_default(),
            ),
            (
                field::APPIUM_SERVER.into(),
                self.appium_server
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            ),
            (field::UPDATED_AT.into(), now.timestamp().to_string()),
        ]
    }

    /// Decode a record from hash fields.
    ///
    /// Returns `Ok(None)` for an empty hash (the key does not exist). An
    /// unparseable port is treated as unassigned rather than as corruption.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Corrupt` if a required field is missing or invalid.
    pub fn from_fields(key: &str, fields: &HashMap<String, String>) -> Result<Option<Self>> {
        if fields.is_empty() {
            return Ok(None);
        }

        let corrupt = |reason: String| StoreError::Corrupt {
            key: key.to_string(),
            reason,
        };
        let required = |name: &str| {
            fields
                .get(name)
                .map(String::as_str)
                .ok_or_else(|| corrupt(format!("missing field {name}")))
        };
        let optional = |name: &str| {
            fields
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(ToString::to_string)
        };

        let device_id = DeviceId::new(required(field::DEVICE_ID)?)
            .map_err(|e| corrupt(e.to_string()))?;
        let platform = required(field::PLATFORM)?
            .parse()
            .map_err(|e: ParseEnumError| corrupt(e.to_string()))?;
        let status = required(field::STATUS)?
            .parse()
            .map_err(|e: ParseEnumError| corrupt(e.to_string()))?;
        let appium_server = optional(field::APPIUM_SERVER)
            .map(ServerEndpoint::new)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;
        let updated_at = optional(field::UPDATED_AT)
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

        Ok(Some(Self {
            device_id,
            platform,
            version: fields.get(field::VERSION).cloned().unwrap_or_default(),
            location: optional(field::LOCATION),
            status,
            current_session: optional(field::CURRENT_SESSION),
            wda_local_port: optional(field::WDA_LOCAL_PORT).and_then(|v| v.parse().ok()),
            appium_server,
            updated_at,
        }))
    }
}

/// Field names of the device hash.
pub mod field {
    /// Device identifier.
    pub const DEVICE_ID: &str = "device_id";
    /// Platform name.
    pub const PLATFORM: &str = "platform";
    /// Platform version.
    pub const VERSION: &str = "version";
    /// Free-text location.
    pub const LOCATION: &str = "location";
    /// Lifecycle status.
    pub const STATUS: &str = "status";
    /// Current driver session.
    pub const CURRENT_SESSION: &str = "current_session";
    /// iOS WebDriverAgent local port.
    pub const WDA_LOCAL_PORT: &str = "wda_local_port";
    /// Driver server endpoint.
    pub const APPIUM_SERVER: &str = "appium_server";
    /// Last update, unix seconds.
    pub const UPDATED_AT: &str = "updated_at";
}

/// Mobile platform of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Android (UiAutomator2).
    Android,
    /// iOS (XCUITest). Needs a unique WDA local port per session.
    Ios,
}

impl Platform {
    /// All platforms.
    pub const ALL: [Self; 2] = [Self::Android, Self::Ios];

    /// The persisted name of the platform.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Ios => "ios",
        }
    }

    /// Whether sessions on this platform need an allocated local port.
    #[must_use]
    pub const fn needs_port(self) -> bool {
        matches!(self, Self::Ios)
    }

    /// The Appium automation backend for this platform.
    #[must_use]
    pub const fn automation_name(self) -> &'static str {
        match self {
            Self::Android => "UiAutomator2",
            Self::Ios => "XCUITest",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("platform", s))
    }
}

/// Lifecycle status of a device.
///
/// `Offline` is persisted only when a device is registered as offline;
/// a missing heartbeat surfaces as `Offline` at read time without being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Free to be reserved.
    Available,
    /// Reserved by a driver session.
    InUse,
    /// Not reachable.
    Offline,
}

impl DeviceStatus {
    /// All statuses.
    pub const ALL: [Self; 3] = [Self::Available, Self::InUse, Self::Offline];

    /// The persisted name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::InUse => "in_use",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("status", s))
    }
}

/// Error returned when a persisted enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
