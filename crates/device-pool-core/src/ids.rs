//! Core identifier types for the device pool.
//!
//! Devices and driver servers live in independent identity spaces. Both are
//! string-keyed, so the newtypes here exist to keep them from being mixed up
//! and to enforce normalization at the boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A device identifier (e.g. an adb serial or an iOS UDID).
///
/// Device IDs are opaque, non-empty strings supplied at registration time.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Parse a `DeviceId`, rejecting empty or whitespace-only input.
    ///
    /// # Errors
    ///
    /// Returns `IdError::Empty` if the identifier is blank.
    pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(IdError::Empty);
        }
        Ok(Self(value))
    }

    /// Return the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A driver (Appium) server endpoint URL.
///
/// Endpoints are normalized on construction: surrounding whitespace and
/// trailing `/` separators are stripped, so `http://host:4723/wd/hub/` and
/// `http://host:4723/wd/hub` name the same pool member.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerEndpoint(String);

impl ServerEndpoint {
    /// Parse and normalize a server endpoint.
    ///
    /// # Errors
    ///
    /// Returns `IdError::Empty` if nothing remains after normalization.
    pub fn new(value: impl AsRef<str>) -> Result<Self, IdError> {
        let normalized = value.as_ref().trim().trim_end_matches('/');
        if normalized.is_empty() {
            return Err(IdError::Empty);
        }
        Ok(Self(normalized.to_string()))
    }

    /// Parse a configured server list.
    ///
    /// Accepts a single endpoint or a comma-separated list. Blank entries are
    /// skipped and duplicates (after normalization) collapse into the first
    /// occurrence, so configuration order is preserved.
    #[must_use]
    pub fn parse_list(value: &str) -> Vec<Self> {
        let mut out: Vec<Self> = Vec::new();
        for endpoint in value.split(',').filter_map(|s| Self::new(s).ok()) {
            if !out.contains(&endpoint) {
                out.push(endpoint);
            }
        }
        out
    }

    /// Return the endpoint as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerEndpoint({})", self.0)
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServerEndpoint {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ServerEndpoint {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServerEndpoint> for String {
    fn from(endpoint: ServerEndpoint) -> Self {
        endpoint.0
    }
}

impl AsRef<str> for ServerEndpoint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The identifier is empty or blank.
    #[error("identifier must not be empty")]
    Empty,
}
