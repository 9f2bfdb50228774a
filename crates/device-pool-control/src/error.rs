//! Error types for the device pool.
//!
//! This module defines every failure a pool operation can surface. Each
//! variant maps to one HTTP status so the request layer stays a thin
//! translation.

use device_pool_core::DeviceId;
use device_pool_store::{DeviceStatus, StoreError};
use thiserror::Error;

/// A result type using `PoolError`.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors that can occur in device pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The requested device is not registered.
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    /// The device is not in the status the operation requires.
    #[error("device {device_id} is {actual}, expected {required}")]
    Conflict {
        /// The device being operated on.
        device_id: DeviceId,
        /// Its stored status.
        actual: DeviceStatus,
        /// The status the operation needs.
        required: DeviceStatus,
    },

    /// The requested status transition is not part of the lifecycle.
    #[error("invalid status transition for device {device_id}: cannot move from {from} to {to}")]
    InvalidTransition {
        /// The device being transitioned.
        device_id: DeviceId,
        /// The current status.
        from: DeviceStatus,
        /// The requested status.
        to: DeviceStatus,
    },

    /// Another reservation or release of the device is in progress.
    #[error("device {0} is being reserved or released by another process")]
    Locked(DeviceId),

    /// The port allocation lock stayed busy for longer than its own TTL.
    #[error("port allocation lock is busy")]
    AllocationBusy,

    /// No driver server is available.
    #[error("no available Appium servers")]
    PoolExhausted,

    /// Every port in the configured range is in use.
    #[error("no free wdaLocalPort in range {start}-{end}")]
    RangeExhausted {
        /// First port of the range.
        start: u16,
        /// Last port of the range (inclusive).
        end: u16,
    },

    /// The driver server did not start a session.
    #[error("failed to start Appium session: {0}")]
    SessionStartFailed(String),

    /// The driver server did not stop a session.
    #[error("failed to stop Appium session: {0}")]
    SessionStopFailed(String),

    /// The registration payload is not acceptable.
    #[error("invalid device: {0}")]
    InvalidDevice(String),

    /// The pool configuration is not usable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The shared store could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(StoreError),

    /// A detached pool task panicked or was aborted.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for PoolError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            other => Self::Store(other),
        }
    }
}

impl PoolError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::DeviceNotFound(_) => 404,
            Self::InvalidDevice(_) => 400,
            Self::Conflict { .. } | Self::InvalidTransition { .. } => 409,
            Self::Locked(_) | Self::AllocationBusy => 423,
            Self::PoolExhausted | Self::RangeExhausted { .. } | Self::StoreUnavailable(_) => 503,
            Self::SessionStartFailed(_) | Self::SessionStopFailed(_) => 502,
            Self::Config(_) | Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Locked(_)
                | Self::AllocationBusy
                | Self::PoolExhausted
                | Self::StoreUnavailable(_)
                | Self::SessionStartFailed(_)
        )
    }
}
