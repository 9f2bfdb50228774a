//! Device status lifecycle.
//!
//! This module defines the valid stored-status transitions and the
//! read-time liveness derivation.
//!
//! # State Machine
//!
//! ```text
//!              reserve (lock held)
//!   ┌───────────┐ ────────────────▶ ┌──────────┐
//!   │ available │                   │  in_use  │
//!   └───────────┘ ◀──────────────── └──────────┘
//!     ▲      │     release (lock held)
//!     │      │ register(status=offline)
//!     │      ▼
//!   ┌───────────┐
//!   │  offline  │  left only by a heartbeat
//!   └───────────┘
//! ```
//!
//! A missing heartbeat never writes `offline`; it only changes what readers
//! see (see [`reported_status`]). Keeping the demotion derived means the
//! heartbeat promotion and the liveness view can never fight over the
//! stored value.

use device_pool_core::DeviceId;
use device_pool_store::{Device, DeviceStatus};

use crate::error::{PoolError, Result};

/// Validates a stored-status transition and returns the target if valid.
///
/// # Errors
///
/// Returns `PoolError::InvalidTransition` if the transition is not allowed.
pub fn validate_transition(
    device_id: &DeviceId,
    from: DeviceStatus,
    to: DeviceStatus,
) -> Result<DeviceStatus> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(PoolError::InvalidTransition {
            device_id: device_id.clone(),
            from,
            to,
        })
    }
}

/// Check if a stored-status transition is valid.
#[must_use]
pub const fn is_valid_transition(from: DeviceStatus, to: DeviceStatus) -> bool {
    use DeviceStatus::{Available, InUse, Offline};

    matches!(
        (from, to),
        (Available, InUse | Offline) | (InUse | Offline, Available)
    )
}

/// Require the device's stored status to be `required`.
///
/// # Errors
///
/// Returns `PoolError::Conflict` carrying the actual status otherwise.
pub fn ensure_status(device: &Device, required: DeviceStatus) -> Result<()> {
    if device.status == required {
        Ok(())
    } else {
        Err(PoolError::Conflict {
            device_id: device.device_id.clone(),
            actual: device.status,
            required,
        })
    }
}

/// The status a reader sees, given the stored status and heartbeat presence.
#[must_use]
pub const fn reported_status(stored: DeviceStatus, heartbeat_alive: bool) -> DeviceStatus {
    match stored {
        DeviceStatus::Available if !heartbeat_alive => DeviceStatus::Offline,
        other => other,
    }
}
