//! Key layout of the shared store.
//!
//! Every process talking to the same store must agree on these names; they
//! are the wire contract between uncoordinated callers.
//!
//! | Key | Kind | Contents |
//! |-----|------|----------|
//! | `device:{id}` | hash | device record |
//! | `idx:status:{status}` | set | device ids with that status |
//! | `idx:platform:{platform}` | set | device ids on that platform |
//! | `lock:device:{id}` | string, TTL | reservation in progress |
//! | `hb:device:{id}` | string, TTL | client heartbeat |
//! | `used:wdalocal` | set | WDA ports in use |
//! | `lock:wdapool` | string, TTL | port range scan in progress |
//! | `appium:servers:available` | set | idle driver servers |
//! | `appium:servers:in_use` | set | busy driver servers |

use device_pool_core::DeviceId;

use crate::types::{DeviceStatus, Platform};

/// Global set of WDA local ports currently in use.
pub const USED_PORTS: &str = "used:wdalocal";

/// Coarse lock serializing port range scans.
pub const PORT_ALLOCATION_LOCK: &str = "lock:wdapool";

/// Driver servers free to be handed out.
pub const SERVERS_AVAILABLE: &str = "appium:servers:available";

/// Driver servers currently backing a session.
pub const SERVERS_IN_USE: &str = "appium:servers:in_use";

/// Encode a device record key.
#[must_use]
pub fn device_key(device_id: &DeviceId) -> String {
    format!("device:{device_id}")
}

/// Encode a status index key.
#[must_use]
pub fn status_index_key(status: DeviceStatus) -> String {
    format!("idx:status:{}", status.as_str())
}

/// Encode a platform index key.
#[must_use]
pub fn platform_index_key(platform: Platform) -> String {
    format!("idx:platform:{}", platform.as_str())
}

/// Encode the per-device reservation lock key.
#[must_use]
pub fn reservation_lock_key(device_id: &DeviceId) -> String {
    format!("lock:device:{device_id}")
}

/// Encode the per-device heartbeat key.
#[must_use]
pub fn heartbeat_key(device_id: &DeviceId) -> String {
    format!("hb:device:{device_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_scoped_keys() {
        let id = DeviceId::new("emulator-5554").unwrap();
        assert_eq!(device_key(&id), "device:emulator-5554");
        assert_eq!(reservation_lock_key(&id), "lock:device:emulator-5554");
        assert_eq!(heartbeat_key(&id), "hb:device:emulator-5554");
    }

    #[test]
    fn index_keys() {
        assert_eq!(status_index_key(DeviceStatus::InUse), "idx:status:in_use");
        assert_eq!(platform_index_key(Platform::Ios), "idx:platform:ios");
    }
}
