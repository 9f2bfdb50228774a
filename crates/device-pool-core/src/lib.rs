//! Core types for the device pool.
//!
//! This crate provides the identifier types shared by every other crate:
//!
//! - **`DeviceId`**: opaque, non-empty device identity
//! - **`ServerEndpoint`**: normalized driver-server URL
//!
//! # Example
//!
//! ```
//! use device_pool_core::{DeviceId, ServerEndpoint};
//!
//! let device = DeviceId::new("emulator-5554").unwrap();
//! let server = ServerEndpoint::new("http://localhost:4723/wd/hub/").unwrap();
//!
//! assert_eq!(device.as_str(), "emulator-5554");
//! assert_eq!(server.as_str(), "http://localhost:4723/wd/hub");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;

pub use ids::{DeviceId, IdError, ServerEndpoint};
