//! Leasing engine for the device pool.
//!
//! This crate provides the business logic for sharing mobile test devices
//! and Appium servers between uncoordinated client processes. There is no
//! in-process coordinator: mutual exclusion and crash recovery rest on the
//! store's atomic primitives and on TTL expiry.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Gateway (HTTP)                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    DevicePoolService                         │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐   │
//! │  │  Registry   │ │   Lease     │ │  Ports / Servers    │   │
//! │  │ + Liveness  │ │  Manager    │ │  allocators         │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!        ┌──────────────┐             ┌──────────────┐
//!        │    Store     │             │   Appium     │
//!        │(Redis/Rocks) │             │   servers    │
//!        └──────────────┘             └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use device_pool_control::{
//!     DevicePool, DevicePoolService, NoopSessionController, PoolConfig, RegisterDevice,
//!     ReserveRequest,
//! };
//! use device_pool_core::{DeviceId, ServerEndpoint};
//! use device_pool_store::{Platform, RedisStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RedisStore::connect("redis://localhost:6379/0").await?);
//! let config = PoolConfig {
//!     servers: ServerEndpoint::parse_list("http://localhost:4723"),
//!     ..PoolConfig::default()
//! };
//! let pool = DevicePoolService::connect(store, Arc::new(NoopSessionController::new()), config)
//!     .await?;
//!
//! let device_id = DeviceId::new("emulator-5554")?;
//! pool.register_device(RegisterDevice::new(device_id.clone(), Platform::Android, "13"))
//!     .await?;
//! let reservation = pool.reserve_device(ReserveRequest::new(device_id)).await?;
//!
//! println!("Session {} on {}", reservation.session_id, reservation.appium_server);
//! # Ok(())
//! # }
//! ```
//!
//! See the [`lifecycle`] module for the status state machine and the
//! [`lease`] module for the reservation protocol.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod lease;
pub mod lifecycle;
pub mod liveness;
pub mod pool;
pub mod ports;
pub mod registry;
pub mod service;
pub mod session_client;
pub mod types;

pub use error::{PoolError, Result};
pub use service::{DevicePool, DevicePoolService};
pub use session_client::{
    HttpSessionController, NoopSessionController, SessionController, SessionTarget,
};
pub use types::{
    DeviceFilter, PoolConfig, RegisterDevice, ReleaseRequest, Reservation, ReserveRequest,
    ServerPoolStatus,
};

// Re-export commonly used types from dependencies for convenience
pub use device_pool_core::{DeviceId, ServerEndpoint};
pub use device_pool_store::{Device, DeviceStatus, Platform};
