//! HTTP gateway for the device pool.
//!
//! This crate exposes the leasing engine as a JSON API:
//!
//! - device registration, lookup and filtered listing
//! - reserve / release of devices with Appium session setup
//! - device heartbeats
//! - Appium server pool status and store readiness
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Test runners / device agents                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ HTTP
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   device-pool-gateway                        │
//! │         Router + Handlers  ──▶  ApiError mapping             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                  ┌───────────────────────┐
//!                  │  DevicePool (control) │
//!                  └───────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use device_pool_control::{DevicePoolService, NoopSessionController, PoolConfig};
//! use device_pool_gateway::{create_router, GatewayConfig, GatewayState};
//! use device_pool_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/device-pool")?);
//! let sessions = Arc::new(NoopSessionController::new());
//! let pool = DevicePoolService::connect(store, sessions, PoolConfig::default()).await?;
//!
//! let state = GatewayState::new(Arc::new(pool), GatewayConfig::default());
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::GatewayState;
