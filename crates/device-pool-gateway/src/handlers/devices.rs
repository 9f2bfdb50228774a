//! Device endpoints.
//!
//! This module provides handlers for registration, lookup, leasing and
//! heartbeats.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use device_pool_control::{
    Device, DeviceFilter, DeviceId, DevicePool, RegisterDevice, ReleaseRequest, ReserveRequest,
};

use crate::error::ApiError;
use crate::state::GatewayState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Plain acknowledgement.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Human-readable outcome.
    pub message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Response for a successful reservation.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReserveResponse {
    /// Human-readable outcome.
    pub message: String,
    /// Driver session holding the device.
    pub session_id: String,
    /// WDA local port (iOS only).
    #[serde(rename = "wdaLocalPort")]
    pub wda_local_port: Option<u16>,
    /// Driver server the session runs on.
    #[serde(rename = "appiumServer")]
    pub appium_server: String,
}

/// Heartbeat request body.
#[derive(Debug, Deserialize)]
pub struct HeartbeatBody {
    /// The device whose client is alive.
    pub device_id: DeviceId,
}

fn parse_device_id(raw: String) -> Result<DeviceId, ApiError> {
    DeviceId::new(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

// =============================================================================
// Handlers
// =============================================================================

/// Register or update a device.
///
/// `POST /devices/register`
pub async fn register_device<P: DevicePool + 'static>(
    State(state): State<Arc<GatewayState<P>>>,
    body: Result<Json<RegisterDevice>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(request) = body?;
    let device = state.pool.register_device(request).await?;

    Ok(Json(MessageResponse::new(format!(
        "Device {} registered/updated.",
        device.device_id
    ))))
}

/// List devices, optionally filtered by `status` and `platform`.
///
/// `GET /devices`
pub async fn list_devices<P: DevicePool + 'static>(
    State(state): State<Arc<GatewayState<P>>>,
    query: Result<Query<DeviceFilter>, QueryRejection>,
) -> Result<Json<Vec<Device>>, ApiError> {
    let Query(filter) = query?;
    let devices = state.pool.list_devices(filter).await?;
    Ok(Json(devices))
}

/// Get a single device.
///
/// `GET /devices/:device_id`
pub async fn get_device<P: DevicePool + 'static>(
    State(state): State<Arc<GatewayState<P>>>,
    Path(device_id): Path<String>,
) -> Result<Json<Device>, ApiError> {
    let device_id = parse_device_id(device_id)?;
    let device = state.pool.get_device(&device_id).await?;
    Ok(Json(device))
}

/// Reserve a device and start a driver session on it.
///
/// `POST /devices/reserve`
pub async fn reserve_device<P: DevicePool + 'static>(
    State(state): State<Arc<GatewayState<P>>>,
    body: Result<Json<ReserveRequest>, JsonRejection>,
) -> Result<Json<ReserveResponse>, ApiError> {
    let Json(request) = body?;
    let reservation = state.pool.reserve_device(request).await?;

    Ok(Json(ReserveResponse {
        message: format!("Device {} reserved", reservation.device_id),
        session_id: reservation.session_id,
        wda_local_port: reservation.wda_local_port,
        appium_server: reservation.appium_server.to_string(),
    }))
}

/// Release a reserved device. The body is optional.
///
/// `POST /devices/:device_id/release`
pub async fn release_device<P: DevicePool + 'static>(
    State(state): State<Arc<GatewayState<P>>>,
    Path(device_id): Path<String>,
    body: Option<Json<ReleaseRequest>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let device_id = parse_device_id(device_id)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    state.pool.release_device(&device_id, request).await?;

    Ok(Json(MessageResponse::new(format!(
        "Device {device_id} released"
    ))))
}

/// Refresh a device's heartbeat.
///
/// `POST /devices/heartbeat`
pub async fn heartbeat<P: DevicePool + 'static>(
    State(state): State<Arc<GatewayState<P>>>,
    body: Result<Json<HeartbeatBody>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(request) = body?;
    state.pool.heartbeat(&request.device_id).await?;
    Ok(Json(MessageResponse::new("ok")))
}
