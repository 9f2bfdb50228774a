//! Driver server pool endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use device_pool_control::{DevicePool, ServerPoolStatus};

use crate::error::ApiError;
use crate::state::GatewayState;

/// The configured Appium servers and which of them are busy.
///
/// `GET /servers`
pub async fn list_servers<P: DevicePool + 'static>(
    State(state): State<Arc<GatewayState<P>>>,
) -> Result<Json<ServerPoolStatus>, ApiError> {
    Ok(Json(state.pool.server_status().await?))
}
