//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use device_pool_control::DevicePool;

use crate::handlers::{devices, health, servers};
use crate::state::GatewayState;

/// Create the gateway router with all routes and middleware.
///
/// # Routes
///
/// ## Operational
/// - `GET /health` - Health check
/// - `GET /ready` - Store reachability
///
/// ## Devices
/// - `POST /devices/register` - Register or update a device
/// - `GET /devices` - List devices (`?status=&platform=`)
/// - `GET /devices/:device_id` - Get device
/// - `POST /devices/reserve` - Reserve a device
/// - `POST /devices/:device_id/release` - Release a device
/// - `POST /devices/heartbeat` - Device heartbeat
///
/// ## Servers
/// - `GET /servers` - Appium server pool
pub fn create_router<P>(state: GatewayState<P>) -> Router
where
    P: DevicePool + 'static,
{
    // Extract config values before moving state
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout = state.config.request_timeout();

    let state = Arc::new(state);

    Router::new()
        // Operational
        .route("/health", get(health::health))
        .route("/ready", get(health::ready::<P>))
        // Devices
        .route("/devices", get(devices::list_devices::<P>))
        .route("/devices/register", post(devices::register_device::<P>))
        .route("/devices/reserve", post(devices::reserve_device::<P>))
        .route("/devices/heartbeat", post(devices::heartbeat::<P>))
        .route("/devices/:device_id", get(devices::get_device::<P>))
        .route(
            "/devices/:device_id/release",
            post(devices::release_device::<P>),
        )
        // Servers
        .route("/servers", get(servers::list_servers::<P>))
        // Middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(RequestBodyLimitLayer::new(max_body_bytes))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
