//! Gateway application state.
//!
//! This module defines the shared state that is available to all request handlers.

use std::sync::Arc;

use device_pool_control::DevicePool;

use crate::config::GatewayConfig;

/// Shared application state for the gateway.
pub struct GatewayState<P>
where
    P: DevicePool,
{
    /// The device pool.
    pub pool: Arc<P>,
    /// Gateway configuration.
    pub config: GatewayConfig,
}

impl<P> GatewayState<P>
where
    P: DevicePool,
{
    /// Create a new gateway state.
    #[must_use]
    pub fn new(pool: Arc<P>, config: GatewayConfig) -> Self {
        Self { pool, config }
    }
}

impl<P> Clone for GatewayState<P>
where
    P: DevicePool,
{
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            config: self.config.clone(),
        }
    }
}
