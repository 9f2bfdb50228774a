//! Driver server pool.
//!
//! The configured endpoints form a fixed universe split across two disjoint
//! sets in the store, `available` and `in_use`. Handing out a server is a
//! single atomic pop-and-move, so no two callers can receive the same one.

use std::sync::Arc;

use device_pool_core::ServerEndpoint;
use device_pool_store::{keys, Batch, Store, StoreError};

use crate::error::{PoolError, Result};
use crate::types::ServerPoolStatus;

/// Pool of Appium server endpoints.
pub struct ServerPool<S> {
    store: Arc<S>,
    universe: Vec<ServerEndpoint>,
}

impl<S: Store> ServerPool<S> {
    /// Create the pool and reconcile the persisted sets with `servers`.
    ///
    /// Persisted `available` entries that are no longer configured are
    /// pruned; configured endpoints found in neither set are added as
    /// available. Entries already `in_use` are left alone so live sessions
    /// on other processes are unaffected.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    pub async fn connect(store: Arc<S>, servers: Vec<ServerEndpoint>) -> Result<Self> {
        let mut universe: Vec<ServerEndpoint> = Vec::with_capacity(servers.len());
        for server in servers {
            if !universe.contains(&server) {
                universe.push(server);
            }
        }

        let pool = Self { store, universe };
        pool.reconcile().await?;
        Ok(pool)
    }

    async fn reconcile(&self) -> Result<()> {
        let available = self.store.set_members(keys::SERVERS_AVAILABLE).await?;
        let in_use = self.store.set_members(keys::SERVERS_IN_USE).await?;

        let mut batch = Batch::new();
        let mut pruned = 0usize;
        for member in &available {
            if !self.is_configured(member) {
                batch.set_remove(keys::SERVERS_AVAILABLE, member);
                pruned += 1;
            }
        }

        let mut added = 0usize;
        for server in &self.universe {
            if !available.contains(server.as_str()) && !in_use.contains(server.as_str()) {
                batch.set_add(keys::SERVERS_AVAILABLE, server);
                added += 1;
            }
        }

        self.store.execute(batch).await?;

        tracing::info!(
            configured = self.universe.len(),
            pruned,
            added,
            "Reconciled Appium server pool"
        );
        Ok(())
    }

    fn is_configured(&self, member: &str) -> bool {
        self.universe.iter().any(|s| s.as_str() == member)
    }

    /// Take an available server and mark it in use.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::PoolExhausted` if no server is available.
    pub async fn acquire(&self) -> Result<ServerEndpoint> {
        let member = self
            .store
            .pop_into(keys::SERVERS_AVAILABLE, keys::SERVERS_IN_USE)
            .await?
            .ok_or(PoolError::PoolExhausted)?;

        let server = ServerEndpoint::new(&member).map_err(|e| StoreError::Corrupt {
            key: keys::SERVERS_AVAILABLE.to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!(server = %server, "Acquired Appium server");
        Ok(server)
    }

    /// Return a server to the pool.
    ///
    /// The server leaves `in_use` unconditionally but rejoins `available`
    /// only if it is still part of the configured universe.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    pub async fn release(&self, server: &ServerEndpoint) -> Result<()> {
        let mut batch = Batch::new();
        batch.set_remove(keys::SERVERS_IN_USE, server);
        if self.is_configured(server.as_str()) {
            batch.set_add(keys::SERVERS_AVAILABLE, server);
        } else {
            tracing::info!(server = %server, "Retiring unconfigured Appium server");
        }
        self.store.execute(batch).await?;

        tracing::debug!(server = %server, "Released Appium server");
        Ok(())
    }

    /// The configured universe, in configuration order.
    #[must_use]
    pub fn servers(&self) -> &[ServerEndpoint] {
        &self.universe
    }

    /// Current contents of both sets.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    pub async fn status(&self) -> Result<ServerPoolStatus> {
        let available = self.store.set_members(keys::SERVERS_AVAILABLE).await?;
        let in_use = self.store.set_members(keys::SERVERS_IN_USE).await?;
        Ok(ServerPoolStatus {
            configured: self.universe.clone(),
            available: available.into_iter().collect(),
            in_use: in_use.into_iter().collect(),
        })
    }
}
