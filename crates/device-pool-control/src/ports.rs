//! WDA local port allocation.
//!
//! iOS sessions each need a local port that is unique across every device
//! in the deployment. Ports in use are tracked in one global set; a scan of
//! the range for the lowest free port runs under a coarse short-TTL lock so
//! two callers never claim the same port.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use device_pool_store::{keys, Batch, Store};

use crate::error::{PoolError, Result};
use crate::types::PoolConfig;

/// Mark a port as used as part of a larger batch.
pub fn mark_used(batch: &mut Batch, port: u16) {
    batch.set_add(keys::USED_PORTS, port);
}

/// Free a port marker as part of a larger batch.
pub fn mark_free(batch: &mut Batch, port: u16) {
    batch.set_remove(keys::USED_PORTS, port);
}

/// Hands out unique ports from a bounded range.
pub struct PortAllocator<S> {
    store: Arc<S>,
    start: u16,
    end: u16,
    lock_ttl: Duration,
    retry_delay: Duration,
}

impl<S: Store> PortAllocator<S> {
    /// Create an allocator over the configured range.
    #[must_use]
    pub fn new(store: Arc<S>, config: &PoolConfig) -> Self {
        Self {
            store,
            start: config.wda_port_start,
            end: config.wda_port_end,
            lock_ttl: config.port_lock_ttl,
            retry_delay: config.port_retry_delay,
        }
    }

    /// The closed range of ports this allocator hands out.
    #[must_use]
    pub const fn range(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }

    /// How many times `allocate` tries to take the lock before giving up.
    ///
    /// Long enough for a crashed holder's lock to expire, plus slack.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        let delay = self.retry_delay.as_millis().max(1);
        let waits = self.lock_ttl.as_millis().div_ceil(delay);
        u32::try_from(waits).unwrap_or(u32::MAX).saturating_add(2)
    }

    /// Claim the lowest free port in the range.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::RangeExhausted` if every port is in use, or
    /// `PoolError::AllocationBusy` if the allocation lock could not be taken
    /// within [`max_attempts`](Self::max_attempts).
    pub async fn allocate(&self) -> Result<u16> {
        let max_attempts = self.max_attempts();

        for attempt in 1..=max_attempts {
            if self
                .store
                .set_if_absent(keys::PORT_ALLOCATION_LOCK, "1", self.lock_ttl)
                .await?
            {
                let result = self.claim_lowest_free().await;
                if let Err(e) = self.store.delete(keys::PORT_ALLOCATION_LOCK).await {
                    tracing::warn!(error = %e, "Failed to release port allocation lock");
                }
                return result;
            }

            tracing::debug!(attempt, max_attempts, "Port allocation lock busy, retrying");
            tokio::time::sleep(self.retry_delay).await;
        }

        Err(PoolError::AllocationBusy)
    }

    async fn claim_lowest_free(&self) -> Result<u16> {
        let used = self.store.set_members(keys::USED_PORTS).await?;
        let port = self
            .range()
            .find(|port| !used.contains(&port.to_string()))
            .ok_or(PoolError::RangeExhausted {
                start: self.start,
                end: self.end,
            })?;

        let mut batch = Batch::new();
        mark_used(&mut batch, port);
        self.store.execute(batch).await?;

        tracing::debug!(port, "Allocated WDA local port");
        Ok(port)
    }

    /// Remove a port from the in-use set. Freeing a free port is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    pub async fn free(&self, port: u16) -> Result<()> {
        let mut batch = Batch::new();
        mark_free(&mut batch, port);
        self.store.execute(batch).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_pool_store::RocksStore;
    use tempfile::TempDir;

    fn allocator(start: u16, end: u16) -> (TempDir, Arc<RocksStore>, PortAllocator<RocksStore>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let config = PoolConfig {
            wda_port_start: start,
            wda_port_end: end,
            port_lock_ttl: Duration::from_millis(200),
            port_retry_delay: Duration::from_millis(20),
            ..PoolConfig::default()
        };
        let ports = PortAllocator::new(Arc::clone(&store), &config);
        (dir, store, ports)
    }

    #[test]
    fn attempts_cover_lock_ttl() {
        let (_dir, _store, ports) = allocator(8100, 8101);
        // 200ms / 20ms = 10 waits, plus slack
        assert_eq!(ports.max_attempts(), 12);
    }

    #[tokio::test]
    async fn allocates_lowest_free_port() {
        let (_dir, _store, ports) = allocator(8100, 8102);

        assert_eq!(ports.allocate().await.unwrap(), 8100);
        assert_eq!(ports.allocate().await.unwrap(), 8101);

        ports.free(8100).await.unwrap();
        assert_eq!(ports.allocate().await.unwrap(), 8100);
    }

    #[tokio::test]
    async fn exhausted_range() {
        let (_dir, store, ports) = allocator(8100, 8101);

        ports.allocate().await.unwrap();
        ports.allocate().await.unwrap();

        match ports.allocate().await {
            Err(PoolError::RangeExhausted { start, end }) => {
                assert_eq!((start, end), (8100, 8101));
            }
            other => panic!("expected RangeExhausted, got {other:?}"),
        }

        // The lock is released on the failure path too
        assert!(!store.exists(keys::PORT_ALLOCATION_LOCK).await.unwrap());
    }

    #[tokio::test]
    async fn waits_out_a_stale_lock() {
        let (_dir, store, ports) = allocator(8100, 8101);

        // A crashed holder left the lock behind
        store
            .set_if_absent(keys::PORT_ALLOCATION_LOCK, "1", Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(ports.allocate().await.unwrap(), 8100);
    }

    #[tokio::test]
    async fn gives_up_on_a_held_lock() {
        let (_dir, store, ports) = allocator(8100, 8101);

        store
            .set_if_absent(keys::PORT_ALLOCATION_LOCK, "1", Duration::from_secs(30))
            .await
            .unwrap();

        assert!(matches!(
            ports.allocate().await,
            Err(PoolError::AllocationBusy)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_allocations_are_distinct() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let config = PoolConfig {
            wda_port_start: 8100,
            wda_port_end: 8107,
            port_lock_ttl: Duration::from_secs(2),
            port_retry_delay: Duration::from_millis(5),
            ..PoolConfig::default()
        };
        let ports = Arc::new(PortAllocator::new(store, &config));

        let tasks = (0..8).map(|_| {
            let ports = Arc::clone(&ports);
            tokio::spawn(async move { ports.allocate().await })
        });
        let mut allocated: Vec<u16> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();
        allocated.sort_unstable();

        assert_eq!(allocated, (8100..=8107).collect::<Vec<_>>());
    }
}
