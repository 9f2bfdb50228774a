//! Device pool service implementation.
//!
//! This module provides the `DevicePool` trait and the `DevicePoolService`
//! implementation that wires the registry, lease manager, port allocator,
//! server pool and liveness monitor over one shared store.

use std::sync::Arc;

use async_trait::async_trait;
use device_pool_core::DeviceId;
use device_pool_store::{Device, Store};

use crate::error::{PoolError, Result};
use crate::lease::{LeaseManager, ReservationLock};
use crate::pool::ServerPool;
use crate::ports::PortAllocator;
use crate::registry::Registry;
use crate::session_client::SessionController;
use crate::types::{
    DeviceFilter, PoolConfig, RegisterDevice, ReleaseRequest, Reservation, ReserveRequest,
    ServerPoolStatus,
};

/// Trait defining the device pool operations.
///
/// This is the complete API exposed to the request layer. Every operation
/// is safe to call concurrently from any number of processes sharing the
/// same store.
#[async_trait]
pub trait DevicePool: Send + Sync {
    // =========================================================================
    // Registry
    // =========================================================================

    /// Register or update a device.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidDevice` if the registration is not acceptable.
    async fn register_device(&self, request: RegisterDevice) -> Result<Device>;

    /// Get a device, with liveness applied to its status.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::DeviceNotFound` if the device doesn't exist.
    async fn get_device(&self, device_id: &DeviceId) -> Result<Device>;

    /// List devices, ordered by identifier.
    async fn list_devices(&self, filter: DeviceFilter) -> Result<Vec<Device>>;

    // =========================================================================
    // Leasing
    // =========================================================================

    /// Reserve a device and open a driver session on it.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Conflict` if the device is not available,
    /// `PoolError::Locked` if it is being reserved or released elsewhere, or
    /// `PoolError::PoolExhausted` if no driver server is free.
    async fn reserve_device(&self, request: ReserveRequest) -> Result<Reservation>;

    /// Release a reserved device.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Conflict` if the device is not in use.
    async fn release_device(&self, device_id: &DeviceId, request: ReleaseRequest)
        -> Result<Device>;

    // =========================================================================
    // Operational
    // =========================================================================

    /// Process a heartbeat from a device's client.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::DeviceNotFound` if the device doesn't exist.
    async fn heartbeat(&self, device_id: &DeviceId) -> Result<Device>;

    /// Snapshot of the driver server pool.
    async fn server_status(&self) -> Result<ServerPoolStatus>;

    /// Check that the shared store is reachable.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::StoreUnavailable` if it is not.
    async fn ping(&self) -> Result<()>;
}

/// The main device pool service implementation.
pub struct DevicePoolService<S: Store, C: SessionController> {
    store: Arc<S>,
    registry: Arc<Registry<S>>,
    servers: Arc<ServerPool<S>>,
    leases: Arc<LeaseManager<S, C>>,
    config: PoolConfig,
}

impl<S: Store, C: SessionController> DevicePoolService<S, C> {
    /// Create the service and reconcile the server pool with `config`.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Config` if the configuration is invalid, or an
    /// error if the store cannot be reached.
    pub async fn connect(store: Arc<S>, sessions: Arc<C>, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(Registry::new(Arc::clone(&store), config.heartbeat_ttl));
        let servers = Arc::new(ServerPool::connect(Arc::clone(&store), config.servers.clone()).await?);
        let leases = Arc::new(LeaseManager::new(
            Arc::clone(&registry),
            PortAllocator::new(Arc::clone(&store), &config),
            Arc::clone(&servers),
            ReservationLock::new(Arc::clone(&store), config.reserve_lock_ttl),
            sessions,
        ));

        tracing::info!(
            servers = servers.servers().len(),
            wda_port_start = config.wda_port_start,
            wda_port_end = config.wda_port_end,
            "Device pool ready"
        );

        Ok(Self {
            store,
            registry,
            servers,
            leases,
            config,
        })
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get the registry.
    #[must_use]
    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }
}

#[async_trait]
impl<S: Store + 'static, C: SessionController + 'static> DevicePool for DevicePoolService<S, C> {
    async fn register_device(&self, request: RegisterDevice) -> Result<Device> {
        self.registry.register(request).await
    }

    async fn get_device(&self, device_id: &DeviceId) -> Result<Device> {
        self.registry.get(device_id).await
    }

    async fn list_devices(&self, filter: DeviceFilter) -> Result<Vec<Device>> {
        self.registry.list(filter).await
    }

    async fn reserve_device(&self, request: ReserveRequest) -> Result<Reservation> {
        if let Some(test_id) = &request.test_id {
            tracing::debug!(device_id = %request.device_id, test_id = %test_id, "Reserve requested");
        }
        // Detached: once a server is taken the protocol must reach its
        // compensation or its lease record, even if the caller goes away.
        let leases = Arc::clone(&self.leases);
        let task = tokio::spawn(async move {
            leases
                .reserve(&request.device_id, request.wda_local_port)
                .await
        });
        task.await
            .map_err(|e| PoolError::Internal(format!("reserve task failed: {e}")))?
    }

    async fn release_device(
        &self,
        device_id: &DeviceId,
        request: ReleaseRequest,
    ) -> Result<Device> {
        let leases = Arc::clone(&self.leases);
        let device_id = device_id.clone();
        let task = tokio::spawn(async move {
            leases
                .release(&device_id, request.reason.as_deref())
                .await
        });
        task.await
            .map_err(|e| PoolError::Internal(format!("release task failed: {e}")))?
    }

    async fn heartbeat(&self, device_id: &DeviceId) -> Result<Device> {
        self.registry.heartbeat(device_id).await
    }

    async fn server_status(&self) -> Result<ServerPoolStatus> {
        self.servers.status().await
    }

    async fn ping(&self) -> Result<()> {
        self.store.ping().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use device_pool_core::ServerEndpoint;
    use device_pool_store::{keys, DeviceStatus, Platform, RocksStore};
    use tempfile::TempDir;

    use crate::session_client::SessionTarget;

    /// Session controller double that counts calls and can be told to fail.
    #[derive(Default)]
    struct MockSessions {
        fail_start: bool,
        fail_stop: bool,
        delay: Duration,
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    #[async_trait]
    impl SessionController for MockSessions {
        async fn start_session(
            &self,
            _server: &ServerEndpoint,
            target: SessionTarget<'_>,
        ) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            if self.fail_start {
                return Err(PoolError::SessionStartFailed("appium down".into()));
            }
            let n = self.started.fetch_add(1, Ordering::SeqCst);
            Ok(format!("session-{}-{n}", target.device_id))
        }

        async fn stop_session(&self, _server: &ServerEndpoint, _session_id: &str) -> Result<()> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop {
                return Err(PoolError::SessionStopFailed("appium down".into()));
            }
            Ok(())
        }
    }

    type Service = DevicePoolService<RocksStore, MockSessions>;

    fn config(servers: &str) -> PoolConfig {
        PoolConfig {
            servers: ServerEndpoint::parse_list(servers),
            port_lock_ttl: Duration::from_secs(2),
            port_retry_delay: Duration::from_millis(5),
            ..PoolConfig::default()
        }
    }

    async fn setup_with(
        dir: &TempDir,
        sessions: MockSessions,
        config: PoolConfig,
    ) -> Service {
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        DevicePoolService::connect(store, Arc::new(sessions), config)
            .await
            .unwrap()
    }

    async fn setup(servers: &str) -> (Service, TempDir) {
        let dir = TempDir::new().unwrap();
        let service = setup_with(&dir, MockSessions::default(), config(servers)).await;
        (service, dir)
    }

    fn id(value: &str) -> DeviceId {
        DeviceId::new(value).unwrap()
    }

    fn available() -> DeviceFilter {
        DeviceFilter {
            status: Some(DeviceStatus::Available),
            platform: None,
        }
    }

    fn ids(devices: &[Device]) -> Vec<String> {
        devices.iter().map(|d| d.device_id.to_string()).collect()
    }

    #[tokio::test]
    async fn reserve_release_scenario() {
        let dir = TempDir::new().unwrap();

        {
            let service = setup_with(&dir, MockSessions::default(), config("")).await;
            service
                .register_device(RegisterDevice::new(id("d1"), Platform::Android, "13"))
                .await
                .unwrap();
            assert_eq!(ids(&service.list_devices(available()).await.unwrap()), vec!["d1"]);

            let result = service.reserve_device(ReserveRequest::new(id("d1"))).await;
            assert!(matches!(result, Err(PoolError::PoolExhausted)));

            let device = service.registry().get_stored(&id("d1")).await.unwrap();
            assert_eq!(device.status, DeviceStatus::Available);
        }

        let service = setup_with(&dir, MockSessions::default(), config("http://s1:4723/")).await;

        let reservation = service
            .reserve_device(ReserveRequest::new(id("d1")))
            .await
            .unwrap();
        assert_eq!(reservation.appium_server.as_str(), "http://s1:4723");
        assert_eq!(reservation.wda_local_port, None);

        let device = service.get_device(&id("d1")).await.unwrap();
        assert_eq!(device.status, DeviceStatus::InUse);
        assert_eq!(device.current_session.as_deref(), Some(reservation.session_id.as_str()));
        assert!(device.lease_is_consistent());

        service
            .release_device(&id("d1"), ReleaseRequest::default())
            .await
            .unwrap();
        assert_eq!(ids(&service.list_devices(available()).await.unwrap()), vec!["d1"]);

        let servers = service.server_status().await.unwrap();
        assert_eq!(servers.available, vec!["http://s1:4723".to_string()]);
        assert!(servers.in_use.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reserves_have_one_winner() {
        let dir = TempDir::new().unwrap();
        let sessions = MockSessions {
            delay: Duration::from_millis(20),
            ..MockSessions::default()
        };
        let service = Arc::new(
            setup_with(&dir, sessions, config("http://a:4723,http://b:4723,http://c:4723")).await,
        );
        service
            .register_device(RegisterDevice::new(id("d1"), Platform::Android, "13"))
            .await
            .unwrap();

        let tasks = (0..8).map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.reserve_device(ReserveRequest::new(id("d1"))).await })
        });
        let results: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        for result in &results {
            if let Err(e) = result {
                assert!(
                    matches!(e, PoolError::Conflict { .. } | PoolError::Locked(_)),
                    "unexpected error: {e}"
                );
            }
        }

        let servers = service.server_status().await.unwrap();
        assert_eq!(servers.in_use.len(), 1);
        assert_eq!(servers.available.len(), 2);
    }

    #[tokio::test]
    async fn round_trip_keeps_port_and_frees_marker() {
        let (service, _dir) = setup("http://a:4723").await;
        service
            .register_device(RegisterDevice::new(id("ios-1"), Platform::Ios, "17.4"))
            .await
            .unwrap();

        let reservation = service
            .reserve_device(ReserveRequest::new(id("ios-1")))
            .await
            .unwrap();
        assert_eq!(reservation.wda_local_port, Some(8100));
        let used = service.store().set_members(keys::USED_PORTS).await.unwrap();
        assert!(used.contains("8100"));

        let released = service
            .release_device(&id("ios-1"), ReleaseRequest::default())
            .await
            .unwrap();
        assert_eq!(released.status, DeviceStatus::Available);
        assert_eq!(released.wda_local_port, Some(8100));
        assert!(released.current_session.is_none());
        assert!(released.appium_server.is_none());
        assert!(service
            .store()
            .set_members(keys::USED_PORTS)
            .await
            .unwrap()
            .is_empty());

        // The retained port is reused on the next reservation
        let again = service
            .reserve_device(ReserveRequest::new(id("ios-1")))
            .await
            .unwrap();
        assert_eq!(again.wda_local_port, Some(8100));
    }

    #[tokio::test]
    async fn requested_port_is_recorded() {
        let (service, _dir) = setup("http://a:4723").await;
        service
            .register_device(RegisterDevice::new(id("ios-1"), Platform::Ios, "17.4"))
            .await
            .unwrap();

        let request = ReserveRequest {
            wda_local_port: Some(8150),
            ..ReserveRequest::new(id("ios-1"))
        };
        let reservation = service.reserve_device(request).await.unwrap();
        assert_eq!(reservation.wda_local_port, Some(8150));

        let device = service.get_device(&id("ios-1")).await.unwrap();
        assert_eq!(device.wda_local_port, Some(8150));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ios_reserves_get_distinct_ports() {
        let dir = TempDir::new().unwrap();
        let config = PoolConfig {
            wda_port_start: 8100,
            wda_port_end: 8103,
            ..config("http://a:4723,http://b:4723,http://c:4723,http://d:4723,http://e:4723")
        };
        let service = Arc::new(setup_with(&dir, MockSessions::default(), config).await);

        for n in 0..5 {
            service
                .register_device(RegisterDevice::new(id(&format!("ios-{n}")), Platform::Ios, "17"))
                .await
                .unwrap();
        }

        let tasks = (0..4).map(|n| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .reserve_device(ReserveRequest::new(id(&format!("ios-{n}"))))
                    .await
            })
        });
        let mut ports: Vec<u16> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap().wda_local_port.unwrap())
            .collect();
        ports.sort_unstable();
        assert_eq!(ports, vec![8100, 8101, 8102, 8103]);

        let result = service.reserve_device(ReserveRequest::new(id("ios-4"))).await;
        assert!(matches!(result, Err(PoolError::RangeExhausted { .. })));

        // Nothing was leaked by the failed attempt
        let servers = service.server_status().await.unwrap();
        assert_eq!(servers.available, vec!["http://e:4723".to_string()]);
        assert!(service
            .store()
            .set_if_absent(&keys::reservation_lock_key(&id("ios-4")), "1", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn missing_heartbeat_then_heartbeat() {
        let (service, _dir) = setup("http://a:4723").await;
        service
            .register_device(RegisterDevice::new(id("d1"), Platform::Android, "13"))
            .await
            .unwrap();

        assert_eq!(
            service.get_device(&id("d1")).await.unwrap().status,
            DeviceStatus::Offline
        );

        service.heartbeat(&id("d1")).await.unwrap();
        assert_eq!(
            service.get_device(&id("d1")).await.unwrap().status,
            DeviceStatus::Available
        );
    }

    #[tokio::test]
    async fn heartbeat_brings_registered_offline_device_back() {
        let (service, _dir) = setup("http://a:4723").await;
        service
            .register_device(
                RegisterDevice::new(id("d1"), Platform::Android, "13")
                    .with_status(DeviceStatus::Offline),
            )
            .await
            .unwrap();

        let result = service.reserve_device(ReserveRequest::new(id("d1"))).await;
        assert!(matches!(result, Err(PoolError::Conflict { .. })));

        service.heartbeat(&id("d1")).await.unwrap();
        service
            .reserve_device(ReserveRequest::new(id("d1")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_session_returns_server() {
        let dir = TempDir::new().unwrap();
        let sessions = MockSessions {
            fail_start: true,
            ..MockSessions::default()
        };
        let service = setup_with(&dir, sessions, config("http://a:4723")).await;
        service
            .register_device(RegisterDevice::new(id("d1"), Platform::Android, "13"))
            .await
            .unwrap();

        let result = service.reserve_device(ReserveRequest::new(id("d1"))).await;
        assert!(matches!(result, Err(PoolError::SessionStartFailed(_))));

        let device = service.registry().get_stored(&id("d1")).await.unwrap();
        assert_eq!(device.status, DeviceStatus::Available);
        assert!(device.current_session.is_none());

        let servers = service.server_status().await.unwrap();
        assert_eq!(servers.available, vec!["http://a:4723".to_string()]);
        assert!(servers.in_use.is_empty());
    }

    #[tokio::test]
    async fn release_swallows_stop_failure() {
        let dir = TempDir::new().unwrap();
        let sessions = MockSessions {
            fail_stop: true,
            ..MockSessions::default()
        };
        let service = setup_with(&dir, sessions, config("http://a:4723")).await;
        service
            .register_device(RegisterDevice::new(id("d1"), Platform::Android, "13"))
            .await
            .unwrap();
        service
            .reserve_device(ReserveRequest::new(id("d1")))
            .await
            .unwrap();

        let released = service
            .release_device(&id("d1"), ReleaseRequest::default())
            .await
            .unwrap();
        assert_eq!(released.status, DeviceStatus::Available);
        assert_eq!(
            service.server_status().await.unwrap().available,
            vec!["http://a:4723".to_string()]
        );
    }

    #[tokio::test]
    async fn reserve_and_release_preconditions() {
        let (service, _dir) = setup("http://a:4723").await;

        assert!(matches!(
            service.reserve_device(ReserveRequest::new(id("ghost"))).await,
            Err(PoolError::DeviceNotFound(_))
        ));

        service
            .register_device(RegisterDevice::new(id("d1"), Platform::Android, "13"))
            .await
            .unwrap();
        assert!(matches!(
            service
                .release_device(&id("d1"), ReleaseRequest::default())
                .await,
            Err(PoolError::Conflict { .. })
        ));

        service
            .reserve_device(ReserveRequest::new(id("d1")))
            .await
            .unwrap();
        assert!(matches!(
            service.reserve_device(ReserveRequest::new(id("d1"))).await,
            Err(PoolError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn held_lock_blocks_reserve() {
        let (service, _dir) = setup("http://a:4723").await;
        service
            .register_device(RegisterDevice::new(id("d1"), Platform::Android, "13"))
            .await
            .unwrap();

        service
            .store()
            .set_if_absent(&keys::reservation_lock_key(&id("d1")), "1", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(matches!(
            service.reserve_device(ReserveRequest::new(id("d1"))).await,
            Err(PoolError::Locked(_))
        ));
        // The server was never taken
        assert!(service.server_status().await.unwrap().in_use.is_empty());
    }

    #[tokio::test]
    async fn held_lock_blocks_release() {
        let (service, _dir) = setup("http://a:4723").await;
        service
            .register_device(RegisterDevice::new(id("d1"), Platform::Android, "13"))
            .await
            .unwrap();
        let reservation = service
            .reserve_device(ReserveRequest::new(id("d1")))
            .await
            .unwrap();

        service
            .store()
            .set_if_absent(&keys::reservation_lock_key(&id("d1")), "1", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(matches!(
            service
                .release_device(&id("d1"), ReleaseRequest::default())
                .await,
            Err(PoolError::Locked(_))
        ));

        let device = service.registry().get_stored(&id("d1")).await.unwrap();
        assert_eq!(device.status, DeviceStatus::InUse);
        assert_eq!(device.current_session, Some(reservation.session_id));
        let servers = service.server_status().await.unwrap();
        assert_eq!(servers.in_use, vec!["http://a:4723".to_string()]);
        assert!(servers.available.is_empty());
    }

    #[tokio::test]
    async fn abandoned_reserve_with_failing_session_returns_server() {
        let dir = TempDir::new().unwrap();
        let sessions = MockSessions {
            fail_start: true,
            delay: Duration::from_millis(200),
            ..MockSessions::default()
        };
        let service = setup_with(&dir, sessions, config("http://s1:4723")).await;
        service
            .register_device(RegisterDevice::new(id("d1"), Platform::Android, "13"))
            .await
            .unwrap();

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            service.reserve_device(ReserveRequest::new(id("d1"))),
        )
        .await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;

        let servers = service.server_status().await.unwrap();
        assert!(servers.in_use.is_empty());
        assert_eq!(servers.available, vec!["http://s1:4723".to_string()]);
        assert!(!service
            .store()
            .exists(&keys::reservation_lock_key(&id("d1")))
            .await
            .unwrap());
        assert_eq!(
            service.registry().get_stored(&id("d1")).await.unwrap().status,
            DeviceStatus::Available
        );
    }

    #[tokio::test]
    async fn abandoned_reserve_still_records_lease() {
        let dir = TempDir::new().unwrap();
        let sessions = MockSessions {
            delay: Duration::from_millis(200),
            ..MockSessions::default()
        };
        let service = setup_with(&dir, sessions, config("http://s1:4723")).await;
        service
            .register_device(RegisterDevice::new(id("d1"), Platform::Android, "13"))
            .await
            .unwrap();

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            service.reserve_device(ReserveRequest::new(id("d1"))),
        )
        .await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;

        // The server is accounted to the device, so release returns it
        let device = service.registry().get_stored(&id("d1")).await.unwrap();
        assert_eq!(device.status, DeviceStatus::InUse);
        assert_eq!(device.appium_server.as_ref().map(ServerEndpoint::as_str), Some("http://s1:4723"));
        assert!(!service
            .store()
            .exists(&keys::reservation_lock_key(&id("d1")))
            .await
            .unwrap());

        service
            .release_device(&id("d1"), ReleaseRequest::default())
            .await
            .unwrap();
        let servers = service.server_status().await.unwrap();
        assert!(servers.in_use.is_empty());
        assert_eq!(servers.available, vec!["http://s1:4723".to_string()]);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let config = PoolConfig {
            wda_port_start: 9000,
            wda_port_end: 8000,
            ..PoolConfig::default()
        };
        let result =
            DevicePoolService::connect(store, Arc::new(MockSessions::default()), config).await;
        assert!(matches!(result, Err(PoolError::Config(_))));
    }
}
