//! Device pool gateway - HTTP API for leasing shared test devices.
//!
//! This is the main entry point for the gateway service. Every instance is
//! stateless: any number of gateways may share one store.
//!
//! # Store backends
//!
//! - `redis` (default) connects to `REDIS_URL` and is the backend to use
//!   when several gateways or clients share the pool.
//! - `rocksdb` opens an embedded database under `DATA_DIR`, for a single
//!   gateway process.
//!
//! # Session mode
//!
//! `SESSION_MODE=noop` skips the Appium round trip and hands out generated
//! session ids, for exercising the pool without real devices.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use device_pool_control::{
    DevicePoolService, HttpSessionController, NoopSessionController, PoolConfig,
    SessionController,
};
use device_pool_core::ServerEndpoint;
use device_pool_gateway::{create_router, GatewayConfig, GatewayState};
use device_pool_store::{RedisStore, RocksStore, Store};

/// Shared store implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreBackend {
    Redis,
    Rocksdb,
}

/// How driver sessions are opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SessionMode {
    Appium,
    Noop,
}

/// Device pool gateway.
#[derive(Parser, Debug)]
#[command(name = "device-pool-gateway")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listen address.
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8000")]
    listen_addr: String,

    /// Store backend.
    #[arg(long, env = "STORE_BACKEND", value_enum, default_value = "redis")]
    store_backend: StoreBackend,

    /// Redis connection URL.
    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379/0")]
    redis_url: String,

    /// RocksDB directory for the embedded backend.
    #[arg(long, env = "DATA_DIR", default_value = "/data/device-pool")]
    data_dir: String,

    /// Single Appium server, used when no list is given.
    #[arg(
        long,
        env = "APPIUM_SERVER",
        default_value = "http://localhost:4723/wd/hub"
    )]
    appium_server: String,

    /// Comma-separated Appium server list.
    #[arg(long, env = "APPIUM_SERVERS")]
    appium_servers: Option<String>,

    /// Session mode.
    #[arg(long, env = "SESSION_MODE", value_enum, default_value = "appium")]
    session_mode: SessionMode,

    /// Reservation lock TTL in seconds.
    #[arg(long, env = "RESERVE_LOCK_TTL", default_value_t = 60)]
    reserve_lock_ttl: u64,

    /// Heartbeat TTL in seconds.
    #[arg(long, env = "HEARTBEAT_TTL", default_value_t = 120)]
    heartbeat_ttl: u64,

    /// First WDA port handed out.
    #[arg(long, env = "WDA_PORT_START", default_value_t = 8100)]
    wda_port_start: u16,

    /// Last WDA port handed out.
    #[arg(long, env = "WDA_PORT_END", default_value_t = 8199)]
    wda_port_end: u16,

    /// Comma-separated allowed CORS origins.
    #[arg(long, env = "CORS_ORIGINS", default_value = "*")]
    cors_origins: String,
}

impl Args {
    fn servers(&self) -> Vec<ServerEndpoint> {
        let list = self
            .appium_servers
            .as_deref()
            .filter(|list| !list.trim().is_empty())
            .unwrap_or(&self.appium_server);
        ServerEndpoint::parse_list(list)
    }

    fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            reserve_lock_ttl: Duration::from_secs(self.reserve_lock_ttl),
            heartbeat_ttl: Duration::from_secs(self.heartbeat_ttl),
            wda_port_start: self.wda_port_start,
            wda_port_end: self.wda_port_end,
            servers: self.servers(),
            ..PoolConfig::default()
        }
    }

    fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            listen_addr: self.listen_addr.clone(),
            cors_origins: self
                .cors_origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect(),
            ..GatewayConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,device_pool=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting device pool gateway");
    tracing::info!(
        listen_addr = %args.listen_addr,
        store_backend = ?args.store_backend,
        session_mode = ?args.session_mode,
        servers = args.servers().len(),
        "Gateway configuration loaded"
    );

    match args.store_backend {
        StoreBackend::Redis => {
            tracing::info!(url = %args.redis_url, "Connecting to Redis");
            let store = Arc::new(RedisStore::connect(&args.redis_url).await?);
            with_sessions(store, &args).await
        }
        StoreBackend::Rocksdb => {
            tracing::info!(path = %args.data_dir, "Opening RocksDB store");
            let store = Arc::new(RocksStore::open(&args.data_dir)?);
            with_sessions(store, &args).await
        }
    }
}

async fn with_sessions<S: Store + 'static>(store: Arc<S>, args: &Args) -> Result<(), Box<dyn Error>> {
    match args.session_mode {
        SessionMode::Appium => {
            let sessions = Arc::new(HttpSessionController::new()?);
            serve(store, sessions, args).await
        }
        SessionMode::Noop => {
            tracing::warn!("Session mode is noop - no Appium sessions will be opened");
            serve(store, Arc::new(NoopSessionController::new()), args).await
        }
    }
}

async fn serve<S, C>(store: Arc<S>, sessions: Arc<C>, args: &Args) -> Result<(), Box<dyn Error>>
where
    S: Store + 'static,
    C: SessionController + 'static,
{
    let pool = Arc::new(DevicePoolService::connect(store, sessions, args.pool_config()).await?);
    tracing::info!("Device pool initialized");

    let gateway_config = args.gateway_config();
    let listen_addr = gateway_config.listen_addr.clone();
    let app = create_router(GatewayState::new(pool, gateway_config));

    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
