//! Watch-party service
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Open the room store (memory, or Postgres with migrations)
//! 4. Build the catalog and identity collaborators
//! 5. Spawn the room registry
//! 6. Serve HTTP/WebSocket until SIGTERM or ctrl-c
//! 7. Drain, then stop every room actor

use common::secret::ExposeSecret;
use party_service::actors::{ActorMetrics, RoomActorSettings, RoomRegistryHandle};
use party_service::catalog::{HttpVideoCatalog, StaticVideoCatalog, VideoCatalog};
use party_service::config::{Config, StoreBackend};
use party_service::identity::{HttpIdentityProvider, IdentityProvider, StaticIdentityProvider};
use party_service::observability::metrics::init_metrics_recorder;
use party_service::routes::{self, AppState};
use party_service::service::PartyService;
use party_service::store::{InMemoryRoomStore, PgRoomStore, RoomStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time each room actor gets to close its subscribers on shutdown.
const ROOM_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "party_service=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting watch-party service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        store = ?config.store_backend,
        grace_period_secs = config.disconnect_grace_period.as_secs(),
        queue_capacity = config.outbound_queue_capacity,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        e
    })?;

    let store = open_store(&config).await?;

    let catalog: Arc<dyn VideoCatalog> = match &config.catalog_url {
        Some(url) => Arc::new(HttpVideoCatalog::new(url)?),
        None => {
            warn!("PARTY_CATALOG_URL not set, using an empty static catalog");
            Arc::new(StaticVideoCatalog::new())
        }
    };
    let identity: Arc<dyn IdentityProvider> = match &config.identity_url {
        Some(url) => Arc::new(HttpIdentityProvider::new(url)?),
        None => {
            warn!("PARTY_IDENTITY_URL not set, every token will be rejected");
            Arc::new(StaticIdentityProvider::new())
        }
    };

    let registry = RoomRegistryHandle::new(
        Arc::clone(&store),
        RoomActorSettings {
            grace_period: config.disconnect_grace_period,
            drain_period: config.room_drain_period,
            queue_capacity: config.outbound_queue_capacity,
        },
        ActorMetrics::new(),
    );

    let service = Arc::new(PartyService::new(
        registry.clone(),
        store,
        catalog,
        config.max_participants_limit,
    ));

    let bind_address = config.bind_address.clone();
    let shutdown_drain = config.shutdown_drain_period;

    let state = Arc::new(AppState {
        service,
        identity,
        config,
    });
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Watch-party service listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_drain))
        .await?;

    info!("HTTP server stopped, stopping room actors...");
    if let Err(e) = registry.shutdown(ROOM_SHUTDOWN_DEADLINE).await {
        warn!(error = %e, "Room registry shutdown error");
    }
    registry.cancel();

    info!("Watch-party service shutdown complete");
    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<dyn RoomStore>, Box<dyn std::error::Error>> {
    match config.store_backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory store; rooms do not survive a restart");
            Ok(Arc::new(InMemoryRoomStore::new()))
        }
        StoreBackend::Postgres => {
            let Some(database_url) = &config.database_url else {
                return Err("DATABASE_URL is required for the postgres store".into());
            };

            info!("Connecting to database...");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(20)
                .min_connections(2)
                .acquire_timeout(Duration::from_secs(5))
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800))
                .connect(database_url.expose_secret())
                .await
                .map_err(|e| {
                    error!("Failed to connect to database: {}", e);
                    e
                })?;
            info!("Database connection established");

            let store = PgRoomStore::new(pool);
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}

/// Wait for SIGTERM or ctrl-c, then hold the listener open for the drain
/// period.
async fn shutdown_signal(drain: Duration) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    if drain.is_zero() {
        info!("Skipping drain period");
    } else {
        warn!("Draining connections for {} seconds...", drain.as_secs());
        tokio::time::sleep(drain).await;
        info!("Drain period complete");
    }
}
