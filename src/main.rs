use chrono::{Duration as ChronoDuration, Utc};
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use entity_runtime::actors::HealthCheckable;
use entity_runtime::cluster::LocalPlacement;
use entity_runtime::domain::ride::{RideBehavior, RideEvent, RideId, RideRepository, VehicleId};
use entity_runtime::event_sourcing::store::{EventLog, MemoryEventLog, ScyllaEventLog};
use entity_runtime::metrics::{self, Metrics};
use entity_runtime::{DirectoryConfig, EntityDirectory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,entity_runtime=debug")),
        )
        .init();

    tracing::info!("Starting entity runtime demo");

    // === 1. Configuration ===
    let config = DirectoryConfig::from_env()?;
    tracing::info!(
        node = %config.node_id,
        ask_timeout_ms = config.ask_timeout.as_millis() as u64,
        max_restarts = config.restart.max_restarts,
        "Loaded directory configuration"
    );

    // === 2. Event log: ScyllaDB when SCYLLA_URI is set, in-memory otherwise ===
    let log: Arc<dyn EventLog<RideEvent>> = match std::env::var("SCYLLA_URI") {
        Ok(uri) => {
            tracing::info!(uri = %uri, "Connecting to ScyllaDB...");
            let session = connect_scylla(&uri).await?;
            let log = ScyllaEventLog::<RideEvent>::new(session);
            log.ensure_schema().await?;
            Arc::new(log)
        }
        Err(_) => {
            tracing::info!("SCYLLA_URI not set, using in-memory event log");
            Arc::new(MemoryEventLog::<RideEvent>::new())
        }
    };

    // === 3. Prometheus metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 4. Entity directory + repository ===
    let placement = Arc::new(LocalPlacement::new(config.node_id.clone()));
    let directory = EntityDirectory::<RideBehavior>::new(log, placement, config, metrics.clone());
    let sweeper = directory.spawn_passivation();
    let rides = RideRepository::new(directory.clone());

    // Start metrics HTTP server in background thread
    let port = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9090);
    let metrics_registry = Arc::new(metrics.registry().clone());
    let health: Arc<dyn HealthCheckable + Send + Sync> = Arc::new(directory.clone());
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!("Failed to build metrics runtime: {}", e);
                return;
            }
        };
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(metrics_registry, health, port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    });

    // === 5. Demonstrate a ride lifecycle ===
    let ride_id = RideId::new();
    let pickup = Utc::now() + ChronoDuration::minutes(15);

    let outcome = rides.book(ride_id, "Central Station", "Airport", pickup).await?;
    tracing::info!(ride_id = %ride_id, outcome = ?outcome, "Booked ride");

    let outcome = rides.book(ride_id, "Central Station", "Airport", pickup).await?;
    tracing::info!(ride_id = %ride_id, outcome = ?outcome, "Booked the same ride again");

    let outcome = rides.start(ride_id).await?;
    tracing::info!(ride_id = %ride_id, outcome = ?outcome, "Tried to start before assignment");

    let outcome = rides.assign_vehicle(ride_id, VehicleId::new("V1")).await?;
    tracing::info!(ride_id = %ride_id, outcome = ?outcome, "Assigned vehicle V1");

    let outcome = rides.assign_vehicle(ride_id, VehicleId::new("V2")).await?;
    tracing::info!(ride_id = %ride_id, outcome = ?outcome, "Tried to assign vehicle V2");

    let outcome = rides.start(ride_id).await?;
    tracing::info!(ride_id = %ride_id, outcome = ?outcome, "Started ride");

    let outcome = rides.complete(ride_id).await?;
    tracing::info!(ride_id = %ride_id, outcome = ?outcome, "Completed ride");

    // Passivate and read back: the ride is rebuilt from its events.
    directory.passivate(&ride_id).await?;
    if let Some(ride) = rides.get(ride_id).await? {
        tracing::info!(
            ride_id = %ride_id,
            status = ?ride.status,
            vehicle = ?ride.vehicle,
            "Ride state after reactivation"
        );
    }

    let health = directory.check_health();
    tracing::info!(status = ?health.status, active = directory.active_count(), "Directory health");

    tracing::info!("Demo finished, metrics at http://0.0.0.0:{}/metrics (Ctrl+C to exit)", port);
    tokio::signal::ctrl_c().await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    tracing::info!("Shutting down");
    Ok(())
}

async fn connect_scylla(uri: &str) -> anyhow::Result<Arc<Session>> {
    let session: Session = SessionBuilder::new().known_node(uri).build().await?;

    // Ensure keyspace exists (optional, or do this via cqlsh)
    session
        .query_unpaged(
            "CREATE KEYSPACE IF NOT EXISTS entity_ks WITH REPLICATION = \
             {'class': 'SimpleStrategy', 'replication_factor': 1}",
            &[],
        )
        .await?;
    session.use_keyspace("entity_ks", false).await?;

    Ok(Arc::new(session))
}
