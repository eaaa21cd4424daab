//! Fenceline - family geofence alert engine
//!
//! Demo harness: wires the full pipeline (coordinator -> watchers -> engine
//! -> cooldown gate -> dispatcher) against the in-memory backend and replays
//! a scripted family scenario through it. Real deployments embed the library
//! behind their own store implementations; this binary exists to watch the
//! pipeline run end to end.
//!
//! Module structure:
//! - `domain/` - Core business types (coordinates, fences, samples, alerts)
//! - `io/` - Store traits and the in-memory backend
//! - `services/` - Business logic (detector, gate, dispatcher, engine, watchers)
//! - `infra/` - Infrastructure (config, metrics)

use clap::Parser;
use fenceline::domain::geo::Coordinate;
use fenceline::domain::types::{
    FenceId, Geofence, GroupId, LocationSample, StatusSample, Subject, SubjectId,
};
use fenceline::infra::{Config, Metrics};
use fenceline::io::{LoggingPush, MemoryBackend};
use fenceline::io::store::{Directory, FenceStore, LiveStore};
use fenceline::services::{AlertEngine, Coordinator};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Fenceline - family geofence alert engine
#[derive(Parser, Debug)]
#[command(name = "fenceline", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

fn demo_subject(id: &str, name: &str, token: Option<&str>) -> Subject {
    Subject {
        id: SubjectId::from(id),
        name: name.to_string(),
        group_id: Some(GroupId::from("family-1")),
        sharing_enabled: true,
        battery_alerts_enabled: true,
        push_token: token.map(String::from),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging, level via RUST_LOG (default info)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("fenceline starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);
    info!(
        config_file = %config.config_file(),
        battery_threshold_pct = %config.battery_threshold_pct(),
        fence_cooldown_secs = %config.fence_cooldown().as_secs(),
        low_battery_cooldown_secs = %config.low_battery_cooldown().as_secs(),
        "config_loaded"
    );

    // In-memory backend seeded with a demo family and one fence
    let backend = Arc::new(MemoryBackend::new(config.min_radius_m(), config.max_radius_m()));
    backend.upsert_subject(demo_subject("alice", "Alice", Some("token-alice")));
    backend.upsert_subject(demo_subject("bob", "Bob", Some("token-bob")));
    backend.put_fence(Geofence {
        id: FenceId::from("fence-home"),
        group_id: GroupId::from("family-1"),
        name: "Home".to_string(),
        center: Coordinate::new(37.0, -122.0),
        radius_m: 200.0,
    })?;

    let metrics = Arc::new(Metrics::new());
    let engine = Arc::new(AlertEngine::new(
        &config,
        backend.clone(),
        backend.clone(),
        backend.clone(),
        backend.clone(),
        Arc::new(LoggingPush),
        metrics.clone(),
    ));

    // Shutdown signal shared by every task
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Periodic metrics reporter
    let report_metrics = metrics.clone();
    let report_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(report_interval));
        loop {
            interval.tick().await;
            report_metrics.report().log();
        }
    });

    // Start the coordinator over the demo family
    let members = backend.group_members(&GroupId::from("family-1")).await?;
    let (membership_tx, membership_rx) = watch::channel(members);
    let coordinator =
        Coordinator::new(engine.clone(), backend.clone() as Arc<dyn LiveStore>);
    let fence_changes = backend.subscribe_changes();
    let coordinator_shutdown = shutdown_rx.clone();
    let coordinator_task = tokio::spawn(coordinator.run(
        membership_rx,
        fence_changes,
        coordinator_shutdown,
    ));

    // Stop on Ctrl+C as well as at the end of the script
    let signal_shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = signal_shutdown.send(true);
    });

    run_scenario(&backend).await?;

    // Let in-flight dispatches settle, then report and stop
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    for event in backend.events() {
        info!(
            kind = %event.kind,
            recipient = %event.recipient_id,
            message = %event.message,
            "notification_recorded"
        );
    }
    metrics.report().log();

    let _ = shutdown_tx.send(true);
    drop(membership_tx);
    let _ = coordinator_task.await;

    info!("fenceline shutdown complete");
    Ok(())
}

/// Walk Alice through the fence, drain her battery, and press SOS
async fn run_scenario(backend: &MemoryBackend) -> anyhow::Result<()> {
    let alice = SubjectId::from("alice");
    let step = std::time::Duration::from_millis(100);

    let walk = [
        Coordinate::new(37.02, -122.0), // well outside Home
        Coordinate::new(37.005, -122.0), // approaching
        Coordinate::new(37.0, -122.0),  // inside -> entry alert
        Coordinate::new(37.0001, -122.0), // still inside, no re-fire
        Coordinate::new(37.03, -122.0), // gone -> exit alert
    ];
    for coord in walk {
        backend
            .publish_location(&alice, LocationSample::new(coord, chrono::Utc::now()))
            .await?;
        tokio::time::sleep(step).await;
    }

    for pct in [55u8, 18] {
        backend
            .publish_battery(&alice, StatusSample::new(pct, chrono::Utc::now()))
            .await?;
        tokio::time::sleep(step).await;
    }

    backend.raise_sos(&alice).await?;
    tokio::time::sleep(step).await;

    Ok(())
}
