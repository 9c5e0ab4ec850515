use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use slotkeeper::clock::SystemClock;
use slotkeeper::config::Config;
use slotkeeper::coordinator::{Coordinator, Settings};
use slotkeeper::engine::Engine;
use slotkeeper::profile::InMemoryProfiles;
use slotkeeper::schedule::{InMemorySchedule, WeeklySchedule};
use slotkeeper::sweeper;

const COMPACTION_CHECK: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cfg = Config::from_env();
    if let Err(e) = slotkeeper::observability::init(cfg.metrics_port) {
        error!("metrics exporter failed to start: {e}");
    }

    std::fs::create_dir_all(&cfg.data_dir)?;

    let schedule = match &cfg.schedule_file {
        Some(path) => InMemorySchedule::load(path)?,
        None => {
            warn!("no schedule file configured, using courts A and B with default hours");
            InMemorySchedule::new()
                .with_resource("A", WeeklySchedule::default())
                .with_resource("B", WeeklySchedule::default())
        }
    };

    let profiles = match &cfg.profiles_file {
        Some(path) => InMemoryProfiles::load(path)?,
        None => {
            warn!("no profiles file configured, every member booking will be refused");
            InMemoryProfiles::new()
        }
    };
    let profiles_loaded = profiles.len();

    let clock = Arc::new(SystemClock::new(cfg.offset()));
    let engine = Arc::new(Engine::new(cfg.wal_path(), clock)?);
    let coordinator = Arc::new(Coordinator::new(
        engine.clone(),
        Arc::new(profiles),
        Arc::new(schedule),
        Settings::from(&cfg),
    ));

    info!("slotkeeper started");
    info!("  data_dir: {}", cfg.data_dir.display());
    info!("  bookings: {}", engine.booking_count().await);
    info!("  profiles: {}", profiles_loaded);
    info!("  weeks_ahead: {}", cfg.weeks_ahead);
    info!("  cancel_cutoff: {}m", cfg.cancel_cutoff_minutes);
    info!(
        "  metrics: {}",
        cfg.metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let materializer = tokio::spawn(sweeper::run_materializer(
        coordinator.clone(),
        cfg.sweep_interval,
    ));
    let compactor = tokio::spawn(sweeper::run_compactor(
        engine.clone(),
        cfg.compact_threshold,
        COMPACTION_CHECK,
    ));

    shutdown_signal().await;
    info!("shutdown signal received");

    materializer.abort();
    compactor.abort();
    if let Err(e) = engine.compact_wal().await {
        warn!("final compaction failed: {e}");
    }

    info!("slotkeeper stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
