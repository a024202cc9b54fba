//! CrankRide - headless ride runner
//!
//! Loads the configuration and route, connects to the configured trainer (or
//! rides in Demo mode without one), records the ride and reports progress and
//! the ghost gap through the log.

use anyhow::{Context, Result};
use chrono::Local;
use crankride::recording::{spawn_logger, CsvRideHistory, GhostDelta, GhostEngine, RideLogger};
use crankride::ride::{RideSession, RideSummary, SessionHandle};
use crankride::sensors::transport::{BleTrainer, TrainerTransport};
use crankride::storage::config::{load_config, AppConfig};
use crankride::world::route::{create_demo_routes, demo_route, load_routes, RouteProfile};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting CrankRide v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config().context("Failed to load configuration")?;
    let route = select_route(&config)?;
    tracing::info!(
        "Riding '{}' ({:.1} km)",
        route.name(),
        route.total_distance_m() / 1000.0
    );

    let transport = connect_trainer(&config).await;

    let mut ghost = GhostEngine::new(CsvRideHistory::new(config.rides_dir()));
    if let Err(e) = ghost.load_best(route.name(), route.total_distance_m()) {
        tracing::info!("Riding without a ghost: {}", e);
    }

    let (session, handle) = RideSession::new(&config, route.clone(), transport);
    let mut ride = session.spawn();

    if config.ride.start_in_sim {
        if let Err(e) = handle.enter_sim().await {
            tracing::warn!("Could not enter SIM mode: {}", e);
        }
    }

    let logger = if config.recording.auto_record {
        let logger = RideLogger::create(&config.rides_dir(), route.name(), Local::now())
            .context("Failed to create ride log")?;
        Some(spawn_logger(
            logger,
            handle.reader(),
            config.recording.log_interval(),
        ))
    } else {
        None
    };

    let reporter = spawn_reporter(handle.clone(), ghost);

    let finished = tokio::select! {
        result = &mut ride => Some(result),
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            None
        }
    };
    let summary = match finished {
        Some(result) => result,
        None => {
            tracing::info!("Ending ride");
            if let Err(e) = handle.end().await {
                tracing::warn!("End request failed: {}", e);
            }
            ride.await
        }
    }
    .context("Ride session panicked")?;

    reporter.abort();

    if let Some(logger) = logger {
        let logger = logger.stop().await.context("Ride logger failed")?;
        if logger.rows() == 0 {
            logger.discard().context("Failed to discard empty ride log")?;
        } else {
            logger.finish().context("Failed to save ride log")?;
        }
    }

    report_summary(&summary)?;
    Ok(())
}

/// The configured route, the first route on disk, or the built-in one.
fn select_route(config: &AppConfig) -> Result<Arc<dyn RouteProfile>> {
    let routes_dir = config.routes_dir();
    create_demo_routes(&routes_dir).context("Failed to create demo routes")?;

    let mut routes = match load_routes(&routes_dir) {
        Ok(routes) => routes,
        Err(e) => {
            tracing::warn!("Failed to load routes: {}", e);
            Vec::new()
        }
    };

    let chosen = match &config.ride.route_name {
        Some(name) => {
            let index = routes.iter().position(|r| r.name() == name);
            if index.is_none() {
                tracing::warn!("Route '{}' not found, using the first available", name);
            }
            index.map(|i| routes.swap_remove(i))
        }
        None => None,
    };

    let route = match chosen.or_else(|| (!routes.is_empty()).then(|| routes.remove(0))) {
        Some(route) => route,
        None => demo_route().context("Built-in route is invalid")?,
    };
    let route: Arc<dyn RouteProfile> = Arc::new(route);
    Ok(route)
}

/// Connect to the configured trainer. Without one the ride runs in Demo mode.
async fn connect_trainer(config: &AppConfig) -> Option<Arc<dyn TrainerTransport>> {
    let Some(device_id) = &config.trainer.device_id else {
        tracing::info!("No trainer configured, riding in Demo mode");
        return None;
    };

    match BleTrainer::connect(device_id, config.trainer.connection_timeout()).await {
        Ok(trainer) => {
            let trainer: Arc<dyn TrainerTransport> = Arc::new(trainer);
            Some(trainer)
        }
        Err(e) => {
            tracing::warn!("Trainer unavailable ({}), riding in Demo mode", e);
            None
        }
    }
}

fn describe_delta(delta: &GhostDelta) -> String {
    let gap = delta.time_delta_s.abs();
    if gap < 0.5 {
        return "level with ghost".to_string();
    }
    let side = if delta.is_behind() { "behind" } else { "ahead of" };
    format!(
        "{:.1}s {} ghost ({:+.0}m)",
        gap, side, -delta.distance_delta_m
    )
}

/// Log ride progress every few seconds until aborted.
fn spawn_reporter(handle: SessionHandle, ghost: GhostEngine<CsvRideHistory>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reader = handle.reader();
        let mut ticker = tokio::time::interval(REPORT_INTERVAL);
        loop {
            ticker.tick().await;
            if reader.is_closed() {
                return;
            }
            let s = reader.snapshot();
            let ghost = ghost
                .delta_for(&s)
                .map(|delta| describe_delta(&delta))
                .unwrap_or_else(|| "no ghost".to_string());

            tracing::info!(
                "{} | {:.0}s {:.2} km | {:.0} W {:.0} rpm {:.1} km/h | grade {:.1}% | {} | {}",
                s.mode,
                s.elapsed_time_s,
                s.distance_m / 1000.0,
                s.power_w,
                s.cadence_rpm,
                s.speed_kmh(),
                s.grade_pct,
                s.connection_status,
                ghost
            );
        }
    })
}

fn report_summary(summary: &RideSummary) -> Result<()> {
    tracing::info!(
        "Ride over: {:.2} km in {:.0}s, avg {:.0} W, max {:.0} W, {:.0} m climbed{}",
        summary.distance_m / 1000.0,
        summary.elapsed_time_s,
        summary.avg_power_w,
        summary.max_power_w,
        summary.elevation_gain_m,
        if summary.completed { ", route complete" } else { "" }
    );
    let json = serde_json::to_string(summary).context("Failed to serialize ride summary")?;
    tracing::debug!("Summary: {}", json);
    Ok(())
}
