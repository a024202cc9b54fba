//! Ride logs read back as ghosts.

use chrono::{Duration as ChronoDuration, Local, TimeZone};
use crankride::recording::{
    spawn_logger, CsvRideHistory, GhostEngine, GhostError, RideHistory, RideLogger,
};
use crankride::ride::{RideMode, RideSession, RideSnapshot};
use crankride::storage::config::AppConfig;
use crankride::world::route::{RouteGeometry, RoutePoint, RouteProfile};
use std::sync::Arc;
use tempfile::TempDir;

/// Log a steady ride of `seconds` at `speed_mps`.
fn log_ride(dir: &std::path::Path, route: &str, start_offset_min: i64, speed_mps: f64, seconds: u32) {
    let started_at = Local.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
        + ChronoDuration::minutes(start_offset_min);
    let mut logger = RideLogger::create(dir, route, started_at).unwrap();

    for t in 1..=seconds {
        let snapshot = RideSnapshot {
            mode: RideMode::Sim,
            elapsed_time_s: f64::from(t),
            distance_m: speed_mps * f64::from(t),
            speed_mps,
            power_w: 210.0,
            cadence_rpm: 90.0,
            resistance_scale: 1.0,
            recording: true,
            ..RideSnapshot::default()
        };
        logger
            .write_row(&snapshot, started_at + ChronoDuration::seconds(i64::from(t)))
            .unwrap();
    }
    logger.finish().unwrap();
}

#[test]
fn test_fastest_logged_ride_becomes_ghost() {
    let dir = TempDir::new().unwrap();
    log_ride(dir.path(), "Hill Loop", 0, 8.0, 125);
    log_ride(dir.path(), "Hill Loop", 10, 10.0, 100);
    log_ride(dir.path(), "Hill Loop", 20, 12.0, 40);
    log_ride(dir.path(), "Other", 30, 20.0, 60);

    let history = CsvRideHistory::new(dir.path());
    assert_eq!(history.rides_for_route("Hill Loop").unwrap().len(), 3);

    let mut engine = GhostEngine::new(history);
    let ghost = engine.load_best("Hill Loop", 1000.0).unwrap();
    assert_eq!(ghost.total_time_s(), 100.0);

    // Rider at 500 m after 60 s; ghost was there at 50 s and is at 600 m
    let delta = engine.delta_at(500.0, 60.0).unwrap();
    assert!((delta.time_delta_s - 10.0).abs() < 1e-6);
    assert!((delta.distance_delta_m - 100.0).abs() < 1e-6);

    let candidates = engine.candidates("Hill Loop", 1000.0).unwrap();
    assert_eq!(candidates.len(), 3);
    assert_eq!(candidates[0].total_time_s, 40.0);
    assert!(!candidates[0].complete);
    assert!(candidates[1].complete && candidates[2].complete);
}

#[test]
fn test_no_ghost_for_unridden_route() {
    let dir = TempDir::new().unwrap();
    log_ride(dir.path(), "Hill Loop", 0, 10.0, 100);

    let mut engine = GhostEngine::new(CsvRideHistory::new(dir.path()));
    assert!(matches!(
        engine.load_best("Coast Road", 1000.0),
        Err(GhostError::NotFound(_))
    ));
    assert!(engine.delta_at(100.0, 10.0).is_none());
}

#[test]
fn test_discarded_ride_is_not_a_ghost() {
    let dir = TempDir::new().unwrap();
    let logger = RideLogger::create(dir.path(), "Hill Loop", Local::now()).unwrap();
    logger.discard().unwrap();

    let history = CsvRideHistory::new(dir.path());
    assert!(history.rides_for_route("Hill Loop").unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_completed_session_becomes_ghost() {
    let dir = TempDir::new().unwrap();
    let route: Arc<dyn RouteProfile> = Arc::new(
        RouteGeometry::new(
            "Loop",
            vec![
                RoutePoint {
                    distance_m: 0.0,
                    elevation_m: 0.0,
                },
                RoutePoint {
                    distance_m: 300.0,
                    elevation_m: 0.0,
                },
            ],
        )
        .unwrap(),
    );

    let config = AppConfig::default();
    let (session, handle) = RideSession::new(&config, route, None);
    let logger = RideLogger::create(dir.path(), "Loop", Local::now()).unwrap();
    let logging = spawn_logger(logger, handle.reader(), config.recording.log_interval());

    let summary = session.spawn().await.unwrap();
    assert!(summary.completed);
    assert_eq!(summary.distance_m, 300.0);

    let path = logging.stop().await.unwrap().finish().unwrap();
    let content = std::fs::read_to_string(path).unwrap();
    let last: Vec<&str> = content.lines().last().unwrap().split(',').collect();
    assert_eq!(last[2], "300.0");

    let mut engine = GhostEngine::new(CsvRideHistory::new(dir.path()));
    let ghost = engine.load_best("Loop", 300.0).unwrap();
    assert_eq!(ghost.total_distance_m(), 300.0);
    assert!((ghost.total_time_s() - summary.elapsed_time_s).abs() <= 0.05 + 1e-9);
}
