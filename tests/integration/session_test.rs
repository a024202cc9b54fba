//! Ride sessions against the simulated trainer.

use crankride::ride::{RideMode, RideSession};
use crankride::sensors::ftms::{ControlCommand, TelemetrySample};
use crankride::sensors::types::ConnectionStatus;
use crankride::sensors::SimulatedTrainer;
use crankride::storage::config::AppConfig;
use crankride::world::route::{RouteGeometry, RoutePoint, RouteProfile};
use std::sync::Arc;
use std::time::Duration;

fn flat_route(length_m: f64) -> Arc<dyn RouteProfile> {
    Arc::new(
        RouteGeometry::new(
            "Flat",
            vec![
                RoutePoint {
                    distance_m: 0.0,
                    elevation_m: 0.0,
                },
                RoutePoint {
                    distance_m: length_m,
                    elevation_m: 0.0,
                },
            ],
        )
        .unwrap(),
    )
}

fn sample(power: i16) -> TelemetrySample {
    TelemetrySample {
        power_w: Some(power),
        cadence_rpm: Some(90.0),
        ..Default::default()
    }
}

async fn ride_for(trainer: &SimulatedTrainer, ticks: u32) {
    for _ in 0..ticks {
        trainer.push_sample(sample(200)).await;
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_preserves_distance_and_time() {
    let trainer = Arc::new(SimulatedTrainer::new());
    let (session, handle) =
        RideSession::new(&AppConfig::default(), flat_route(10_000.0), Some(trainer.clone()));
    let ride = session.spawn();

    handle.enter_erg(200).await.unwrap();
    ride_for(&trainer, 12).await;

    let mut reader = handle.reader();
    trainer.fail_next_reconnects(1);
    trainer.drop_link();

    // Wait for the loop to notice the loss
    let at_loss = loop {
        let s = reader.snapshot();
        if !s.connection_status.is_connected() {
            break s;
        }
        assert!(reader.changed().await);
    };
    assert!(at_loss.distance_m > 0.0);

    // One failed attempt (1 s), then a successful one (2 s)
    let mut saw_reconnecting = false;
    let reconnected = loop {
        assert!(reader.changed().await);
        let s = reader.snapshot();
        match s.connection_status {
            ConnectionStatus::Connected => break s,
            ConnectionStatus::Reconnecting { .. } => {
                saw_reconnecting = true;
                assert_eq!(s.distance_m, at_loss.distance_m);
                assert_eq!(s.elapsed_time_s, at_loss.elapsed_time_s);
                assert_eq!(s.mode, RideMode::Erg { target_watts: 200 });
            }
            ConnectionStatus::Disconnected => panic!("reconnection gave up"),
        }
    };
    assert!(saw_reconnecting);
    assert_eq!(trainer.reconnect_attempts(), 2);
    assert_eq!(reconnected.distance_m, at_loss.distance_m);
    assert_eq!(reconnected.elapsed_time_s, at_loss.elapsed_time_s);

    // Riding continues from where it stopped
    ride_for(&trainer, 8).await;
    let after = handle.snapshot();
    assert!(after.distance_m > at_loss.distance_m);
    assert!(after.elapsed_time_s - at_loss.elapsed_time_s <= 2.0 + 1e-9);

    // Control was taken again after the reconnect
    let requests = trainer
        .written_commands()
        .into_iter()
        .filter(|c| *c == ControlCommand::RequestControl)
        .count();
    assert_eq!(requests, 2);

    handle.end().await.unwrap();
    let summary = ride.await.unwrap();
    assert!(summary.distance_m >= after.distance_m);
    assert!(!summary.completed);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_reconnect_leaves_ride_degraded() {
    let trainer = Arc::new(SimulatedTrainer::new());
    let mut config = AppConfig::default();
    config.trainer.max_reconnect_attempts = 2;
    let (session, handle) = RideSession::new(&config, flat_route(10_000.0), Some(trainer.clone()));
    let ride = session.spawn();

    ride_for(&trainer, 4).await;

    trainer.fail_next_reconnects(10);
    trainer.drop_link();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let s = handle.snapshot();
    assert_eq!(s.connection_status, ConnectionStatus::Disconnected);
    assert_eq!(trainer.reconnect_attempts(), 2);

    // The session keeps answering requests
    handle.pause().await.unwrap();
    assert!(handle.snapshot().paused);

    handle.end().await.unwrap();
    ride.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_erg_commands_reach_trainer_in_order() {
    let trainer = Arc::new(SimulatedTrainer::new());
    let (session, handle) =
        RideSession::new(&AppConfig::default(), flat_route(10_000.0), Some(trainer.clone()));
    let ride = session.spawn();

    handle.enter_erg(180).await.unwrap();
    handle.set_erg_target(220).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        trainer.written_commands(),
        vec![
            ControlCommand::RequestControl,
            ControlCommand::StartOrResume,
            ControlCommand::SetTargetPower(180),
            ControlCommand::SetTargetPower(220),
        ]
    );

    handle.exit_control().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.end().await.unwrap();
    ride.await.unwrap();
    assert_eq!(trainer.written_commands().last(), Some(&ControlCommand::Reset));
}

#[tokio::test(start_paused = true)]
async fn test_demo_session_completes_route() {
    let (session, handle) = RideSession::new(&AppConfig::default(), flat_route(200.0), None);
    let ride = session.spawn();

    let summary = ride.await.unwrap();
    assert!(summary.completed);
    assert_eq!(summary.distance_m, 200.0);
    assert!(summary.avg_power_w >= 150.0);

    // The session is gone, so requests fail
    assert!(handle.pause().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_bypasses_queue() {
    let trainer = Arc::new(SimulatedTrainer::new());
    let (session, handle) =
        RideSession::new(&AppConfig::default(), flat_route(10_000.0), Some(trainer.clone()));
    let ride = session.spawn();

    handle.emergency_stop().await.unwrap();

    // Written before the request returned
    assert_eq!(
        trainer.written_commands(),
        vec![
            ControlCommand::RequestControl,
            ControlCommand::StartOrResume,
            ControlCommand::SetTargetPower(0),
        ]
    );
    assert_eq!(handle.snapshot().mode, RideMode::Erg { target_watts: 0 });

    handle.end().await.unwrap();
    ride.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_bad_frames_are_counted_and_ride_continues() {
    let trainer = Arc::new(SimulatedTrainer::new());
    let (session, handle) =
        RideSession::new(&AppConfig::default(), flat_route(10_000.0), Some(trainer.clone()));
    let ride = session.spawn();

    handle.enter_erg(200).await.unwrap();
    ride_for(&trainer, 4).await;
    let before = handle.snapshot();

    // Truncated power field, then reserved flag bits
    assert!(trainer.push_frame(vec![0x40, 0x00, 0xC8]).await);
    assert!(trainer.push_frame(vec![0x00, 0xE0, 0x00, 0x00]).await);
    ride_for(&trainer, 4).await;

    let after = handle.snapshot();
    assert_eq!(after.dropped_frames, 2);
    assert_eq!(after.power_w, 200.0);
    assert!(after.distance_m > before.distance_m);
    assert!(after.elapsed_time_s > before.elapsed_time_s);
    assert!(after.connection_status.is_connected());

    handle.end().await.unwrap();
    let summary = ride.await.unwrap();
    assert_eq!(summary.dropped_frames, 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_sim_write_recovers_on_next_cadence() {
    let trainer = Arc::new(SimulatedTrainer::new());
    let (session, handle) =
        RideSession::new(&AppConfig::default(), flat_route(10_000.0), Some(trainer.clone()));
    let ride = session.spawn();

    let sim_commands = |trainer: &SimulatedTrainer| {
        trainer
            .written_commands()
            .into_iter()
            .filter(|c| matches!(c, ControlCommand::SetSimulationParameters { .. }))
            .count()
    };

    handle.enter_sim().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        trainer.written_commands(),
        vec![ControlCommand::RequestControl, ControlCommand::StartOrResume]
    );

    // The first grade falls due 2 s after entry and is lost
    trainer.set_fail_writes(true);
    ride_for(&trainer, 9).await;
    assert_eq!(sim_commands(&trainer), 0);
    assert!(handle.snapshot().connection_status.is_connected());

    // The next cadence gets through without any retry logic
    trainer.set_fail_writes(false);
    ride_for(&trainer, 8).await;
    assert_eq!(sim_commands(&trainer), 1);
    assert_eq!(trainer.written_commands().len(), 3);

    handle.end().await.unwrap();
    ride.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_trainer_offline_at_start_is_reconnected() {
    let trainer = Arc::new(SimulatedTrainer::new());
    trainer.drop_link();

    let (session, handle) =
        RideSession::new(&AppConfig::default(), flat_route(10_000.0), Some(trainer.clone()));
    let ride = session.spawn();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let s = handle.snapshot();
    assert_eq!(s.mode, RideMode::Demo);
    assert!(matches!(
        s.connection_status,
        ConnectionStatus::Reconnecting { .. }
    ));

    // First attempt after 1 s
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(trainer.reconnect_attempts(), 1);
    assert!(handle.snapshot().connection_status.is_connected());

    handle.toggle_demo_live().await.unwrap();
    assert!(trainer.push_sample(sample(180)).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let s = handle.snapshot();
    assert_eq!(s.mode, RideMode::Live);
    assert_eq!(s.power_w, 180.0);

    handle.end().await.unwrap();
    ride.await.unwrap();
}
