//! Ride state monotonicity across pause, resume and link loss.

use crankride::ride::{ride_state, ControlConfig, RideController, RideSnapshot};
use crankride::sensors::ftms::TelemetrySample;
use crankride::world::route::{demo_route, RouteProfile};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn sample(power: i16) -> TelemetrySample {
    TelemetrySample {
        power_w: Some(power),
        cadence_rpm: Some(88.0),
        ..Default::default()
    }
}

#[test]
fn test_distance_and_time_never_decrease() {
    let route: Arc<dyn RouteProfile> = Arc::new(demo_route().unwrap());
    let (writer, reader) = ride_state(RideSnapshot::default());
    let start = Instant::now();
    let mut ctl = RideController::new(ControlConfig::default(), route, writer, true, start);
    ctl.enter_sim(start).unwrap();

    let mut last = (0.0, 0.0);
    let mut check = |s: &RideSnapshot| {
        assert!(s.distance_m >= last.0, "distance went backwards");
        assert!(s.elapsed_time_s >= last.1, "time went backwards");
        last = (s.distance_m, s.elapsed_time_s);
    };

    for step in 0u64..240 {
        // Mostly forward steps, with the occasional stale instant
        let offset = if step % 17 == 5 {
            step * 250 - 900
        } else {
            step * 250
        };
        let now = start + Duration::from_millis(offset);

        match step {
            40 => {
                ctl.pause(now);
            }
            60 => ctl.resume(now),
            100 => ctl.on_connection_lost(now, true),
            110 => ctl.on_reconnect_attempt(2),
            130 => {
                ctl.on_reconnected(now);
            }
            170 => {
                ctl.enter_erg(180, now).unwrap();
            }
            _ => {}
        }

        if step % 2 == 0 {
            ctl.on_telemetry(&sample(150 + (step % 7) as i16 * 20), now);
        } else {
            ctl.tick(now);
        }
        check(&reader.snapshot());
    }

    assert!(last.0 > 0.0);
}

#[test]
fn test_pause_freezes_until_resume() {
    let route: Arc<dyn RouteProfile> = Arc::new(demo_route().unwrap());
    let (writer, reader) = ride_state(RideSnapshot::default());
    let start = Instant::now();
    let mut ctl = RideController::new(ControlConfig::default(), route, writer, false, start);

    ctl.tick(start + Duration::from_secs(2));
    ctl.pause(start + Duration::from_secs(2));
    let paused = reader.snapshot();

    ctl.tick(start + Duration::from_secs(30));
    assert_eq!(reader.snapshot().distance_m, paused.distance_m);
    assert_eq!(reader.snapshot().elapsed_time_s, paused.elapsed_time_s);

    ctl.resume(start + Duration::from_secs(30));
    ctl.tick(start + Duration::from_secs(31));
    let resumed = reader.snapshot();
    assert!((resumed.elapsed_time_s - paused.elapsed_time_s - 1.0).abs() < 1e-9);
    assert!(resumed.distance_m > paused.distance_m);
}
