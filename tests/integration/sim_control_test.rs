//! SIM mode from decoded telemetry to outbound commands.

use crankride::ride::{ride_state, ControlConfig, RideController, RideMode, RideSnapshot};
use crankride::sensors::ftms::{decode_telemetry, ControlCommand};
use crankride::world::route::{RouteGeometry, RoutePoint, RouteProfile};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn constant_grade_route(grade_pct: f64) -> Arc<dyn RouteProfile> {
    let length = 10_000.0;
    Arc::new(
        RouteGeometry::new(
            format!("Grade {grade_pct}"),
            vec![
                RoutePoint {
                    distance_m: 0.0,
                    elevation_m: 0.0,
                },
                RoutePoint {
                    distance_m: length,
                    elevation_m: length * grade_pct / 100.0,
                },
            ],
        )
        .unwrap(),
    )
}

/// Route that serves grades in lookup order, then repeats the last one.
struct ScriptedGrades {
    grades: Vec<f64>,
    lookups: AtomicUsize,
}

impl ScriptedGrades {
    fn new(grades: &[f64]) -> Self {
        Self {
            grades: grades.to_vec(),
            lookups: AtomicUsize::new(0),
        }
    }
}

impl RouteProfile for ScriptedGrades {
    fn name(&self) -> &str {
        "Scripted"
    }

    fn grade_at(&self, _distance_m: f64) -> f64 {
        let i = self.lookups.fetch_add(1, Ordering::SeqCst);
        self.grades[i.min(self.grades.len() - 1)]
    }

    fn elevation_at(&self, _distance_m: f64) -> f64 {
        0.0
    }

    fn total_distance_m(&self) -> f64 {
        10_000.0
    }
}

fn sim_speed_after(route: Arc<dyn RouteProfile>, frame: &[u8], seconds: u64) -> f64 {
    let (writer, reader) = ride_state(RideSnapshot::default());
    let start = Instant::now();
    let mut ctl = RideController::new(ControlConfig::default(), route, writer, true, start);
    ctl.enter_sim(start).unwrap();

    let sample = decode_telemetry(frame).unwrap();
    for i in 1..=seconds * 4 {
        ctl.on_telemetry(&sample, start + Duration::from_millis(i * 250));
    }
    let snapshot = reader.snapshot();
    snapshot.speed_mps
}

#[test]
fn test_power_only_frame_is_slower_uphill() {
    // Power 200 W and cadence 85 rpm, no speed or distance
    let frame = [0x45, 0x00, 170, 0x00, 200, 0x00];
    let sample = decode_telemetry(&frame).unwrap();
    assert_eq!(sample.speed_mps, None);
    assert_eq!(sample.distance_m, None);

    let uphill = sim_speed_after(constant_grade_route(5.0), &frame, 30);
    let flat = sim_speed_after(constant_grade_route(0.0), &frame, 30);

    assert!(uphill > 0.0);
    assert!(uphill < flat, "5% ({uphill} m/s) should be slower than 0% ({flat} m/s)");
}

fn run_scripted_sim(config: ControlConfig) -> Vec<ControlCommand> {
    // The first lookup happens when the ride starts at distance 0
    let route = Arc::new(ScriptedGrades::new(&[0.0, 2.0, 2.0, 8.0, 2.0]));
    let (writer, _reader) = ride_state(RideSnapshot::default());
    let start = Instant::now();
    let mut ctl = RideController::new(config, route, writer, true, start);

    let entry = ctl.enter_sim(start).unwrap();
    assert_eq!(
        entry,
        vec![ControlCommand::RequestControl, ControlCommand::StartOrResume]
    );
    assert_eq!(ctl.snapshot().mode, RideMode::Sim);

    let frame = [0x45, 0x00, 170, 0x00, 200, 0x00];
    let sample = decode_telemetry(&frame).unwrap();

    let mut commands = Vec::new();
    for i in 1..=4u64 {
        let outcome = ctl.on_telemetry(&sample, start + Duration::from_millis(i * 500));
        commands.extend(outcome.commands);
    }
    assert!(ctl.snapshot().distance_m < 50.0);
    commands
}

fn single_sim_grade(commands: &[ControlCommand]) -> f64 {
    let grades: Vec<f64> = commands
        .iter()
        .filter_map(|c| match c {
            ControlCommand::SetSimulationParameters { grade_pct, .. } => Some(*grade_pct),
            _ => None,
        })
        .collect();
    assert_eq!(grades.len(), 1, "expected exactly one SIM command: {commands:?}");
    grades[0]
}

#[test]
fn test_one_rate_limited_sim_command_at_boundary() {
    let commands = run_scripted_sim(ControlConfig::default());

    // Window mean is 3.5 %, but 2 s at 1 %/s only allows 2 % from the 0 % baseline
    let grade = single_sim_grade(&commands);
    assert!((grade - 2.0).abs() < 1e-9);
}

#[test]
fn test_sim_command_carries_window_mean() {
    let config = ControlConfig {
        max_grade_rate_pct_per_s: 10.0,
        ..ControlConfig::default()
    };
    let commands = run_scripted_sim(config);

    let grade = single_sim_grade(&commands);
    assert!((grade - 3.5).abs() < 1e-9);
}

#[test]
fn test_resistance_scale_applies_to_emitted_grade() {
    let config = ControlConfig {
        max_grade_rate_pct_per_s: 10.0,
        resistance_scale: 1.5,
        ..ControlConfig::default()
    };
    let grade = single_sim_grade(&run_scripted_sim(config));
    assert!((grade - 5.25).abs() < 1e-9);
}
