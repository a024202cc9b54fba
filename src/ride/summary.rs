//! End-of-ride summary.

use crate::ride::state::RideSnapshot;
use serde::Serialize;

/// Totals produced when a ride session ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RideSummary {
    pub route_name: String,
    pub elapsed_time_s: f64,
    pub distance_m: f64,
    /// Energy divided by ride time
    pub avg_power_w: f64,
    pub max_power_w: f64,
    pub avg_speed_mps: f64,
    /// Mechanical work in kilojoules
    pub energy_kj: f64,
    /// Sum of elevation increases along the ridden part of the route
    pub elevation_gain_m: f64,
    pub completed: bool,
    pub dropped_frames: u64,
}

/// Running totals fed by the control loop on every advancing tick.
#[derive(Debug, Clone, Default)]
pub struct SummaryAccumulator {
    energy_j: f64,
    max_power_w: f64,
    elevation_gain_m: f64,
    last_elevation_m: Option<f64>,
}

impl SummaryAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for `dt_s` seconds at `power_w`, ending at `elevation_m`.
    pub fn record(&mut self, power_w: f64, dt_s: f64, elevation_m: f64) {
        let power = power_w.max(0.0);
        if dt_s > 0.0 {
            self.energy_j += power * dt_s;
        }
        self.max_power_w = self.max_power_w.max(power);

        if let Some(last) = self.last_elevation_m {
            if elevation_m > last {
                self.elevation_gain_m += elevation_m - last;
            }
        }
        self.last_elevation_m = Some(elevation_m);
    }

    pub fn finish(&self, route_name: &str, snapshot: &RideSnapshot) -> RideSummary {
        let elapsed = snapshot.elapsed_time_s;
        let (avg_power_w, avg_speed_mps) = if elapsed > 0.0 {
            (self.energy_j / elapsed, snapshot.distance_m / elapsed)
        } else {
            (0.0, 0.0)
        };

        RideSummary {
            route_name: route_name.to_string(),
            elapsed_time_s: elapsed,
            distance_m: snapshot.distance_m,
            avg_power_w,
            max_power_w: self.max_power_w,
            avg_speed_mps,
            energy_kj: self.energy_j / 1000.0,
            elevation_gain_m: self.elevation_gain_m,
            completed: snapshot.completed,
            dropped_frames: snapshot.dropped_frames,
        }
    }
}
