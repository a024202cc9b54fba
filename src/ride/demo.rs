//! Synthetic ride data for Demo mode.

/// Power, cadence and speed at one instant of a demo ride.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemoSample {
    pub power_w: f64,
    pub cadence_rpm: f64,
    pub speed_mps: f64,
}

/// Slow sinusoids around a steady endurance effort.
///
/// Speed swings between 20 and 30 km/h, power between 150 and 250 W and
/// cadence between 70 and 90 rpm. The trajectory is a pure function of ride
/// time since it started, so pausing simply holds it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemoTrajectory {
    origin_s: f64,
}

impl DemoTrajectory {
    /// A trajectory starting at ride time `elapsed_s`.
    pub fn starting_at(elapsed_s: f64) -> Self {
        Self { origin_s: elapsed_s }
    }

    pub fn sample(&self, elapsed_s: f64) -> DemoSample {
        let t = (elapsed_s - self.origin_s).max(0.0);
        let speed_kmh = 25.0 + 5.0 * (t * 0.3).sin();
        DemoSample {
            power_w: 200.0 + 50.0 * (t * 0.5).sin(),
            cadence_rpm: 80.0 + 10.0 * (t * 0.4).sin(),
            speed_mps: speed_kmh / 3.6,
        }
    }
}
