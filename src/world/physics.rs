//! Physics model for power-to-speed calculation
//!
//! Converts rider power into virtual speed on a graded road. Rather than
//! solving for the steady-state speed at once, each call takes a single damped
//! Newton step from the previous speed, so virtual speed carries some inertia
//! between control loop ticks.

/// Physics constants
const GRAVITY: f64 = 9.81; // m/s²
pub const DEFAULT_CRR: f64 = 0.004; // Rolling resistance for road tires
pub const DEFAULT_WIND_RESISTANCE: f64 = 0.51; // kg/m
const MAX_STEP_MPS: f64 = 1.5;
const MAX_SPEED_MPS: f64 = 30.0;
const DERIVATIVE_EPSILON: f64 = 1e-9;

/// Physics model for calculating virtual speed from power
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsModel {
    /// Rolling resistance coefficient
    pub crr: f64,
    /// Aerodynamic drag coefficient `k` in `k * v²` (N·s²/m²)
    pub drag_coefficient: f64,
    /// Largest speed change per step, in m/s
    pub max_step_mps: f64,
    /// Upper speed bound, in m/s
    pub max_speed_mps: f64,
}

impl Default for PhysicsModel {
    fn default() -> Self {
        Self::from_resistance(DEFAULT_CRR, DEFAULT_WIND_RESISTANCE)
    }
}

impl PhysicsModel {
    /// Build a model from the coefficients sent to the trainer in SIM mode.
    ///
    /// The drag coefficient is half the wind resistance coefficient.
    pub fn from_resistance(crr: f64, wind_resistance: f64) -> Self {
        Self {
            crr: crr.max(0.0),
            drag_coefficient: 0.5 * wind_resistance.max(0.0),
            max_step_mps: MAX_STEP_MPS,
            max_speed_mps: MAX_SPEED_MPS,
        }
    }

    /// Gravity plus rolling resistance, which does not depend on speed.
    fn grade_force(&self, grade_pct: f64, mass_kg: f64) -> f64 {
        let angle = (grade_pct / 100.0).atan();
        mass_kg * GRAVITY * (angle.sin() + self.crr * angle.cos())
    }

    /// Advance virtual speed by one damped Newton step.
    ///
    /// Solves `v * (R + k v²) = P` where `R` is the grade force. The step is
    /// capped at `max_step_mps`; when the derivative is not positive the speed
    /// moves by the cap in the direction of the net force instead.
    ///
    /// # Arguments
    /// * `power_w` - Current power output in watts (negative treated as zero)
    /// * `grade_pct` - Road grade as a percentage
    /// * `mass_kg` - Rider plus bike mass
    /// * `prior_speed_mps` - Speed at the previous tick
    pub fn virtual_speed(
        &self,
        power_w: f64,
        grade_pct: f64,
        mass_kg: f64,
        prior_speed_mps: f64,
    ) -> f64 {
        let power = power_w.max(0.0);
        let v = prior_speed_mps.clamp(0.0, self.max_speed_mps);
        let k = self.drag_coefficient;
        let r = self.grade_force(grade_pct, mass_kg);

        let f = k * v * v * v + r * v - power;
        let df = 3.0 * k * v * v + r;

        let step = if df > DERIVATIVE_EPSILON {
            (-f / df).clamp(-self.max_step_mps, self.max_step_mps)
        } else if r + k * v * v < 0.0 {
            // Net force pushes forward (descending faster than drag can hold)
            self.max_step_mps
        } else {
            -self.max_step_mps
        };

        (v + step).clamp(0.0, self.max_speed_mps)
    }
}

/// Virtual speed using the default coefficients.
pub fn virtual_speed(power_w: f64, grade_pct: f64, mass_kg: f64, prior_speed_mps: f64) -> f64 {
    PhysicsModel::default().virtual_speed(power_w, grade_pct, mass_kg, prior_speed_mps)
}

/// Distance covered at `speed_mps` over `dt_s` seconds. Negative time yields zero.
pub fn distance_increment(speed_mps: f64, dt_s: f64) -> f64 {
    if dt_s <= 0.0 {
        return 0.0;
    }
    speed_mps.max(0.0) * dt_s
}
