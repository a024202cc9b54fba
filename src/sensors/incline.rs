//! Grade smoothing and rate limiting for SIM mode.
//!
//! Route grade is noisy at short distances, and trainers react badly to large
//! resistance steps. [`GradeSmoother`] averages the grade over a trailing
//! distance window and then limits how fast the emitted target may change.
//! It does not decide when a target is sent; the control loop owns that cadence.

use std::collections::VecDeque;
use std::time::Instant;

/// Default trailing window, in meters.
pub const DEFAULT_WINDOW_M: f64 = 50.0;

/// Default maximum rate of change of the emitted grade, in percent per second.
pub const DEFAULT_MAX_RATE_PCT_PER_S: f64 = 1.0;

/// Smallest and largest accepted resistance scale.
pub const RESISTANCE_SCALE_RANGE: (f64, f64) = (0.5, 1.5);

/// Smooths raw route grade into a bounded, slowly changing target.
#[derive(Debug, Clone)]
pub struct GradeSmoother {
    window_m: f64,
    max_rate: f64,
    /// `(distance_m, grade_pct)` samples within the trailing window
    samples: VecDeque<(f64, f64)>,
    last_emitted: f64,
    last_emitted_at: Instant,
}

impl GradeSmoother {
    /// Create a smoother whose baseline is a 0 % emission at `now`.
    pub fn new(window_m: f64, max_rate_pct_per_s: f64, now: Instant) -> Self {
        Self {
            window_m: window_m.max(0.0),
            max_rate: max_rate_pct_per_s.max(0.0),
            samples: VecDeque::new(),
            last_emitted: 0.0,
            last_emitted_at: now,
        }
    }

    /// Record the raw grade at a distance.
    ///
    /// A distance smaller than the latest sample restarts the window.
    pub fn push(&mut self, distance_m: f64, grade_pct: f64) {
        if let Some(&(latest, _)) = self.samples.back() {
            if distance_m < latest {
                self.samples.clear();
            }
        }
        self.samples.push_back((distance_m, grade_pct));

        let cutoff = distance_m - self.window_m;
        while let Some(&(d, _)) = self.samples.front() {
            if d < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Mean grade over the window, or the last emission when it is empty.
    pub fn window_mean(&self) -> f64 {
        if self.samples.is_empty() {
            return self.last_emitted;
        }
        let sum: f64 = self.samples.iter().map(|(_, g)| g).sum();
        sum / self.samples.len() as f64
    }

    /// Rate-limited target at `now`.
    ///
    /// Moves from the previous emission toward the window mean by at most
    /// `max_rate * dt`. Calling twice with the same `now` returns the same value.
    pub fn current_target(&mut self, now: Instant) -> f64 {
        let dt = now
            .saturating_duration_since(self.last_emitted_at)
            .as_secs_f64();
        let max_step = self.max_rate * dt;
        let delta = (self.window_mean() - self.last_emitted).clamp(-max_step, max_step);

        self.last_emitted += delta;
        self.last_emitted_at = self.last_emitted_at.max(now);
        self.last_emitted
    }

    /// Last emitted target without advancing.
    pub fn last_emitted(&self) -> f64 {
        self.last_emitted
    }

    /// Restart the rate limiter clock at `now`, keeping the last emission.
    ///
    /// Used after a pause so the time spent paused does not unlock a large step.
    pub fn reset_baseline(&mut self, now: Instant) {
        self.last_emitted_at = now;
    }

    pub fn window_len(&self) -> usize {
        self.samples.len()
    }
}

/// Apply the SIM difficulty multiplier to a grade.
pub fn apply_resistance_scale(grade_pct: f64, scale: f64) -> f64 {
    let (min, max) = RESISTANCE_SCALE_RANGE;
    grade_pct * scale.clamp(min, max)
}
