//! Ghost comparisons against the best prior ride on a route.
//!
//! A ghost is a prior ride reduced to `(distance_m, elapsed_time_s)` points.
//! While riding, the rider's distance and elapsed time are compared against
//! it: the time delta is how far behind (positive) the rider is at the same
//! distance, the distance delta is how far ahead (positive) the ghost is at
//! the same elapsed time.

use crate::recording::history::{HistoryError, RecordedRide, RideHistory};
use crate::ride::state::RideSnapshot;
use std::path::PathBuf;
use thiserror::Error;

/// Tolerance when deciding whether a ride covered the full route.
pub const COMPLETION_TOLERANCE_M: f64 = 1.0;
/// Rides shorter than this are not worth racing.
pub const MIN_RIDE_TIME_S: f64 = 5.0;
pub const MIN_RIDE_DISTANCE_M: f64 = 10.0;

#[derive(Debug, Error)]
pub enum GhostError {
    #[error("No complete prior ride for route '{0}'")]
    NotFound(String),

    #[error("Malformed ghost trace: {0}")]
    Malformed(String),

    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Point on a ghost trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GhostPoint {
    pub distance_m: f64,
    pub elapsed_time_s: f64,
}

/// A prior ride as distance/time pairs, strictly increasing in distance.
#[derive(Debug, Clone, PartialEq)]
pub struct GhostTrace {
    points: Vec<GhostPoint>,
}

impl GhostTrace {
    /// Build a trace from points already strictly increasing in distance.
    pub fn new(points: Vec<GhostPoint>) -> Result<Self, GhostError> {
        if points.len() < 2 {
            return Err(GhostError::Malformed(format!(
                "need at least 2 points, got {}",
                points.len()
            )));
        }
        let finite = points
            .iter()
            .all(|p| p.distance_m.is_finite() && p.elapsed_time_s.is_finite());
        if !finite {
            return Err(GhostError::Malformed("non-finite point".to_string()));
        }
        let increasing = points.windows(2).all(|w| {
            w[1].distance_m > w[0].distance_m && w[1].elapsed_time_s >= w[0].elapsed_time_s
        });
        if !increasing {
            return Err(GhostError::Malformed(
                "points must increase in distance and time".to_string(),
            ));
        }
        Ok(Self { points })
    }

    /// Build a trace from logged `(elapsed_time_s, distance_m)` samples.
    ///
    /// Samples are ordered by time and only the first time each new distance
    /// is reached is kept, so stationary stretches and pauses collapse.
    pub fn from_samples(samples: &[(f64, f64)]) -> Result<Self, GhostError> {
        let mut ordered: Vec<(f64, f64)> = samples
            .iter()
            .copied()
            .filter(|(t, d)| t.is_finite() && d.is_finite())
            .collect();
        ordered.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut points: Vec<GhostPoint> = Vec::with_capacity(ordered.len());
        for (elapsed_time_s, distance_m) in ordered {
            let advances = points
                .last()
                .map_or(true, |last| distance_m > last.distance_m);
            if advances {
                points.push(GhostPoint {
                    distance_m,
                    elapsed_time_s,
                });
            }
        }
        Self::new(points)
    }

    pub fn points(&self) -> &[GhostPoint] {
        &self.points
    }

    fn first(&self) -> GhostPoint {
        self.points[0]
    }

    fn last(&self) -> GhostPoint {
        self.points[self.points.len() - 1]
    }

    pub fn total_time_s(&self) -> f64 {
        self.last().elapsed_time_s
    }

    pub fn total_distance_m(&self) -> f64 {
        self.last().distance_m
    }

    /// Ghost's elapsed time when it reached `distance_m`, clamped to the trace.
    pub fn time_at_distance(&self, distance_m: f64) -> f64 {
        if distance_m <= self.first().distance_m {
            return self.first().elapsed_time_s;
        }
        if distance_m >= self.total_distance_m() {
            return self.total_time_s();
        }
        let i = self.points.partition_point(|p| p.distance_m <= distance_m);
        let (a, b) = (self.points[i - 1], self.points[i]);
        let t = (distance_m - a.distance_m) / (b.distance_m - a.distance_m);
        a.elapsed_time_s + t * (b.elapsed_time_s - a.elapsed_time_s)
    }

    /// Ghost's distance at `elapsed_s`, clamped to the trace.
    pub fn distance_at_time(&self, elapsed_s: f64) -> f64 {
        if elapsed_s <= self.first().elapsed_time_s {
            return self.first().distance_m;
        }
        if elapsed_s >= self.total_time_s() {
            return self.total_distance_m();
        }
        let i = self.points.partition_point(|p| p.elapsed_time_s <= elapsed_s);
        let (a, b) = (self.points[i - 1], self.points[i]);
        let span = b.elapsed_time_s - a.elapsed_time_s;
        if span <= 0.0 {
            return b.distance_m;
        }
        let t = (elapsed_s - a.elapsed_time_s) / span;
        a.distance_m + t * (b.distance_m - a.distance_m)
    }
}

/// Rider versus ghost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GhostDelta {
    /// Positive when the rider is behind
    pub time_delta_s: f64,
    /// Positive when the ghost is ahead
    pub distance_delta_m: f64,
}

impl GhostDelta {
    pub fn is_behind(&self) -> bool {
        self.time_delta_s > 0.0
    }
}

/// A prior ride listed for selection.
#[derive(Debug, Clone, PartialEq)]
pub struct GhostCandidate {
    pub path: PathBuf,
    pub total_time_s: f64,
    pub total_distance_m: f64,
    /// Reached the route's full distance
    pub complete: bool,
}

/// Loads ghosts from ride history and compares the rider against the best.
pub struct GhostEngine<H: RideHistory> {
    history: H,
    best: Option<(PathBuf, GhostTrace)>,
}

impl<H: RideHistory> GhostEngine<H> {
    pub fn new(history: H) -> Self {
        Self {
            history,
            best: None,
        }
    }

    /// Currently loaded ghost.
    pub fn best(&self) -> Option<&GhostTrace> {
        self.best.as_ref().map(|(_, trace)| trace)
    }

    pub fn best_path(&self) -> Option<&PathBuf> {
        self.best.as_ref().map(|(path, _)| path)
    }

    pub fn clear(&mut self) {
        self.best = None;
    }

    /// Load the fastest prior ride that covered the whole route.
    ///
    /// Replaces any previously loaded ghost. On error no ghost is loaded.
    pub fn load_best(
        &mut self,
        route_id: &str,
        route_distance_m: f64,
    ) -> Result<&GhostTrace, GhostError> {
        self.best = None;

        let rides = self.history.rides_for_route(route_id)?;
        if rides.is_empty() {
            return Err(GhostError::NotFound(route_id.to_string()));
        }

        let traces = parse_rides(rides);
        if traces.is_empty() {
            return Err(GhostError::Malformed(format!(
                "no usable prior ride for route '{}'",
                route_id
            )));
        }

        let best = traces
            .into_iter()
            .filter(|(_, trace)| is_complete(trace, route_distance_m))
            .min_by(|a, b| a.1.total_time_s().total_cmp(&b.1.total_time_s()))
            .ok_or_else(|| GhostError::NotFound(route_id.to_string()))?;

        tracing::info!(
            "Loaded ghost {} ({:.0}s over {:.0}m)",
            best.0.display(),
            best.1.total_time_s(),
            best.1.total_distance_m()
        );
        Ok(&self.best.insert(best).1)
    }

    /// Every usable prior ride on the route, fastest first.
    pub fn candidates(
        &self,
        route_id: &str,
        route_distance_m: f64,
    ) -> Result<Vec<GhostCandidate>, GhostError> {
        let rides = self.history.rides_for_route(route_id)?;
        let mut candidates: Vec<GhostCandidate> = parse_rides(rides)
            .into_iter()
            .map(|(path, trace)| GhostCandidate {
                complete: is_complete(&trace, route_distance_m),
                total_time_s: trace.total_time_s(),
                total_distance_m: trace.total_distance_m(),
                path,
            })
            .collect();
        candidates.sort_by(|a, b| a.total_time_s.total_cmp(&b.total_time_s));
        Ok(candidates)
    }

    /// Compare a rider at `distance_m` after `elapsed_s` against the ghost.
    pub fn delta_at(&self, distance_m: f64, elapsed_s: f64) -> Option<GhostDelta> {
        let trace = self.best()?;
        Some(GhostDelta {
            time_delta_s: elapsed_s - trace.time_at_distance(distance_m),
            distance_delta_m: trace.distance_at_time(elapsed_s) - distance_m,
        })
    }

    pub fn delta_for(&self, snapshot: &RideSnapshot) -> Option<GhostDelta> {
        self.delta_at(snapshot.distance_m, snapshot.elapsed_time_s)
    }
}

fn is_complete(trace: &GhostTrace, route_distance_m: f64) -> bool {
    trace.total_distance_m() >= route_distance_m - COMPLETION_TOLERANCE_M
}

/// Turn recorded rides into traces, dropping the unusable ones.
fn parse_rides(rides: Vec<RecordedRide>) -> Vec<(PathBuf, GhostTrace)> {
    rides
        .into_iter()
        .filter_map(|ride| match GhostTrace::from_samples(&ride.samples) {
            Ok(trace)
                if trace.total_time_s() > MIN_RIDE_TIME_S
                    && trace.total_distance_m() > MIN_RIDE_DISTANCE_M =>
            {
                Some((ride.path, trace))
            }
            Ok(_) => {
                tracing::debug!("Ride {} too short for a ghost", ride.path.display());
                None
            }
            Err(e) => {
                tracing::debug!("Skipping ride {}: {}", ride.path.display(), e);
                None
            }
        })
        .collect()
}
