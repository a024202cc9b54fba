//! Shared ride state.
//!
//! The control loop is the only writer. It publishes immutable
//! [`RideSnapshot`]s through a watch channel; readers always see a complete
//! snapshot and never block the writer.

use crate::sensors::types::ConnectionStatus;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Active ride mode. The ERG target lives inside its variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RideMode {
    /// Synthetic power and speed, no trainer needed
    #[default]
    Demo,
    /// Metrics follow the trainer, no resistance control
    Live,
    /// Trainer holds a fixed power target
    Erg { target_watts: u16 },
    /// Trainer resistance follows the route grade
    Sim,
}

impl RideMode {
    /// Short upper-case label used in logs and ride files.
    pub fn label(&self) -> &'static str {
        match self {
            RideMode::Demo => "DEMO",
            RideMode::Live => "LIVE",
            RideMode::Erg { .. } => "ERG",
            RideMode::Sim => "SIM",
        }
    }

    /// Whether the control loop drives the trainer's resistance.
    pub fn is_controlled(&self) -> bool {
        matches!(self, RideMode::Erg { .. } | RideMode::Sim)
    }
}

impl std::fmt::Display for RideMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RideMode::Erg { target_watts } => write!(f, "ERG {}W", target_watts),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Immutable view of the ride at one instant.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RideSnapshot {
    /// Publication counter, increases with every publish
    pub seq: u64,
    pub mode: RideMode,
    /// Ride time excluding pauses, in seconds
    pub elapsed_time_s: f64,
    /// Distance along the route, in meters
    pub distance_m: f64,
    pub power_w: f64,
    pub cadence_rpm: f64,
    pub speed_mps: f64,
    pub heart_rate_bpm: Option<u8>,
    /// Route grade at the current distance
    pub grade_pct: f64,
    pub elevation_m: f64,
    /// Last grade sent to the trainer in SIM mode
    pub target_grade_pct: f64,
    pub resistance_scale: f64,
    pub recording: bool,
    pub paused: bool,
    /// The route end was reached
    pub completed: bool,
    pub connection_status: ConnectionStatus,
    /// Telemetry frames that failed to decode
    pub dropped_frames: u64,
}

impl RideSnapshot {
    pub fn speed_kmh(&self) -> f64 {
        self.speed_mps * 3.6
    }
}

/// Create the writer and a first reader for a new ride.
pub fn ride_state(initial: RideSnapshot) -> (RideStateWriter, RideStateReader) {
    let (tx, rx) = watch::channel(Arc::new(initial.clone()));
    let (finished_tx, finished_rx) = watch::channel(None);
    (
        RideStateWriter {
            tx,
            finished: finished_tx,
            current: initial,
        },
        RideStateReader {
            rx,
            finished: finished_rx,
        },
    )
}

/// The single writer of ride state.
#[derive(Debug)]
pub struct RideStateWriter {
    tx: watch::Sender<Arc<RideSnapshot>>,
    /// Last snapshot before the most recent reset
    finished: watch::Sender<Option<Arc<RideSnapshot>>>,
    current: RideSnapshot,
}

impl RideStateWriter {
    /// Last published snapshot.
    pub fn current(&self) -> &RideSnapshot {
        &self.current
    }

    /// Publish a new snapshot.
    ///
    /// Distance and elapsed time never go backwards within a session; a
    /// regression is logged and clamped.
    pub fn publish(&mut self, mut next: RideSnapshot) {
        if next.distance_m < self.current.distance_m {
            tracing::warn!(
                "Ride distance went backwards ({:.2} -> {:.2}), clamping",
                self.current.distance_m,
                next.distance_m
            );
            next.distance_m = self.current.distance_m;
        }
        if next.elapsed_time_s < self.current.elapsed_time_s {
            tracing::warn!(
                "Ride time went backwards ({:.2} -> {:.2}), clamping",
                self.current.elapsed_time_s,
                next.elapsed_time_s
            );
            next.elapsed_time_s = self.current.elapsed_time_s;
        }
        next.seq = self.current.seq + 1;

        self.tx.send_replace(Arc::new(next.clone()));
        self.current = next;
    }

    /// Start over from a zeroed snapshot (session end).
    ///
    /// The snapshot being replaced stays readable through
    /// [`RideStateReader::finished`].
    pub fn reset(&mut self) {
        self.finished
            .send_replace(Some(Arc::new(self.current.clone())));
        let next = RideSnapshot {
            seq: self.current.seq + 1,
            ..RideSnapshot::default()
        };
        self.tx.send_replace(Arc::new(next.clone()));
        self.current = next;
    }

    /// Another reader for this ride.
    pub fn reader(&self) -> RideStateReader {
        RideStateReader {
            rx: self.tx.subscribe(),
            finished: self.finished.subscribe(),
        }
    }
}

/// Read-only handle to the latest ride snapshot.
#[derive(Debug, Clone)]
pub struct RideStateReader {
    rx: watch::Receiver<Arc<RideSnapshot>>,
    finished: watch::Receiver<Option<Arc<RideSnapshot>>>,
}

impl RideStateReader {
    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<RideSnapshot> {
        self.rx.borrow().clone()
    }

    /// Final snapshot of the ride, once the state has been reset.
    pub fn finished(&self) -> Option<Arc<RideSnapshot>> {
        self.finished.borrow().clone()
    }

    /// Wait for the next publish. Returns false once the writer is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Whether the writer has been dropped.
    pub fn is_closed(&self) -> bool {
        self.rx.has_changed().is_err()
    }
}
