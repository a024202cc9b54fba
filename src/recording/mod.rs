//! Ride logging, ride history and ghost comparisons.

pub mod ghost;
pub mod history;
pub mod logger;

pub use ghost::{GhostCandidate, GhostDelta, GhostEngine, GhostError, GhostTrace};
pub use history::{CsvRideHistory, HistoryError, RecordedRide, RideHistory};
pub use logger::{spawn_logger, LogError, LoggerHandle, RideLogger};
