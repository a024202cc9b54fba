//! CrankRide - Smart Trainer Control & Ride Simulation
//!
//! Connects to an FTMS smart trainer, turns its telemetry into a ride along a
//! route, drives the trainer's resistance in ERG and SIM modes, records the
//! ride and compares it against the fastest previous ride on the same route.

pub mod recording;
pub mod ride;
pub mod sensors;
pub mod storage;
pub mod world;

// Re-export commonly used types
pub use recording::ghost::GhostEngine;
pub use ride::session::{RideSession, SessionHandle};
pub use ride::state::{RideMode, RideSnapshot, RideStateReader};
pub use sensors::transport::TrainerTransport;
pub use storage::config::AppConfig;
