//! The ride: shared state, the control loop and the session driving it.

pub mod control;
pub mod demo;
pub mod outbound;
pub mod session;
pub mod state;
pub mod summary;

pub use control::{ControlConfig, ControlError, RideController, TickOutcome};
pub use session::{RideCommand, RideSession, SessionError, SessionHandle};
pub use state::{ride_state, RideMode, RideSnapshot, RideStateReader, RideStateWriter};
pub use summary::RideSummary;
