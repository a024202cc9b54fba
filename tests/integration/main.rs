//! Integration test modules.

mod recording_test;
mod session_test;
mod sim_control_test;
