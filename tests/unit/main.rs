//! Unit test modules.

mod codec_test;
mod ghost_trace_test;
mod grade_smoother_test;
mod ride_state_test;
mod route_grade_test;
