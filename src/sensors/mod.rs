//! Trainer communication: FTMS codec, transports and grade smoothing.

pub mod ftms;
pub mod incline;
pub mod simulated;
pub mod transport;
pub mod types;

pub use ftms::{
    decode_command, decode_control_response, decode_telemetry, encode_command, encode_telemetry,
    ControlCommand, ControlResponse, DecodeError, ResultCode, TelemetrySample,
};
pub use incline::{apply_resistance_scale, GradeSmoother};
pub use simulated::SimulatedTrainer;
pub use transport::{BleTrainer, TrainerTransport};
pub use types::{ConnectionStatus, ReconnectPolicy, TransportError};
