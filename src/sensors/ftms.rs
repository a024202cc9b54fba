//! FTMS (Fitness Machine Service) protocol codec.
//!
//! Decodes Indoor Bike Data (0x2AD2) notifications into [`TelemetrySample`]s and
//! encodes [`ControlCommand`]s for the Fitness Machine Control Point (0x2AD9).
//! Everything here is pure: no I/O, no state.

use thiserror::Error;
use uuid::Uuid;

/// FTMS Service UUID (0x1826)
pub const FTMS_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1826_0000_1000_8000_0080_5f9b_34fb);

/// Indoor Bike Data Characteristic UUID (0x2AD2)
pub const INDOOR_BIKE_DATA_UUID: Uuid = Uuid::from_u128(0x0000_2ad2_0000_1000_8000_0080_5f9b_34fb);

/// Fitness Machine Control Point UUID (0x2AD9)
pub const FTMS_CONTROL_POINT_UUID: Uuid =
    Uuid::from_u128(0x0000_2ad9_0000_1000_8000_0080_5f9b_34fb);

/// Largest target power the codec will encode, in watts.
pub const MAX_TARGET_POWER_W: i32 = 2000;

/// Grade limit applied before encoding simulation parameters, in percent.
pub const MAX_SIM_GRADE_PCT: f64 = 45.0;

/// Largest rolling resistance coefficient representable (u8 at 0.0001).
pub const MAX_ROLLING_RESISTANCE: f64 = 0.0255;

/// Largest wind resistance coefficient representable (u8 at 0.01 kg/m).
pub const MAX_WIND_RESISTANCE: f64 = 2.55;

const KMH_PER_MPS: f64 = 3.6;

// Indoor Bike Data flag bits.
const FLAG_MORE_DATA: u16 = 1 << 0;
const FLAG_AVG_SPEED: u16 = 1 << 1;
const FLAG_INST_CADENCE: u16 = 1 << 2;
const FLAG_AVG_CADENCE: u16 = 1 << 3;
const FLAG_TOTAL_DISTANCE: u16 = 1 << 4;
const FLAG_RESISTANCE_LEVEL: u16 = 1 << 5;
const FLAG_INST_POWER: u16 = 1 << 6;
const FLAG_AVG_POWER: u16 = 1 << 7;
const FLAG_EXPENDED_ENERGY: u16 = 1 << 8;
const FLAG_HEART_RATE: u16 = 1 << 9;
const FLAG_METABOLIC_EQUIVALENT: u16 = 1 << 10;
const FLAG_ELAPSED_TIME: u16 = 1 << 11;
const FLAG_REMAINING_TIME: u16 = 1 << 12;
const RESERVED_FLAGS: u16 = 0xE000;

/// Width in bytes of each optional field, in wire order. Instantaneous speed
/// is handled separately because its flag is inverted.
const OPTIONAL_FIELDS: [(u16, usize); 12] = [
    (FLAG_AVG_SPEED, 2),
    (FLAG_INST_CADENCE, 2),
    (FLAG_AVG_CADENCE, 2),
    (FLAG_TOTAL_DISTANCE, 3),
    (FLAG_RESISTANCE_LEVEL, 2),
    (FLAG_INST_POWER, 2),
    (FLAG_AVG_POWER, 2),
    (FLAG_EXPENDED_ENERGY, 5),
    (FLAG_HEART_RATE, 1),
    (FLAG_METABOLIC_EQUIVALENT, 1),
    (FLAG_ELAPSED_TIME, 2),
    (FLAG_REMAINING_TIME, 2),
];

/// One decoded Indoor Bike Data notification.
///
/// A field is `None` when the trainer did not report it, which is different
/// from reporting zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetrySample {
    /// Instantaneous speed in m/s
    pub speed_mps: Option<f64>,
    /// Instantaneous cadence in rpm
    pub cadence_rpm: Option<f64>,
    /// Instantaneous power in watts
    pub power_w: Option<i16>,
    /// Cumulative distance reported by the trainer, in meters
    pub distance_m: Option<u32>,
    /// Heart rate in bpm (when a strap is paired with the trainer)
    pub heart_rate_bpm: Option<u8>,
}

/// Errors produced while decoding inbound frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The buffer is shorter than its flags imply
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Reserved flag bits are set
    #[error("unsupported flags: {0:#06x}")]
    UnsupportedFlags(u16),

    /// The control point opcode is not one this codec knows
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),
}

/// FTMS Control Point opcodes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtmsControlOpcode {
    /// Request control of the fitness machine
    RequestControl = 0x00,
    /// Reset the fitness machine (releases control)
    Reset = 0x01,
    /// Set target power
    SetTargetPower = 0x05,
    /// Start or resume training
    StartOrResume = 0x07,
    /// Set indoor bike simulation parameters
    SetIndoorBikeSimulation = 0x11,
    /// Spin down control
    SpinDownControl = 0x13,
    /// Response code prefix for control point indications
    ResponseCode = 0x80,
}

/// Spin down control parameter that starts the procedure.
const SPIN_DOWN_START: u8 = 0x01;

/// Commands sent to the trainer's control point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlCommand {
    /// Take control of the trainer; required before any target command
    RequestControl,
    /// Release control and return the trainer to its idle state
    Reset,
    /// Start or resume the training session on the trainer
    StartOrResume,
    /// ERG mode target power in watts (clamped to 0..=2000 on encode)
    SetTargetPower(i32),
    /// SIM mode parameters
    SetSimulationParameters {
        /// Grade in percent
        grade_pct: f64,
        /// Coefficient of rolling resistance
        rolling_resistance: f64,
        /// Wind resistance coefficient in kg/m
        wind_resistance: f64,
    },
    /// Start a spin down calibration
    RequestSpindown,
}

impl ControlCommand {
    /// Opcode this command is encoded with.
    pub fn opcode(&self) -> FtmsControlOpcode {
        match self {
            ControlCommand::RequestControl => FtmsControlOpcode::RequestControl,
            ControlCommand::Reset => FtmsControlOpcode::Reset,
            ControlCommand::StartOrResume => FtmsControlOpcode::StartOrResume,
            ControlCommand::SetTargetPower(_) => FtmsControlOpcode::SetTargetPower,
            ControlCommand::SetSimulationParameters { .. } => {
                FtmsControlOpcode::SetIndoorBikeSimulation
            }
            ControlCommand::RequestSpindown => FtmsControlOpcode::SpinDownControl,
        }
    }
}

/// Number of bytes an Indoor Bike Data frame with these flags must hold.
fn expected_len(flags: u16) -> usize {
    let speed = if flags & FLAG_MORE_DATA == 0 { 2 } else { 0 };
    let optional: usize = OPTIONAL_FIELDS
        .iter()
        .filter(|(flag, _)| flags & flag != 0)
        .map(|(_, width)| width)
        .sum();
    2 + speed + optional
}

/// Little-endian cursor over a frame whose length was already validated.
struct FrameCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> FrameCursor<'a> {
    fn new(data: &'a [u8], offset: usize) -> Self {
        Self { data, offset }
    }

    fn u8(&mut self) -> u8 {
        let value = self.data[self.offset];
        self.offset += 1;
        value
    }

    fn u16(&mut self) -> u16 {
        let value = u16::from_le_bytes([self.data[self.offset], self.data[self.offset + 1]]);
        self.offset += 2;
        value
    }

    fn i16(&mut self) -> i16 {
        self.u16() as i16
    }

    fn u24(&mut self) -> u32 {
        let bytes = &self.data[self.offset..self.offset + 3];
        self.offset += 3;
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])
    }

    fn skip(&mut self, width: usize) {
        self.offset += width;
    }
}

/// Decode an Indoor Bike Data notification.
///
/// The frame starts with a 16-bit flags field. Instantaneous speed is present
/// when the "More Data" bit is clear; every other field is present when its bit
/// is set. Fields this crate does not track are skipped.
pub fn decode_telemetry(data: &[u8]) -> Result<TelemetrySample, DecodeError> {
    if data.len() < 2 {
        return Err(DecodeError::Truncated {
            expected: 2,
            actual: data.len(),
        });
    }

    let flags = u16::from_le_bytes([data[0], data[1]]);
    if flags & RESERVED_FLAGS != 0 {
        return Err(DecodeError::UnsupportedFlags(flags & RESERVED_FLAGS));
    }

    let expected = expected_len(flags);
    if data.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: data.len(),
        });
    }

    let mut cursor = FrameCursor::new(data, 2);
    let mut sample = TelemetrySample::default();

    if flags & FLAG_MORE_DATA == 0 {
        let raw = cursor.u16();
        sample.speed_mps = Some(f64::from(raw) / 100.0 / KMH_PER_MPS);
    }
    if flags & FLAG_AVG_SPEED != 0 {
        cursor.skip(2);
    }
    if flags & FLAG_INST_CADENCE != 0 {
        sample.cadence_rpm = Some(f64::from(cursor.u16()) * 0.5);
    }
    if flags & FLAG_AVG_CADENCE != 0 {
        cursor.skip(2);
    }
    if flags & FLAG_TOTAL_DISTANCE != 0 {
        sample.distance_m = Some(cursor.u24());
    }
    if flags & FLAG_RESISTANCE_LEVEL != 0 {
        cursor.skip(2);
    }
    if flags & FLAG_INST_POWER != 0 {
        sample.power_w = Some(cursor.i16());
    }
    if flags & FLAG_AVG_POWER != 0 {
        cursor.skip(2);
    }
    if flags & FLAG_EXPENDED_ENERGY != 0 {
        // Total energy (2), energy per hour (2), energy per minute (1)
        cursor.skip(5);
    }
    if flags & FLAG_HEART_RATE != 0 {
        sample.heart_rate_bpm = Some(cursor.u8());
    }
    // Metabolic equivalent and the two time fields trail the frame and are
    // not needed.

    Ok(sample)
}

/// Encode a sample as an Indoor Bike Data frame.
///
/// Only the fields present in `sample` are written; a missing speed sets the
/// "More Data" bit. Values outside the wire range saturate.
pub fn encode_telemetry(sample: &TelemetrySample) -> Vec<u8> {
    let mut flags = 0u16;
    if sample.speed_mps.is_none() {
        flags |= FLAG_MORE_DATA;
    }
    if sample.cadence_rpm.is_some() {
        flags |= FLAG_INST_CADENCE;
    }
    if sample.distance_m.is_some() {
        flags |= FLAG_TOTAL_DISTANCE;
    }
    if sample.power_w.is_some() {
        flags |= FLAG_INST_POWER;
    }
    if sample.heart_rate_bpm.is_some() {
        flags |= FLAG_HEART_RATE;
    }

    let mut frame = Vec::with_capacity(expected_len(flags));
    frame.extend_from_slice(&flags.to_le_bytes());

    if let Some(speed) = sample.speed_mps {
        let raw = (speed * KMH_PER_MPS * 100.0).round().clamp(0.0, f64::from(u16::MAX)) as u16;
        frame.extend_from_slice(&raw.to_le_bytes());
    }
    if let Some(cadence) = sample.cadence_rpm {
        let raw = (cadence * 2.0).round().clamp(0.0, f64::from(u16::MAX)) as u16;
        frame.extend_from_slice(&raw.to_le_bytes());
    }
    if let Some(distance) = sample.distance_m {
        let raw = distance.min(0x00FF_FFFF).to_le_bytes();
        frame.extend_from_slice(&raw[..3]);
    }
    if let Some(power) = sample.power_w {
        frame.extend_from_slice(&power.to_le_bytes());
    }
    if let Some(hr) = sample.heart_rate_bpm {
        frame.push(hr);
    }

    frame
}

/// Encode a control point command.
///
/// Out-of-range values are clamped to what the wire format can carry; this
/// never fails.
pub fn encode_command(command: &ControlCommand) -> Vec<u8> {
    let opcode = command.opcode() as u8;
    match *command {
        ControlCommand::RequestControl
        | ControlCommand::Reset
        | ControlCommand::StartOrResume => vec![opcode],
        ControlCommand::SetTargetPower(watts) => {
            let watts = watts.clamp(0, MAX_TARGET_POWER_W) as u16;
            let mut frame = vec![opcode];
            frame.extend_from_slice(&watts.to_le_bytes());
            frame
        }
        ControlCommand::SetSimulationParameters {
            grade_pct,
            rolling_resistance,
            wind_resistance,
        } => {
            let grade = (grade_pct.clamp(-MAX_SIM_GRADE_PCT, MAX_SIM_GRADE_PCT) * 100.0).round()
                as i16;
            let crr = (rolling_resistance.clamp(0.0, MAX_ROLLING_RESISTANCE) / 0.0001).round()
                as u8;
            let cw = (wind_resistance.clamp(0.0, MAX_WIND_RESISTANCE) / 0.01).round() as u8;
            // Wind speed is always still air.
            let wind_speed: i16 = 0;

            let mut frame = vec![opcode];
            frame.extend_from_slice(&wind_speed.to_le_bytes());
            frame.extend_from_slice(&grade.to_le_bytes());
            frame.push(crr);
            frame.push(cw);
            frame
        }
        ControlCommand::RequestSpindown => vec![opcode, SPIN_DOWN_START],
    }
}

/// Decode a control point frame back into a command.
///
/// The inverse of [`encode_command`], up to clamping and quantisation.
pub fn decode_command(data: &[u8]) -> Result<ControlCommand, DecodeError> {
    let truncated = |expected: usize| DecodeError::Truncated {
        expected,
        actual: data.len(),
    };

    let opcode = *data.first().ok_or_else(|| truncated(1))?;
    match opcode {
        0x00 => Ok(ControlCommand::RequestControl),
        0x01 => Ok(ControlCommand::Reset),
        0x07 => Ok(ControlCommand::StartOrResume),
        0x05 => {
            if data.len() < 3 {
                return Err(truncated(3));
            }
            let watts = u16::from_le_bytes([data[1], data[2]]);
            Ok(ControlCommand::SetTargetPower(i32::from(watts)))
        }
        0x11 => {
            if data.len() < 7 {
                return Err(truncated(7));
            }
            let grade = i16::from_le_bytes([data[3], data[4]]);
            Ok(ControlCommand::SetSimulationParameters {
                grade_pct: f64::from(grade) / 100.0,
                rolling_resistance: f64::from(data[5]) * 0.0001,
                wind_resistance: f64::from(data[6]) * 0.01,
            })
        }
        0x13 => Ok(ControlCommand::RequestSpindown),
        other => Err(DecodeError::UnknownOpcode(other)),
    }
}

/// Result code carried by a control point indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    NotSupported,
    InvalidParameter,
    OperationFailed,
    ControlNotPermitted,
    Other(u8),
}

impl From<u8> for ResultCode {
    fn from(value: u8) -> Self {
        match value {
            0x01 => ResultCode::Success,
            0x02 => ResultCode::NotSupported,
            0x03 => ResultCode::InvalidParameter,
            0x04 => ResultCode::OperationFailed,
            0x05 => ResultCode::ControlNotPermitted,
            other => ResultCode::Other(other),
        }
    }
}

/// Decoded control point response: `[0x80, request opcode, result]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlResponse {
    /// Opcode of the request being answered
    pub request_opcode: u8,
    /// Outcome reported by the trainer
    pub result: ResultCode,
}

impl ControlResponse {
    pub fn is_success(&self) -> bool {
        self.result == ResultCode::Success
    }
}

/// Decode a control point indication.
pub fn decode_control_response(data: &[u8]) -> Result<ControlResponse, DecodeError> {
    if data.len() < 3 {
        return Err(DecodeError::Truncated {
            expected: 3,
            actual: data.len(),
        });
    }
    if data[0] != FtmsControlOpcode::ResponseCode as u8 {
        return Err(DecodeError::UnknownOpcode(data[0]));
    }

    Ok(ControlResponse {
        request_opcode: data[1],
        result: ResultCode::from(data[2]),
    })
}
