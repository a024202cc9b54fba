//! Indoor Bike Data and control point codec tests.

use crankride::sensors::ftms::{
    decode_command, decode_telemetry, encode_command, encode_telemetry, ControlCommand,
    DecodeError, TelemetrySample,
};

#[test]
fn test_power_and_cadence_only_frame() {
    // Flags: more data (no speed), instantaneous cadence, instantaneous power
    let frame = [0x45, 0x00, 170, 0x00, 200, 0x00];
    let sample = decode_telemetry(&frame).unwrap();

    assert_eq!(sample.power_w, Some(200));
    assert_eq!(sample.cadence_rpm, Some(85.0));
    assert_eq!(sample.speed_mps, None);
    assert_eq!(sample.distance_m, None);
    assert_eq!(sample.heart_rate_bpm, None);
}

#[test]
fn test_skipped_fields_keep_alignment() {
    // Every field up to heart rate, with the untracked ones filled with noise
    let mut frame = vec![0xFE, 0x03];
    frame.extend_from_slice(&3600u16.to_le_bytes()); // 36 km/h
    frame.extend_from_slice(&[0xAA, 0xAA]);
    frame.extend_from_slice(&180u16.to_le_bytes()); // 90 rpm
    frame.extend_from_slice(&[0xAA, 0xAA]);
    frame.extend_from_slice(&[0x10, 0x27, 0x00]); // 10000 m
    frame.extend_from_slice(&[0xAA, 0xAA]);
    frame.extend_from_slice(&250i16.to_le_bytes());
    frame.extend_from_slice(&[0xAA, 0xAA]); // avg power
    frame.extend_from_slice(&[0xAA; 5]); // energy
    frame.push(150);

    let sample = decode_telemetry(&frame).unwrap();
    assert!((sample.speed_mps.unwrap() - 10.0).abs() < 1e-9);
    assert_eq!(sample.cadence_rpm, Some(90.0));
    assert_eq!(sample.distance_m, Some(10_000));
    assert_eq!(sample.power_w, Some(250));
    assert_eq!(sample.heart_rate_bpm, Some(150));
}

#[test]
fn test_truncated_and_reserved() {
    assert!(matches!(
        decode_telemetry(&[0x44, 0x00, 170]),
        Err(DecodeError::Truncated { .. })
    ));
    assert!(matches!(
        decode_telemetry(&[0x01, 0x80]),
        Err(DecodeError::UnsupportedFlags(_))
    ));
}

#[test]
fn test_sample_round_trip_within_quantisation() {
    let sample = TelemetrySample {
        speed_mps: Some(8.333),
        cadence_rpm: Some(87.5),
        power_w: Some(-12),
        distance_m: Some(4_321),
        heart_rate_bpm: Some(162),
    };
    let decoded = decode_telemetry(&encode_telemetry(&sample)).unwrap();

    // Speed travels in 0.01 km/h steps
    assert!((decoded.speed_mps.unwrap() - 8.333).abs() <= 0.01 / 3.6);
    assert_eq!(decoded.cadence_rpm, Some(87.5));
    assert_eq!(decoded.power_w, Some(-12));
    assert_eq!(decoded.distance_m, Some(4_321));
    assert_eq!(decoded.heart_rate_bpm, Some(162));
}

#[test]
fn test_sim_command_round_trip_and_clamping() {
    let command = ControlCommand::SetSimulationParameters {
        grade_pct: -3.27,
        rolling_resistance: 0.004,
        wind_resistance: 0.51,
    };
    let frame = encode_command(&command);
    assert_eq!(frame[0], 0x11);
    assert_eq!(frame.len(), 7);

    match decode_command(&frame).unwrap() {
        ControlCommand::SetSimulationParameters {
            grade_pct,
            rolling_resistance,
            wind_resistance,
        } => {
            assert!((grade_pct + 3.27).abs() <= 0.005);
            assert!((rolling_resistance - 0.004).abs() <= 0.0001);
            assert!((wind_resistance - 0.51).abs() <= 0.01);
        }
        other => panic!("unexpected command {other:?}"),
    }

    let steep = encode_command(&ControlCommand::SetSimulationParameters {
        grade_pct: 80.0,
        rolling_resistance: 0.004,
        wind_resistance: 0.51,
    });
    assert_eq!(i16::from_le_bytes([steep[3], steep[4]]), 4500);
}

#[test]
fn test_target_power_clamped() {
    assert_eq!(
        encode_command(&ControlCommand::SetTargetPower(5000)),
        vec![0x05, 0xD0, 0x07]
    );
    assert_eq!(
        encode_command(&ControlCommand::SetTargetPower(-5)),
        vec![0x05, 0x00, 0x00]
    );
}
