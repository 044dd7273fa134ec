mod common;

use std::time::{Duration, Instant};

use agrolink::actuator::{AckOutcome, ActuatorBridge};
use agrolink::telemetry::PumpCommand;
use common::{telemetry_line, DeviceScript};

#[test]
fn silent_device_is_unacknowledged_within_window() {
    let script = DeviceScript::new();
    let mut link = script.transport();
    let bridge = ActuatorBridge::new(Duration::from_millis(150));

    let started = Instant::now();
    let report = bridge.send(&mut link, PumpCommand::PumpOff).unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.outcome, AckOutcome::Unacknowledged);
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    assert_eq!(script.writes(), vec!["PUMP_OFF".to_string()]);
}

#[test]
fn ack_line_completes_the_send() {
    let script = DeviceScript::new()
        .line(&telemetry_line(33.0))
        .line("ACK: Pump turned ON (manual mode)");
    let mut link = script.transport();
    let bridge = ActuatorBridge::new(Duration::from_millis(500));

    let report = bridge.send(&mut link, PumpCommand::PumpOn).unwrap();
    assert_eq!(
        report.outcome,
        AckOutcome::Acked("ACK: Pump turned ON (manual mode)".to_string())
    );
    // Telemetry seen before the ack is handed back, not swallowed
    assert_eq!(report.other_lines, vec![telemetry_line(33.0)]);
}

#[test]
fn link_failure_during_wait_is_an_error() {
    let script = DeviceScript::new().fail();
    let mut link = script.transport();
    let bridge = ActuatorBridge::new(Duration::from_millis(500));

    let err = bridge.send(&mut link, PumpCommand::PumpOn).unwrap_err();
    assert!(err.is_lost());
}
