//! Line-oriented frame decoder for the field controller's serial protocol.
//!
//! The device interleaves three kinds of newline-terminated text on one port:
//!
//! ```text
//! === ESP32 AgroSmart - USB Serial Mode ===          <- boot / debug text
//! {"temperature":27.1,"humidity":61,"soil_moisture":35,"N":40,...}
//! ACK: Pump turned ON (manual mode)                  <- command acknowledgment
//! ```
//!
//! Only a JSON object carrying `temperature`, `humidity` and `soil_moisture` is
//! telemetry. Anything not starting with `{` is device log text. A line that
//! starts like JSON but cannot be read as a telemetry object is malformed and is
//! dropped by the caller. Decoding never fails and has no side effects.

use serde::Deserialize;
use serde_json::Value;

use super::{PumpCommand, SensorPayload};

/// Substring that marks a device acknowledgment line.
pub const ACK_MARKER: &str = "ACK:";

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Telemetry(SensorPayload),
    /// Free text from the device (boot banner, warnings, acks). Empty lines land here too.
    DeviceLog(String),
    /// JSON-like line that is not a usable telemetry object.
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct WireTelemetry {
    temperature: f64,
    humidity: f64,
    soil_moisture: f64,
    #[serde(rename = "N", default)]
    n: f64,
    #[serde(rename = "P", default)]
    p: f64,
    #[serde(rename = "K", default)]
    k: f64,
    #[serde(default)]
    rainfall: Option<f64>,
    #[serde(default)]
    pump_command: Option<String>,
}

impl From<WireTelemetry> for SensorPayload {
    fn from(w: WireTelemetry) -> Self {
        SensorPayload {
            temperature: w.temperature,
            humidity: w.humidity,
            soil_moisture: w.soil_moisture,
            n: w.n,
            p: w.p,
            k: w.k,
            rainfall: w.rainfall,
            reported_pump: w.pump_command.as_deref().and_then(PumpCommand::parse),
        }
    }
}

/// Classify one raw line from the device.
pub fn decode(raw: &str) -> Frame {
    let line = raw.trim();
    if !line.starts_with('{') {
        return Frame::DeviceLog(line.to_string());
    }
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Frame::Malformed(format!("invalid JSON: {}", e)),
    };
    match payload_from_value(value) {
        Ok(payload) => Frame::Telemetry(payload),
        Err(reason) => Frame::Malformed(reason),
    }
}

/// Validate an already-parsed JSON body (the HTTP push path) against the same
/// contract as the serial decoder.
pub fn payload_from_value(value: Value) -> Result<SensorPayload, String> {
    if !value.is_object() {
        return Err("telemetry must be a JSON object".to_string());
    }
    serde_json::from_value::<WireTelemetry>(value)
        .map(SensorPayload::from)
        .map_err(|e| e.to_string())
}

/// True if the line is a device acknowledgment.
pub fn is_ack(line: &str) -> bool {
    line.contains(ACK_MARKER)
}
