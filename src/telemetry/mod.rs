//! # Telemetry Data Model
//!
//! Typed records for everything that crosses the device link or sits in the
//! [`StateStore`](crate::state::StateStore):
//!
//! - [`SensorPayload`] - what the device sent, validated by the [`decoder`]
//! - [`TelemetryRecord`] - a payload stamped with the host capture time
//! - [`PredictionResult`] - model label plus the advisory pump command
//! - [`Reading`] - one history entry (telemetry ⊕ prediction)
//! - [`PumpCommand`], [`ActuatorStatus`], [`ConnectionState`]
//!
//! The JSON field names follow the wire protocol of the field controller
//! (`soil_moisture`, `N`, `P`, `K`) and the dashboard contract
//! (`recommended_crop`, `pump_command`).

pub mod decoder;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label reported when no predictor is configured.
pub const MODEL_NOT_LOADED: &str = "Model not loaded";
/// Label reported when the predictor fails.
pub const PREDICTION_ERROR: &str = "Prediction Error";

/// Host → device actuator command. The wire form is the literal line text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PumpCommand {
    #[serde(rename = "PUMP_ON")]
    PumpOn,
    #[serde(rename = "PUMP_OFF")]
    PumpOff,
}

impl PumpCommand {
    pub fn as_wire(self) -> &'static str {
        match self {
            PumpCommand::PumpOn => "PUMP_ON",
            PumpCommand::PumpOff => "PUMP_OFF",
        }
    }

    /// Parse the wire form, or the short `ON`/`OFF` used by the legacy pump route.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PUMP_ON" | "ON" => Some(PumpCommand::PumpOn),
            "PUMP_OFF" | "OFF" => Some(PumpCommand::PumpOff),
            _ => None,
        }
    }

    /// Actuator status implied by this command once the device confirms it.
    pub fn resulting_status(self) -> ActuatorStatus {
        match self {
            PumpCommand::PumpOn => ActuatorStatus::On,
            PumpCommand::PumpOff => ActuatorStatus::Off,
        }
    }
}

impl fmt::Display for PumpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Last known state of the pump relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActuatorStatus {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
    #[default]
    Unknown,
}

impl ActuatorStatus {
    /// True when sending `command` would not change the known relay state.
    pub fn matches(self, command: PumpCommand) -> bool {
        self == command.resulting_status()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// A sensor reading as the device reported it. It has no timestamp: capture
/// time is assigned by the host when the payload becomes a [`TelemetryRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct SensorPayload {
    pub temperature: f64,
    pub humidity: f64,
    pub soil_moisture: f64,
    pub n: f64,
    pub p: f64,
    pub k: f64,
    pub rainfall: Option<f64>,
    /// Relay state the device says it is in (`pump_command` on the wire).
    pub reported_pump: Option<PumpCommand>,
}

impl SensorPayload {
    pub fn stamp(self, captured_at: DateTime<Utc>) -> TelemetryRecord {
        TelemetryRecord {
            temperature: self.temperature,
            humidity: self.humidity,
            soil_moisture: self.soil_moisture,
            n: self.n,
            p: self.p,
            k: self.k,
            rainfall: self.rainfall,
            reported_pump: self.reported_pump,
            timestamp: captured_at,
        }
    }
}

/// An accepted sensor reading with its host-side capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// °C
    pub temperature: f64,
    /// %
    pub humidity: f64,
    /// %
    pub soil_moisture: f64,
    #[serde(rename = "N")]
    pub n: f64,
    #[serde(rename = "P")]
    pub p: f64,
    #[serde(rename = "K")]
    pub k: f64,
    /// mm; `None` when the device did not report it.
    pub rainfall: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_pump: Option<PumpCommand>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Predictor output, or one of [`MODEL_NOT_LOADED`] / [`PREDICTION_ERROR`].
    #[serde(rename = "recommended_crop")]
    pub label: String,
    /// Threshold rule output; advisory only.
    #[serde(rename = "pump_command")]
    pub advisory_command: PumpCommand,
    pub produced_at: DateTime<Utc>,
}

/// One history entry: a telemetry record and the prediction derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(flatten)]
    pub telemetry: TelemetryRecord,
    #[serde(flatten)]
    pub prediction: PredictionResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pump_command_parses_wire_and_short_forms() {
        assert_eq!(PumpCommand::parse("PUMP_ON"), Some(PumpCommand::PumpOn));
        assert_eq!(PumpCommand::parse("off"), Some(PumpCommand::PumpOff));
        assert_eq!(PumpCommand::parse(" pump_off\r"), Some(PumpCommand::PumpOff));
        assert_eq!(PumpCommand::parse("PUMP"), None);
    }

    #[test]
    fn actuator_status_serializes_like_dashboard() {
        assert_eq!(serde_json::to_string(&ActuatorStatus::On).unwrap(), "\"ON\"");
        assert_eq!(
            serde_json::to_string(&ActuatorStatus::Unknown).unwrap(),
            "\"Unknown\""
        );
        assert!(ActuatorStatus::Off.matches(PumpCommand::PumpOff));
        assert!(!ActuatorStatus::Unknown.matches(PumpCommand::PumpOff));
    }

    #[test]
    fn reading_flattens_to_single_object() {
        let now = Utc::now();
        let reading = Reading {
            telemetry: SensorPayload {
                temperature: 25.0,
                humidity: 60.0,
                soil_moisture: 30.0,
                n: 40.0,
                p: 30.0,
                k: 35.0,
                rainfall: None,
                reported_pump: None,
            }
            .stamp(now),
            prediction: PredictionResult {
                label: "rice".to_string(),
                advisory_command: PumpCommand::PumpOn,
                produced_at: now,
            },
        };
        let value = serde_json::to_value(&reading).unwrap();
        assert_eq!(value["soil_moisture"], 30.0);
        assert_eq!(value["N"], 40.0);
        assert_eq!(value["recommended_crop"], "rice");
        assert_eq!(value["pump_command"], "PUMP_ON");
        assert!(value.get("reported_pump").is_none());
    }
}
