//! # Prediction
//!
//! [`PredictionStep`] turns one telemetry record plus the current weather into a
//! [`PredictionResult`]:
//!
//! 1. Build the fixed-order feature vector `[N, P, K, temperature, humidity, rainfall]`.
//!    Rainfall comes from telemetry when the device reported it, otherwise from weather.
//! 2. Ask the opaque [`Predictor`] for a crop label.
//! 3. Apply the soil-moisture threshold rule for the advisory pump command.
//!
//! The threshold rule runs regardless of the model. A missing predictor yields
//! [`MODEL_NOT_LOADED`], a failing one [`PREDICTION_ERROR`]; neither is an error
//! for the caller.

pub mod process;

use chrono::Utc;
use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;

use crate::config::PredictionConfig;
use crate::error::PredictorError;
use crate::metrics;
use crate::telemetry::{
    PredictionResult, PumpCommand, TelemetryRecord, MODEL_NOT_LOADED, PREDICTION_ERROR,
};
use crate::weather::WeatherSnapshot;

pub use process::ProcessPredictor;

/// Model input. Serialises with the model's training column names.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureVector {
    #[serde(rename = "N")]
    pub n: f64,
    #[serde(rename = "P")]
    pub p: f64,
    #[serde(rename = "K")]
    pub k: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub rainfall: f64,
}

impl FeatureVector {
    pub fn from_inputs(record: &TelemetryRecord, weather: &WeatherSnapshot) -> Self {
        Self {
            n: record.n,
            p: record.p,
            k: record.k,
            temperature: record.temperature,
            humidity: record.humidity,
            rainfall: record.rainfall.unwrap_or(weather.rainfall_mm),
        }
    }

    pub fn as_array(&self) -> [f64; 6] {
        [
            self.n,
            self.p,
            self.k,
            self.temperature,
            self.humidity,
            self.rainfall,
        ]
    }
}

/// Opaque `predict(features) -> label`. May block; it runs on the blocking pool.
pub trait Predictor: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> Result<String, PredictorError>;
}

impl<F> Predictor for F
where
    F: Fn(&FeatureVector) -> Result<String, PredictorError> + Send + Sync,
{
    fn predict(&self, features: &FeatureVector) -> Result<String, PredictorError> {
        self(features)
    }
}

#[derive(Clone)]
pub struct PredictionStep {
    predictor: Option<Arc<dyn Predictor>>,
    pump_on_below: f64,
}

impl PredictionStep {
    pub fn new(predictor: Option<Arc<dyn Predictor>>, pump_on_below: f64) -> Self {
        Self {
            predictor,
            pump_on_below,
        }
    }

    /// An external-process predictor when `command` is set, otherwise none.
    pub fn from_config(config: &PredictionConfig) -> Self {
        let predictor = ProcessPredictor::from_config(config)
            .map(|p| Arc::new(p) as Arc<dyn Predictor>);
        if predictor.is_none() {
            warn!("No predictor configured; labels will read \"{}\"", MODEL_NOT_LOADED);
        }
        Self::new(predictor, config.pump_on_below)
    }

    pub fn has_model(&self) -> bool {
        self.predictor.is_some()
    }

    /// `PUMP_ON` strictly below the threshold, `PUMP_OFF` at or above it.
    pub fn advisory_command(&self, soil_moisture: f64) -> PumpCommand {
        if soil_moisture < self.pump_on_below {
            PumpCommand::PumpOn
        } else {
            PumpCommand::PumpOff
        }
    }

    pub async fn predict(
        &self,
        record: &TelemetryRecord,
        weather: &WeatherSnapshot,
    ) -> PredictionResult {
        let features = FeatureVector::from_inputs(record, weather);
        let label = match &self.predictor {
            None => {
                metrics::inc_prediction_unavailable();
                MODEL_NOT_LOADED.to_string()
            }
            Some(predictor) => {
                let predictor = predictor.clone();
                match tokio::task::spawn_blocking(move || predictor.predict(&features)).await {
                    Ok(Ok(label)) => {
                        debug!("Predicted {} from {:?}", label, features.as_array());
                        metrics::inc_prediction_ok();
                        label
                    }
                    Ok(Err(e)) => {
                        warn!("Prediction failed: {}", e);
                        metrics::inc_prediction_failed();
                        PREDICTION_ERROR.to_string()
                    }
                    Err(e) => {
                        warn!("Predictor task aborted: {}", e);
                        metrics::inc_prediction_failed();
                        PREDICTION_ERROR.to_string()
                    }
                }
            }
        };
        PredictionResult {
            label,
            advisory_command: self.advisory_command(record.soil_moisture),
            produced_at: Utc::now(),
        }
    }
}
