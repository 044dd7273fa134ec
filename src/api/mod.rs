//! # API Contract
//!
//! [`ApiService`] is everything a request handler may do: read state, read
//! weather, submit a pump command and push telemetry. It only holds read handles
//! and a [`LinkHandle`]; it never writes the store or touches the link itself.
//!
//! The HTTP binding lives in [`http`] (feature `http`).

#[cfg(feature = "http")]
pub mod http;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::actuator::AckResult;
use crate::ingest::LinkHandle;
use crate::metrics;
use crate::state::{CommandMode, StateStore, StateView};
use crate::telemetry::decoder::payload_from_value;
use crate::telemetry::{PumpCommand, Reading};
use crate::weather::{WeatherCache, WeatherSnapshot, WeatherSource};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unavailable(String),
}

/// `GET current-state`. Always well formed; `has_data` is false until the
/// first reading arrives.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentState {
    pub has_data: bool,
    #[serde(flatten)]
    pub state: StateView,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    /// `PUMP_ON`/`PUMP_OFF` (or `ON`/`OFF`).
    pub command: String,
    #[serde(default)]
    pub mode: CommandMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    /// The command reached the device. `status` tells an ack from a silent device.
    pub success: bool,
    pub command: PumpCommand,
    pub mode: CommandMode,
    pub message: String,
    #[serde(flatten)]
    pub result: AckResult,
}

pub struct ApiService<S> {
    store: StateStore,
    link: LinkHandle,
    weather: Arc<WeatherCache<S>>,
    default_limit: usize,
}

impl<S> Clone for ApiService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            link: self.link.clone(),
            weather: self.weather.clone(),
            default_limit: self.default_limit,
        }
    }
}

impl<S: WeatherSource> ApiService<S> {
    pub fn new(
        store: StateStore,
        link: LinkHandle,
        weather: Arc<WeatherCache<S>>,
        default_limit: usize,
    ) -> Self {
        Self {
            store,
            link,
            weather,
            default_limit,
        }
    }

    pub fn current_state(&self) -> CurrentState {
        let state = self.store.snapshot();
        CurrentState {
            has_data: state.has_data(),
            state,
        }
    }

    /// Last `limit` readings oldest first; default limit when `None`.
    pub fn history(&self, limit: Option<usize>) -> Vec<Reading> {
        self.store.history(limit.unwrap_or(self.default_limit))
    }

    pub async fn weather(&self) -> WeatherSnapshot {
        self.weather.current().await
    }

    pub fn metrics(&self) -> metrics::Snapshot {
        metrics::snapshot()
    }

    pub async fn actuator_command(
        &self,
        request: CommandRequest,
    ) -> Result<CommandResponse, ApiError> {
        let command = PumpCommand::parse(&request.command).ok_or_else(|| {
            ApiError::BadRequest(format!("unknown command '{}'", request.command))
        })?;
        let result = self.link.actuate(command, request.mode).await;
        Ok(CommandResponse {
            success: result.was_sent(),
            command,
            mode: request.mode,
            message: result.message(),
            result,
        })
    }

    /// Validate a pushed JSON body like a serial frame, then hand it to the loop.
    pub async fn push_telemetry(&self, body: Value) -> Result<Reading, ApiError> {
        let payload = payload_from_value(body).map_err(ApiError::BadRequest)?;
        self.link
            .push_telemetry(payload)
            .await
            .ok_or_else(|| ApiError::Unavailable("ingestion loop is not running".to_string()))
    }
}
