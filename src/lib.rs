//! # Agrolink - Field Controller Telemetry Bridge
//!
//! Agrolink connects an AgroSmart field controller (an ESP32 reporting soil and
//! atmosphere readings over USB serial) to a small prediction and pump-control service.
//!
//! ## Features
//!
//! - **Resilient Link**: serial connection with fixed-backoff reconnects and standing warnings.
//! - **Frame Decoding**: newline-delimited JSON telemetry separated from boot/debug text and acks.
//! - **Weather**: WeatherAPI.com lookups behind a TTL cache; failures fall back without poisoning it.
//! - **Prediction**: opaque crop predictor plus a soil-moisture threshold for the advisory pump command.
//! - **Actuation**: `PUMP_ON`/`PUMP_OFF` with a bounded acknowledgment window.
//! - **API**: state, history, weather and commands over HTTP (feature `http`).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "serial")]
//! # async fn run() -> anyhow::Result<()> {
//! use std::sync::Arc;
//! use agrolink::config::Config;
//! use agrolink::ingest::{IngestionLoop, LoopTuning};
//! use agrolink::link::serial::SerialConnector;
//! use agrolink::predict::PredictionStep;
//! use agrolink::state::state_store;
//! use agrolink::weather::{DefaultWeatherSource, WeatherCache};
//!
//! let config = Config::load("config.toml").await?;
//! let (store, writer) = state_store(config.state.history_capacity);
//! let weather = Arc::new(WeatherCache::new(
//!     DefaultWeatherSource::from_config(&config.weather),
//!     &config.weather,
//! ));
//! let connector = SerialConnector::new(
//!     &config.device.port,
//!     config.device.baud_rate,
//!     config.device.settle(),
//! );
//! let (ingestion, link) = IngestionLoop::new(
//!     connector,
//!     writer,
//!     weather,
//!     PredictionStep::from_config(&config.prediction),
//!     LoopTuning::from_config(&config.device),
//! );
//! tokio::spawn(ingestion.run());
//! println!("{:?}", store.snapshot().connection);
//! link.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`link`] - line transport traits and the serial implementation
//! - [`telemetry`] - data model and the frame decoder
//! - [`weather`] - weather sources and the TTL cache
//! - [`predict`] - feature vector, predictor seam and threshold rule
//! - [`state`] - single-writer state store and history ring
//! - [`actuator`] - pump commands with acknowledgment handling
//! - [`ingest`] - the ingestion loop and its control channel
//! - [`api`] - request-handler contract and HTTP routes
//! - [`config`] - configuration loading and validation
//!
//! ## Architecture
//!
//! ```text
//!  serial ──> Link ──> FrameDecoder ──> IngestionLoop ──> StateStore <── API readers
//!                                        │   ▲    │
//!                          WeatherCache <┘   │    └> PredictionStep
//!                                            │
//!   API commands ── LinkHandle ── control ───┘──> ActuatorBridge ──> Link
//! ```

pub mod actuator;
pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod link;
pub mod logutil;
pub mod metrics;
pub mod predict;
pub mod state;
pub mod telemetry;
pub mod weather;
