//! # Configuration Management Module
//!
//! All tunables of the bridge live here: the serial device address, the weather
//! credential and cache TTL, the pump threshold, history sizing and the API bind
//! address. Nothing in the pipeline hardwires these values.
//!
//! ## Configuration Structure
//!
//! - [`DeviceConfig`] - Serial link, reconnect backoff and ack window
//! - [`WeatherConfig`] - Weather credential, location and cache TTL
//! - [`PredictionConfig`] - Pump threshold and external predictor
//! - [`StateConfig`] - History buffer sizing
//! - [`ApiConfig`] - HTTP surface
//! - [`LoggingConfig`] - Logging settings
//!
//! ## Usage
//!
//! ```rust,no_run
//! use agrolink::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Serial Port: {}", config.device.port);
//!     Ok(())
//! }
//! ```
//!
//! ## Precedence
//!
//! CLI args > Environment (`AGROLINK_*`) > Config file > Defaults

use anyhow::{anyhow, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial port identifier (e.g. `/dev/ttyUSB0`, `COM5`).
    pub port: String,
    pub baud_rate: u32,
    /// Upper bound for a single line read; an empty read is not an error.
    pub read_timeout_ms: u64,
    /// Delay after opening the port while ESP32 boards reset on DTR.
    pub settle_ms: u64,
    /// Fixed backoff between reconnect attempts while disconnected.
    pub reconnect_backoff_secs: u64,
    /// How long a pump command waits for an `ACK:` line.
    pub ack_window_ms: u64,
    /// Send the advisory pump command automatically after each prediction.
    pub auto_actuate: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
            read_timeout_ms: 250,
            settle_ms: 2000,
            reconnect_backoff_secs: 5,
            ack_window_ms: 500,
            auto_actuate: false,
        }
    }
}

impl DeviceConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn ack_window(&self) -> Duration {
        Duration::from_millis(self.ack_window_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// WeatherAPI.com key. Absent or empty means permanent mock weather.
    pub api_key: Option<String>,
    /// Location query passed to the weather service (city, `lat,lon`, postcode).
    pub default_location: String,
    pub cache_ttl_secs: u64,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Rainfall assumed when the condition reads as rain but 0 mm is reported.
    pub rain_assumed_mm: f64,
    /// Rainfall carried by the fallback snapshot.
    pub fallback_rainfall_mm: f64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_location: "Mumbai,IN".to_string(),
            cache_ttl_secs: 3600,
            timeout_seconds: 5,
            rain_assumed_mm: 5.0,
            fallback_rainfall_mm: 200.0,
        }
    }
}

impl WeatherConfig {
    /// The key, if one is configured and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Soil moisture (%) strictly below which the advisory command is `PUMP_ON`.
    pub pump_on_below: f64,
    /// External predictor program and arguments. Empty means no model is loaded.
    pub command: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            pump_on_below: 40.0,
            command: Vec::new(),
            timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub history_capacity: usize,
    /// Entries returned by a history query that does not pass a limit.
    pub history_default_limit: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            history_default_limit: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:3001".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("agrolink.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file, apply environment overrides and validate.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus `AGROLINK_*` overrides, for commands that run without a file.
    pub fn from_env() -> Self {
        Self::default_with_overrides(|key| std::env::var(key).ok())
    }

    pub fn default_with_overrides<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        config.apply_env_overrides(lookup);
        config
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Override file values from `AGROLINK_*` variables. The lookup is injected so
    /// tests do not have to mutate the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("AGROLINK_PORT") {
            self.device.port = port;
        }
        if let Some(baud) = lookup("AGROLINK_BAUD_RATE") {
            match baud.parse::<u32>() {
                Ok(b) => self.device.baud_rate = b,
                Err(_) => warn!("Ignoring AGROLINK_BAUD_RATE={:?}: not a number", baud),
            }
        }
        if let Some(key) = lookup("AGROLINK_WEATHER_API_KEY") {
            self.weather.api_key = Some(key);
        }
        if let Some(location) = lookup("AGROLINK_WEATHER_LOCATION") {
            self.weather.default_location = location;
        }
        if let Some(bind) = lookup("AGROLINK_API_BIND") {
            self.api.bind = bind;
        }
    }

    /// Reject values the pipeline cannot run with; clamp the ones it can.
    pub fn validate(&mut self) -> Result<()> {
        if self.device.baud_rate == 0 {
            return Err(anyhow!("device.baud_rate must be greater than zero"));
        }
        if self.device.read_timeout_ms == 0 {
            return Err(anyhow!("device.read_timeout_ms must be greater than zero"));
        }
        if self.device.reconnect_backoff_secs == 0 {
            return Err(anyhow!(
                "device.reconnect_backoff_secs must be greater than zero"
            ));
        }
        if self.weather.timeout_seconds == 0 {
            return Err(anyhow!("weather.timeout_seconds must be greater than zero"));
        }
        if self.device.ack_window_ms == 0 {
            return Err(anyhow!("device.ack_window_ms must be greater than zero"));
        }
        if self.state.history_capacity == 0 {
            return Err(anyhow!("state.history_capacity must be greater than zero"));
        }
        if !(0.0..=100.0).contains(&self.prediction.pump_on_below) {
            return Err(anyhow!(
                "prediction.pump_on_below must be within 0..=100 (got {})",
                self.prediction.pump_on_below
            ));
        }
        if self.state.history_default_limit > self.state.history_capacity {
            warn!(
                "state.history_default_limit={} exceeds history_capacity={}; clamping",
                self.state.history_default_limit, self.state.history_capacity
            );
            self.state.history_default_limit = self.state.history_capacity;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_field_protocol() {
        let config = Config::default();
        assert_eq!(config.device.baud_rate, 115200);
        assert_eq!(config.device.reconnect_backoff(), Duration::from_secs(5));
        assert_eq!(config.weather.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.prediction.pump_on_below, 40.0);
        assert_eq!(config.state.history_capacity, 100);
        assert_eq!(config.state.history_default_limit, 24);
        assert!(config.weather.api_key().is_none());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
            [device]
            port = "COM5"

            [weather]
            api_key = "abc"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.device.port, "COM5");
        assert_eq!(config.device.baud_rate, 115200);
        assert_eq!(config.weather.api_key(), Some("abc"));
        assert_eq!(config.weather.default_location, "Mumbai,IN");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn blank_api_key_means_mock() {
        let mut config = WeatherConfig::default();
        config.api_key = Some("   ".to_string());
        assert!(config.api_key().is_none());
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = [
            ("AGROLINK_PORT", "/dev/ttyACM0"),
            ("AGROLINK_BAUD_RATE", "9600"),
            ("AGROLINK_WEATHER_API_KEY", "k"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.device.port, "/dev/ttyACM0");
        assert_eq!(config.device.baud_rate, 9600);
        assert_eq!(config.weather.api_key(), Some("k"));
    }

    #[test]
    fn file_less_config_still_reads_overrides() {
        let config = Config::default_with_overrides(|k| {
            (k == "AGROLINK_WEATHER_API_KEY").then(|| "from-env".to_string())
        });
        assert_eq!(config.weather.api_key(), Some("from-env"));
        assert_eq!(config.device.baud_rate, 115200);
    }

    #[test]
    fn validate_rejects_zero_backoff_and_weather_timeout() {
        let mut config = Config::default();
        config.device.reconnect_backoff_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reconnect_backoff_secs"));

        let mut config = Config::default();
        config.weather.timeout_seconds = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeout_seconds"));
    }

    #[test]
    fn bad_baud_override_is_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(|k| (k == "AGROLINK_BAUD_RATE").then(|| "fast".to_string()));
        assert_eq!(config.device.baud_rate, 115200);
    }

    #[test]
    fn validate_rejects_zero_capacity_and_clamps_limit() {
        let mut config = Config::default();
        config.state.history_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.state.history_capacity = 10;
        config.state.history_default_limit = 24;
        config.validate().unwrap();
        assert_eq!(config.state.history_default_limit, 10);
    }

    #[test]
    fn validate_rejects_threshold_out_of_range() {
        let mut config = Config::default();
        config.prediction.pump_on_below = 140.0;
        assert!(config.validate().is_err());
    }
}
