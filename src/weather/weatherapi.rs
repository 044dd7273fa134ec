//! WeatherAPI.com client and the offline mock used when no key is configured.

use log::info;
#[cfg(feature = "weather")]
use log::debug;
#[cfg(feature = "weather")]
use serde::Deserialize;

use super::{WeatherReading, WeatherSource};
use crate::config::WeatherConfig;
use crate::error::WeatherError;

#[cfg(feature = "weather")]
const BASE_URL: &str = "https://api.weatherapi.com/v1/current.json";

/// `current.json` response subset.
#[cfg(feature = "weather")]
#[derive(Debug, Deserialize)]
struct CurrentResponse {
    current: Current,
}

#[cfg(feature = "weather")]
#[derive(Debug, Deserialize)]
struct Current {
    temp_c: f64,
    humidity: f64,
    wind_kph: f64,
    #[serde(default)]
    precip_mm: f64,
    condition: Condition,
}

#[cfg(feature = "weather")]
#[derive(Debug, Deserialize)]
struct Condition {
    text: String,
}

#[cfg(feature = "weather")]
pub struct WeatherApiClient {
    api_key: String,
    client: reqwest::Client,
}

#[cfg(feature = "weather")]
impl WeatherApiClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn build_api_url(&self, location: &str) -> String {
        format!(
            "{}?key={}&q={}",
            BASE_URL,
            urlencoding::encode(&self.api_key),
            urlencoding::encode(location)
        )
    }
}

#[cfg(feature = "weather")]
impl WeatherSource for WeatherApiClient {
    async fn lookup(&self, location: &str) -> Result<WeatherReading, WeatherError> {
        let url = self.build_api_url(location);
        debug!("Fetching weather for {}", location);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| WeatherError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(WeatherError::Status(response.status().as_u16()));
        }
        let body: CurrentResponse = response
            .json()
            .await
            .map_err(|e| WeatherError::Parse(e.to_string()))?;

        Ok(WeatherReading {
            condition_text: body.current.condition.text,
            temperature: body.current.temp_c,
            humidity: body.current.humidity,
            wind_speed: body.current.wind_kph,
            precip_mm: body.current.precip_mm,
        })
    }
}

/// Fixed, plausible conditions. Never fails.
#[derive(Debug, Clone, Default)]
pub struct MockWeather;

impl WeatherSource for MockWeather {
    async fn lookup(&self, _location: &str) -> Result<WeatherReading, WeatherError> {
        Ok(WeatherReading {
            condition_text: "Partly cloudy".to_string(),
            temperature: 28.0,
            humidity: 65.0,
            wind_speed: 12.0,
            precip_mm: 0.0,
        })
    }
}

/// Source chosen from configuration: the live API when a key is present,
/// otherwise the mock for the lifetime of the process.
pub enum DefaultWeatherSource {
    #[cfg(feature = "weather")]
    Api(WeatherApiClient),
    Mock(MockWeather),
}

impl DefaultWeatherSource {
    pub fn from_config(config: &WeatherConfig) -> Self {
        match config.api_key() {
            #[cfg(feature = "weather")]
            Some(key) => {
                info!("Weather: WeatherAPI.com for {}", config.default_location);
                DefaultWeatherSource::Api(WeatherApiClient::new(key))
            }
            #[cfg(not(feature = "weather"))]
            Some(_) => {
                info!("Weather: built without the `weather` feature, ignoring API key");
                DefaultWeatherSource::Mock(MockWeather)
            }
            None => {
                info!("Weather: no API key configured, using mock conditions");
                DefaultWeatherSource::Mock(MockWeather)
            }
        }
    }

    pub fn is_mock(&self) -> bool {
        matches!(self, DefaultWeatherSource::Mock(_))
    }
}

impl WeatherSource for DefaultWeatherSource {
    async fn lookup(&self, location: &str) -> Result<WeatherReading, WeatherError> {
        match self {
            #[cfg(feature = "weather")]
            DefaultWeatherSource::Api(client) => client.lookup(location).await,
            DefaultWeatherSource::Mock(mock) => mock.lookup(location).await,
        }
    }
}
