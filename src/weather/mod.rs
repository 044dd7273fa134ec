//! # Weather
//!
//! A time-bounded cache in front of an external weather lookup.
//!
//! [`WeatherCache::get`] returns the cached [`WeatherSnapshot`] while it is younger
//! than the TTL. Otherwise it performs one lookup through its [`WeatherSource`],
//! bounded by a timeout. Successful lookups are cached. A failed lookup returns the
//! fallback snapshot and leaves the cache untouched, so the next call retries at once.
//!
//! The cache mutex is held across the lookup: concurrent callers wait for the one
//! in-flight request instead of issuing their own.

pub mod weatherapi;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::WeatherConfig;
use crate::error::WeatherError;
use crate::metrics;

pub use weatherapi::{DefaultWeatherSource, MockWeather};
#[cfg(feature = "weather")]
pub use weatherapi::WeatherApiClient;

/// Normalised sky condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherCondition {
    Sunny,
    Cloudy,
    Rainy,
}

impl WeatherCondition {
    /// Map free-text provider conditions by keyword.
    pub fn from_text(text: &str) -> Self {
        let t = text.to_lowercase();
        if ["rain", "drizzle", "shower"].iter().any(|k| t.contains(k)) {
            WeatherCondition::Rainy
        } else if t.contains("cloud") || t.contains("overcast") {
            WeatherCondition::Cloudy
        } else {
            WeatherCondition::Sunny
        }
    }
}

/// Raw result of one lookup, before normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReading {
    pub condition_text: String,
    pub temperature: f64,
    pub humidity: f64,
    /// km/h
    pub wind_speed: f64,
    pub precip_mm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherSnapshot {
    pub condition: WeatherCondition,
    pub temperature: f64,
    pub humidity: f64,
    #[serde(rename = "windSpeed")]
    pub wind_speed: f64,
    pub forecast: String,
    pub rainfall_mm: f64,
    pub location: String,
    pub fetched_at: DateTime<Utc>,
    /// True for the substitute returned when the lookup failed.
    pub fallback: bool,
}

/// External weather provider.
pub trait WeatherSource: Send + Sync {
    fn lookup(
        &self,
        location: &str,
    ) -> impl Future<Output = Result<WeatherReading, WeatherError>> + Send;
}

#[derive(Debug)]
struct CacheEntry {
    stored_at: Instant,
    snapshot: WeatherSnapshot,
}

pub struct WeatherCache<S> {
    source: S,
    default_location: String,
    ttl: Duration,
    timeout: Duration,
    rain_assumed_mm: f64,
    fallback_rainfall_mm: f64,
    entry: Mutex<Option<CacheEntry>>,
}

impl<S: WeatherSource> WeatherCache<S> {
    pub fn new(source: S, config: &WeatherConfig) -> Self {
        Self {
            source,
            default_location: config.default_location.clone(),
            ttl: config.cache_ttl(),
            timeout: config.timeout(),
            rain_assumed_mm: config.rain_assumed_mm,
            fallback_rainfall_mm: config.fallback_rainfall_mm,
            entry: Mutex::new(None),
        }
    }

    /// Snapshot for the configured default location.
    pub async fn current(&self) -> WeatherSnapshot {
        self.get(&self.default_location).await
    }

    /// Snapshot for `location`. Never fails: errors select the fallback.
    pub async fn get(&self, location: &str) -> WeatherSnapshot {
        let mut entry = self.entry.lock().await;
        if let Some(cached) = entry.as_ref() {
            let age = cached.stored_at.elapsed();
            if cached.snapshot.location == location && age < self.ttl {
                debug!(
                    "Returning cached weather for {} (age: {:.1}min)",
                    location,
                    age.as_secs_f64() / 60.0
                );
                metrics::inc_weather_cache_hit();
                return cached.snapshot.clone();
            }
        }

        metrics::inc_weather_lookup();
        let result = match tokio::time::timeout(self.timeout, self.source.lookup(location)).await {
            Ok(r) => r,
            Err(_) => Err(WeatherError::Timeout(self.timeout.as_secs())),
        };
        match result {
            Ok(reading) => {
                let snapshot = self.normalize(location, reading);
                debug!(
                    "Weather fetched for {}: {:?}, {:.1} mm",
                    location, snapshot.condition, snapshot.rainfall_mm
                );
                *entry = Some(CacheEntry {
                    stored_at: Instant::now(),
                    snapshot: snapshot.clone(),
                });
                snapshot
            }
            Err(e) => {
                warn!("Failed to fetch weather for {}: {}", location, e);
                metrics::inc_weather_fallback();
                self.fallback(location)
            }
        }
    }

    fn normalize(&self, location: &str, reading: WeatherReading) -> WeatherSnapshot {
        let condition = WeatherCondition::from_text(&reading.condition_text);
        let rainfall_mm = if reading.precip_mm <= 0.0 && condition == WeatherCondition::Rainy {
            self.rain_assumed_mm
        } else {
            reading.precip_mm.max(0.0)
        };
        WeatherSnapshot {
            condition,
            temperature: reading.temperature,
            humidity: reading.humidity,
            wind_speed: reading.wind_speed,
            forecast: format!(
                "{}, {:.1}°C, humidity {:.0}%, wind {:.0} km/h",
                reading.condition_text.trim(),
                reading.temperature,
                reading.humidity,
                reading.wind_speed
            ),
            rainfall_mm,
            location: location.to_string(),
            fetched_at: Utc::now(),
            fallback: false,
        }
    }

    fn fallback(&self, location: &str) -> WeatherSnapshot {
        WeatherSnapshot {
            condition: WeatherCondition::Sunny,
            temperature: 0.0,
            humidity: 0.0,
            wind_speed: 0.0,
            forecast: "Weather service unavailable; assuming clear conditions.".to_string(),
            rainfall_mm: self.fallback_rainfall_mm,
            location: location.to_string(),
            fetched_at: Utc::now(),
            fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_keywords() {
        assert_eq!(WeatherCondition::from_text("Light drizzle"), WeatherCondition::Rainy);
        assert_eq!(
            WeatherCondition::from_text("Patchy rain nearby"),
            WeatherCondition::Rainy
        );
        assert_eq!(
            WeatherCondition::from_text("Thundery SHOWERS"),
            WeatherCondition::Rainy
        );
        assert_eq!(WeatherCondition::from_text("Overcast"), WeatherCondition::Cloudy);
        assert_eq!(
            WeatherCondition::from_text("Partly cloudy"),
            WeatherCondition::Cloudy
        );
        assert_eq!(WeatherCondition::from_text("Mist"), WeatherCondition::Sunny);
        assert_eq!(WeatherCondition::from_text(""), WeatherCondition::Sunny);
    }

    struct Fixed(WeatherReading);

    impl WeatherSource for Fixed {
        async fn lookup(&self, _location: &str) -> Result<WeatherReading, WeatherError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn rain_without_precip_assumes_default() {
        let cache = WeatherCache::new(
            Fixed(WeatherReading {
                condition_text: "Moderate rain".into(),
                temperature: 24.0,
                humidity: 90.0,
                wind_speed: 10.0,
                precip_mm: 0.0,
            }),
            &WeatherConfig::default(),
        );
        let snap = cache.current().await;
        assert_eq!(snap.condition, WeatherCondition::Rainy);
        assert_eq!(snap.rainfall_mm, 5.0);
        assert!(!snap.fallback);
        assert_eq!(snap.location, "Mumbai,IN");
    }
}
