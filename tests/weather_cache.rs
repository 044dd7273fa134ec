mod common;

use std::time::Duration;

use agrolink::config::WeatherConfig;
use agrolink::weather::{WeatherCache, WeatherCondition};
use common::CountingWeather;

fn cache(source: CountingWeather) -> WeatherCache<CountingWeather> {
    WeatherCache::new(source, &WeatherConfig::default())
}

#[tokio::test(start_paused = true)]
async fn within_ttl_is_served_from_cache() {
    let source = CountingWeather::new();
    let cache = cache(source.clone());

    let first = cache.current().await;
    tokio::time::advance(Duration::from_secs(1800)).await;
    let second = cache.current().await;

    assert_eq!(source.lookups(), 1);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(first.condition, WeatherCondition::Rainy);
    assert_eq!(first.rainfall_mm, 1.2);
}

#[tokio::test(start_paused = true)]
async fn expiry_triggers_exactly_one_new_lookup() {
    let source = CountingWeather::new();
    let cache = cache(source.clone());

    cache.current().await;
    tokio::time::advance(Duration::from_secs(3601)).await;
    cache.current().await;
    cache.current().await;
    assert_eq!(source.lookups(), 2);
}

#[tokio::test(start_paused = true)]
async fn failures_fall_back_and_are_not_cached() {
    let source = CountingWeather::new();
    source.set_failing(true);
    let cache = cache(source.clone());

    let fallback = cache.current().await;
    assert!(fallback.fallback);
    assert_eq!(fallback.condition, WeatherCondition::Sunny);
    assert_eq!(fallback.rainfall_mm, 200.0);
    assert!(!fallback.forecast.is_empty());

    // Retried immediately, not after a TTL
    cache.current().await;
    assert_eq!(source.lookups(), 2);

    source.set_failing(false);
    let fresh = cache.current().await;
    assert!(!fresh.fallback);
    cache.current().await;
    assert_eq!(source.lookups(), 3);
}

#[tokio::test(start_paused = true)]
async fn slow_lookup_degrades_to_fallback() {
    let source = CountingWeather::slow(Duration::from_secs(60));
    let cache = cache(source.clone());

    let started = tokio::time::Instant::now();
    let snapshot = cache.current().await;
    assert!(snapshot.fallback);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn other_location_is_looked_up() {
    let source = CountingWeather::new();
    let cache = cache(source.clone());

    let home = cache.current().await;
    let other = cache.get("Pune,IN").await;
    assert_eq!(home.location, "Mumbai,IN");
    assert_eq!(other.location, "Pune,IN");
    assert_eq!(source.lookups(), 2);
}
