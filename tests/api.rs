mod common;

use std::sync::Arc;
use std::time::Duration;

use agrolink::actuator::AckResult;
use agrolink::api::{ApiError, ApiService, CommandRequest};
use agrolink::config::WeatherConfig;
use agrolink::ingest::{IngestionLoop, LinkHandle};
use agrolink::predict::{FeatureVector, PredictionStep};
use agrolink::state::{state_store, CommandMode};
use agrolink::telemetry::PumpCommand;
use agrolink::weather::{MockWeather, WeatherCache};
use agrolink::telemetry::{ActuatorStatus, ConnectionState};
use common::{fast_tuning, wait_until, DeviceScript, ScriptedConnector};
use serde_json::json;

fn service() -> (ApiService<MockWeather>, LinkHandle) {
    service_with(ScriptedConnector::new(vec![]))
}

fn service_with(connector: ScriptedConnector) -> (ApiService<MockWeather>, LinkHandle) {
    let (store, writer) = state_store(5);
    let weather = Arc::new(WeatherCache::new(MockWeather, &WeatherConfig::default()));
    let predictor = |f: &FeatureVector| -> Result<String, agrolink::error::PredictorError> {
        Ok(if f.rainfall > 100.0 { "rice" } else { "maize" }.to_string())
    };
    let mut tuning = fast_tuning();
    tuning.reconnect_backoff = Duration::from_secs(30);
    let (ingestion, link) = IngestionLoop::new(
        connector,
        writer,
        weather.clone(),
        PredictionStep::new(Some(Arc::new(predictor)), 40.0),
        tuning,
    );
    tokio::spawn(ingestion.run());
    (ApiService::new(store, link.clone(), weather, 3), link)
}

#[tokio::test]
async fn state_is_well_formed_before_any_data() {
    let (api, link) = service();
    let state = api.current_state();
    assert!(!state.has_data);
    let value = serde_json::to_value(&state).unwrap();
    assert_eq!(value["has_data"], false);
    assert_eq!(value["connection"], "Disconnected");
    assert_eq!(value["actuator"], "Unknown");
    assert!(api.history(None).is_empty());
    link.shutdown();
}

#[tokio::test]
async fn push_produces_the_same_prediction_contract() {
    let (api, link) = service();
    let reading = api
        .push_telemetry(json!({
            "temperature": 24.0, "humidity": 80.0, "soil_moisture": 45.0,
            "N": 80, "P": 40, "K": 40
        }))
        .await
        .unwrap();
    // No rainfall in telemetry: the mock weather's 0 mm is used
    assert_eq!(reading.prediction.label, "maize");
    assert_eq!(reading.prediction.advisory_command, PumpCommand::PumpOff);

    let value = serde_json::to_value(api.current_state()).unwrap();
    assert_eq!(value["has_data"], true);
    assert_eq!(value["telemetry"]["soil_moisture"], 45.0);
    assert_eq!(value["prediction"]["recommended_crop"], "maize");
    link.shutdown();
}

#[tokio::test]
async fn invalid_push_is_rejected_without_state_change() {
    let (api, link) = service();
    let err = api
        .push_telemetry(json!({ "temperature": 25, "humidity": 60 }))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(ref m) if m.contains("soil_moisture")));
    assert!(matches!(
        api.push_telemetry(json!("not an object")).await,
        Err(ApiError::BadRequest(_))
    ));
    assert!(!api.current_state().has_data);
    link.shutdown();
}

#[tokio::test]
async fn history_defaults_and_bounds() {
    let (api, link) = service();
    for soil in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0] {
        api.push_telemetry(json!({
            "temperature": 22.0, "humidity": 50.0, "soil_moisture": soil, "rainfall": 150.0
        }))
        .await
        .unwrap();
    }
    let default = api.history(None);
    assert_eq!(default.len(), 3);
    assert_eq!(default[0].telemetry.soil_moisture, 50.0);
    assert_eq!(default[2].telemetry.soil_moisture, 70.0);
    assert_eq!(default[2].prediction.label, "rice");
    assert_eq!(api.history(Some(1000)).len(), 5);
    link.shutdown();
}

#[tokio::test]
async fn command_contract() {
    let (api, link) = service();
    let err = api
        .actuator_command(CommandRequest {
            command: "PUMP_SIDEWAYS".to_string(),
            mode: CommandMode::Manual,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));

    let response = api
        .actuator_command(CommandRequest {
            command: "on".to_string(),
            mode: CommandMode::Auto,
        })
        .await
        .unwrap();
    assert!(!response.success);
    assert_eq!(response.command, PumpCommand::PumpOn);
    assert_eq!(response.result, AckResult::NotConnected);
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["status"], "not_connected");
    assert_eq!(value["mode"], "auto");
    link.shutdown();
}

#[tokio::test]
async fn silent_device_reports_sent_but_unacknowledged() {
    let script = DeviceScript::new();
    let (api, link) = service_with(ScriptedConnector::new(vec![script.clone()]));
    assert!(
        wait_until(
            || api.current_state().state.connection == ConnectionState::Connected,
            Duration::from_secs(5)
        )
        .await
    );

    let response = api
        .actuator_command(CommandRequest {
            command: "PUMP_ON".to_string(),
            mode: CommandMode::Manual,
        })
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.result, AckResult::Unacknowledged);
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["success"], true);
    assert_eq!(value["status"], "unacknowledged");
    assert_eq!(script.writes(), vec!["PUMP_ON".to_string()]);
    // No ack, so the relay state is still unknown
    assert_eq!(api.current_state().state.actuator, ActuatorStatus::Unknown);
    link.shutdown();
}

#[tokio::test]
async fn weather_is_served_from_the_cache() {
    let (api, link) = service();
    let a = api.weather().await;
    let b = api.weather().await;
    assert_eq!(a, b);
    assert!(!a.fallback);
    link.shutdown();
}

#[cfg(all(feature = "http", feature = "weather"))]
#[tokio::test]
async fn http_routes_map_results_to_status_codes() {
    use agrolink::api::http;

    let (api, link) = service();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, http::router(api)).await.unwrap();
    });
    let base = format!("http://{}", addr);
    let client = reqwest::Client::new();

    let state = client.get(format!("{}/api/all", base)).send().await.unwrap();
    assert_eq!(state.status().as_u16(), 200);

    let bad = client
        .post(format!("{}/api/telemetry", base))
        .json(&json!({ "temperature": 25, "humidity": 60 }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status().as_u16(), 400);

    let good = client
        .post(format!("{}/api/telemetry", base))
        .json(&json!({ "temperature": 25, "humidity": 60, "soil_moisture": 31 }))
        .send()
        .await
        .unwrap();
    assert_eq!(good.status().as_u16(), 200);
    let body: serde_json::Value = good.json().await.unwrap();
    assert_eq!(body["reading"]["pump_command"], "PUMP_ON");

    let history: serde_json::Value = client
        .get(format!("{}/api/history?limit=10", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["count"], 1);

    let pump = client
        .post(format!("{}/api/pump/on", base))
        .send()
        .await
        .unwrap();
    assert_eq!(pump.status().as_u16(), 503);

    link.shutdown();
}
