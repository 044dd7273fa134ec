//! HTTP routes over [`ApiService`].
//!
//! | Route                     | Result                                   |
//! |---------------------------|------------------------------------------|
//! | `GET  /api/state`         | current state (also `/api/all`)          |
//! | `GET  /api/history?limit` | last N readings, oldest first            |
//! | `GET  /api/weather`       | weather snapshot                         |
//! | `GET  /api/metrics`       | pipeline counters                        |
//! | `POST /api/pump`          | `{"command":"PUMP_ON","mode":"manual"}`  |
//! | `POST /api/pump/:action`  | `on` / `off`                             |
//! | `POST /api/telemetry`     | push a telemetry object                  |

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use log::info;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use super::{ApiError, ApiService, CommandRequest, CommandResponse};
use crate::actuator::AckResult;
use crate::state::CommandMode;
use crate::weather::WeatherSource;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (
            status,
            Json(json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}

fn command_response(response: CommandResponse) -> Response {
    let status = match response.result {
        AckResult::Acked { .. } => StatusCode::OK,
        AckResult::Unacknowledged => StatusCode::ACCEPTED,
        AckResult::NotConnected | AckResult::Failed { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(response)).into_response()
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

pub fn router<S>(api: ApiService<S>) -> Router
where
    S: WeatherSource + 'static,
{
    Router::new()
        .route("/api/state", get(state_handler::<S>))
        .route("/api/all", get(state_handler::<S>))
        .route("/api/history", get(history_handler::<S>))
        .route("/api/weather", get(weather_handler::<S>))
        .route("/api/metrics", get(metrics_handler::<S>))
        .route("/api/pump", post(pump_handler::<S>))
        .route("/api/pump/:action", post(pump_action_handler::<S>))
        .route("/api/telemetry", post(telemetry_handler::<S>))
        .layer(CorsLayer::permissive())
        .with_state(api)
}

/// Serve until `shutdown` resolves.
pub async fn serve<S, F>(api: ApiService<S>, bind: &str, shutdown: F) -> anyhow::Result<()>
where
    S: WeatherSource + 'static,
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(api))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn state_handler<S: WeatherSource + 'static>(
    State(api): State<ApiService<S>>,
) -> Response {
    Json(api.current_state()).into_response()
}

async fn history_handler<S: WeatherSource + 'static>(
    State(api): State<ApiService<S>>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let readings = api.history(query.limit);
    Json(json!({ "count": readings.len(), "history": readings })).into_response()
}

async fn weather_handler<S: WeatherSource + 'static>(
    State(api): State<ApiService<S>>,
) -> Response {
    Json(api.weather().await).into_response()
}

async fn metrics_handler<S: WeatherSource + 'static>(
    State(api): State<ApiService<S>>,
) -> Response {
    Json(api.metrics()).into_response()
}

async fn pump_handler<S: WeatherSource + 'static>(
    State(api): State<ApiService<S>>,
    Json(request): Json<CommandRequest>,
) -> Result<Response, ApiError> {
    Ok(command_response(api.actuator_command(request).await?))
}

async fn pump_action_handler<S: WeatherSource + 'static>(
    State(api): State<ApiService<S>>,
    Path(action): Path<String>,
) -> Result<Response, ApiError> {
    let request = CommandRequest {
        command: action,
        mode: CommandMode::Manual,
    };
    Ok(command_response(api.actuator_command(request).await?))
}

async fn telemetry_handler<S: WeatherSource + 'static>(
    State(api): State<ApiService<S>>,
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let reading = api.push_telemetry(body).await?;
    Ok(Json(json!({ "success": true, "reading": reading })).into_response())
}
