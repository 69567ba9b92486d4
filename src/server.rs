//! HTTP routes over [`PredictionService`].

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::predict::{PredictRequest, PredictionService};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PredictQuery {
    pub date: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

pub fn prediction_router(service: Arc<PredictionService>) -> Router {
    Router::new()
        .route("/predict", get(get_predict))
        .route("/health", get(get_health))
        .with_state(AppState { service })
}

/// Accepts `YYYY-MM-DD` or a timestamp; the time of day is discarded.
pub fn parse_request_date(raw: &str) -> Result<NaiveDate, String> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(dt.date());
        }
    }
    Err(format!("invalid date '{trimmed}', expected YYYY-MM-DD"))
}

#[derive(Clone)]
struct AppState {
    service: Arc<PredictionService>,
}

async fn get_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_predict(State(state): State<AppState>, Query(query): Query<PredictQuery>) -> Response {
    info!(
        component = "server",
        event = "http.predict.request",
        date = ?query.date,
        lat = ?query.lat,
        lon = ?query.lon
    );

    let date = match query.date.as_deref().filter(|raw| !raw.trim().is_empty()) {
        Some(raw) => match parse_request_date(raw) {
            Ok(date) => Some(date),
            Err(detail) => return failure(detail),
        },
        None => None,
    };
    let req = PredictRequest {
        date,
        lat: query.lat,
        lon: query.lon,
    };

    let service = Arc::clone(&state.service);
    match tokio::task::spawn_blocking(move || service.predict(&req)).await {
        Ok(Ok(response)) => Json(response).into_response(),
        Ok(Err(err)) => failure(err.to_string()),
        Err(err) => failure(err.to_string()),
    }
}

fn failure(detail: String) -> Response {
    warn!(
        component = "server",
        event = "http.predict.error",
        detail = %detail
    );
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody { detail }),
    )
        .into_response()
}
