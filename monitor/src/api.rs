use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use lms_common::state::TelemetryState;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::ingest::reader::{ReaderSnapshot, ReaderStats};
use crate::predict::Predictor;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub telemetry: Arc<TelemetryState>,
    /// `None` when the models failed to load at startup.
    pub predictor: Option<Arc<Predictor>>,
    pub readers: BTreeMap<&'static str, Arc<ReaderStats>>,
    pub start_time: Instant,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    uptime_secs: u64,
    readers: BTreeMap<&'static str, ReaderSnapshot>,
    predictor_loaded: bool,
}

#[derive(Debug, Deserialize)]
pub struct SymptomsInput {
    pub symptoms: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PredictionResponse {
    input_symptoms: Vec<String>,
    predictions: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /
async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Cattle Health API Running" }))
}

/// GET /api/health
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        readers: state
            .readers
            .iter()
            .map(|(name, stats)| (*name, stats.snapshot()))
            .collect(),
        predictor_loaded: state.predictor.is_some(),
    })
}

/// GET /api/vitals: latest corrected vitals, or a sentinel before the
/// first reading.
async fn vitals(State(state): State<Arc<AppState>>) -> Response {
    match state.telemetry.vitals().get() {
        Some(record) => Json(record).into_response(),
        None => Json(json!({ "status": "NO_VITAL_DATA" })).into_response(),
    }
}

/// GET /api/motion
async fn motion(State(state): State<Arc<AppState>>) -> Response {
    match state.telemetry.motion().get() {
        Some(record) => Json(record).into_response(),
        None => Json(json!({ "status": "NO_MOTION_DATA" })).into_response(),
    }
}

/// GET /api/combined: both sources, `null` for any without data yet.
async fn combined(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.telemetry.combined())
}

/// POST /api/predict
/// Body: { "symptoms": ["fever", "coughing"] }
async fn predict(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SymptomsInput>,
) -> Response {
    let Some(predictor) = state.predictor.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "prediction models are not loaded" })),
        )
            .into_response();
    };

    let symptoms = body.symptoms;
    let result = tokio::task::spawn_blocking(move || {
        let predictions = predictor.predict(&symptoms);
        (symptoms, predictions)
    })
    .await;

    match result {
        Ok((input_symptoms, predictions)) => Json(PredictionResponse {
            input_symptoms,
            predictions,
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/vitals", get(vitals))
        .route("/api/motion", get(motion))
        .route("/api/combined", get(combined))
        .route("/api/predict", post(predict))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn serve(addr: &str, state: Arc<AppState>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "cattle health API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
}
