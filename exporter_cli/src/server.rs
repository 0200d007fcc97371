use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use exporter_collectors::UpdaterRegistry;
use exporter_metrics::exporters::prometheus::CONTENT_TYPE;
use exporter_metrics::{MetricsRegistry, PrometheusExporter};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    start_time: Instant,
    metrics: Arc<MetricsRegistry>,
    updaters: Arc<UpdaterRegistry>,
}

impl AppState {
    pub fn new(metrics: Arc<MetricsRegistry>, updaters: Arc<UpdaterRegistry>) -> Self {
        Self {
            start_time: Instant::now(),
            metrics,
            updaters,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
    updaters: Vec<UpdaterHealth>,
}

#[derive(Debug, Serialize)]
struct UpdaterHealth {
    name: String,
    /// Number of snapshots published so far; 0 until the first cycle succeeds.
    generation: u64,
    series: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn metrics(State(state): State<AppState>) -> Response {
    match PrometheusExporter::render(&state.metrics) {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut updaters: Vec<UpdaterHealth> = state
        .updaters
        .updaters()
        .map(|updater| UpdaterHealth {
            name: updater.name().to_string(),
            generation: updater.publisher().generation(),
            series: updater.publisher().current().len(),
        })
        .collect();
    updaters.sort_by(|a, b| a.name.cmp(&b.name));

    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        updaters,
    })
}
