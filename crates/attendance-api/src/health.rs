use super::App;
use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

#[derive(Debug, serde::Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub capture: capture::Snapshot,
}

pub async fn health(State(app): State<Arc<App>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now(),
        capture: app.coordinator.snapshot(),
    })
}

#[tracing::instrument(skip_all)]
pub async fn prometheus_metrics(State(app): State<Arc<App>>) -> (StatusCode, String) {
    match &app.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_FOUND,
            "metrics are not exported by this server\n".to_string(),
        ),
    }
}
