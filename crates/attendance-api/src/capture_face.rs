use super::{ApiError, App};
use axum::{extract::State, Json};
use base64::Engine;
use std::sync::Arc;

#[derive(Debug, serde::Serialize)]
pub struct CapturedFace {
    /// Base64 encoding of the captured image.
    pub image: String,
}

/// Trigger the capture device, and respond with the image it produces.
#[tracing::instrument(skip_all)]
pub async fn capture_face(State(app): State<Arc<App>>) -> Result<Json<CapturedFace>, ApiError> {
    let image = app.coordinator.request_image().await?;

    tracing::info!(
        size = image.bytes.len(),
        source = image.source.as_str(),
        "responding with captured image"
    );

    Ok(Json(CapturedFace {
        image: base64::engine::general_purpose::STANDARD.encode(&image.bytes),
    }))
}

pub async fn capture_status(State(app): State<Arc<App>>) -> Json<capture::Snapshot> {
    Json(app.coordinator.snapshot())
}
