use super::{ApiError, App, ImagePayload};
use axum::{extract::State, Json};
use capture::{CapturedImage, ImageSink, Source};
use std::sync::Arc;

#[derive(Debug, serde::Serialize)]
pub struct Uploaded {
    pub success: bool,
    pub size: usize,
    /// Time of receipt, in milliseconds since the Unix epoch.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Accept an image uploaded directly by the capture device, as a fallback
/// to its publish/subscribe channel.
#[tracing::instrument(skip_all)]
pub async fn upload_image(
    State(app): State<Arc<App>>,
    ImagePayload(payload): ImagePayload,
) -> Result<Json<Uploaded>, ApiError> {
    let size = payload.len();
    let disposition = app
        .coordinator
        .deposit(CapturedImage::arrived(payload, Source::Upload))?;

    tracing::info!(size, disposition = disposition.as_str(), "device uploaded image");

    Ok(Json(Uploaded {
        success: true,
        size,
        timestamp: chrono::Utc::now(),
    }))
}
