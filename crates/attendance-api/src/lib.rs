use anyhow::Context;
use axum::{http::StatusCode, response::IntoResponse};
use std::sync::Arc;

mod attendance;
mod capture_face;
mod error;
mod esp32;
mod health;
mod image;
mod students;

pub use error::{ApiError, ApiErrorExt};
pub use image::{ImagePayload, ImageRejection};

/// Request wraps a JSON-deserialized request type T which
/// also implements the validator::Validate trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct Request<T>(pub T);

/// Rejection is an error type of reasons why an API request may fail.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error("Input validation error: [{}]", .0.to_string().replace('\n', ", "))]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    JsonError(#[from] axum::extract::rejection::JsonRejection),
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::ValidationError(_) => StatusCode::BAD_REQUEST,
            Rejection::JsonError(inner) => inner.status(),
        }
    }
}

/// App is the shared state of API handlers.
pub struct App {
    pub coordinator: Arc<capture::Coordinator>,
    pub face_api: face_api::Client,
    pub pg_pool: sqlx::PgPool,
    /// Handle of the installed Prometheus recorder, if metrics are exported.
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

/// Build the attendance API router.
pub fn build_router(app: Arc<App>, allow_origin: &[String]) -> anyhow::Result<axum::Router<()>> {
    use axum::routing::{get, post};

    let allow_origin = allow_origin
        .iter()
        .map(|o| o.parse())
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse allowed origins")?;

    let cors = tower_http::cors::CorsLayer::new()
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_origin(tower_http::cors::AllowOrigin::list(allow_origin))
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::header::AUTHORIZATION,
        ]);

    // Images may be submitted as base64 within JSON, which inflates them by a third.
    let max_image_bytes = app.coordinator.config().max_image_bytes;
    let body_limit = max_image_bytes / 3 * 4 + 64 * 1024;

    let router = axum::Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::prometheus_metrics))
        .route("/api/capture-face", post(capture_face::capture_face))
        .route("/api/capture-face/status", get(capture_face::capture_status))
        .route("/api/esp32/upload-image", post(esp32::upload_image))
        .route(
            "/api/attendance",
            get(attendance::list_attendance).post(attendance::register_attendance),
        )
        .route("/api/students", get(students::list_students))
        .fallback(not_found)
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .on_failure(tower_http::trace::DefaultOnFailure::new().level(tracing::Level::INFO)),
        )
        .layer(cors)
        .with_state(app);

    Ok(router)
}

async fn not_found() -> ApiError {
    ApiError::not_found("route not found")
}

impl<T, S> axum::extract::FromRequest<S> for Request<T>
where
    T: serde::de::DeserializeOwned + validator::Validate,
    S: Send + Sync,
    axum::extract::Json<T>:
        axum::extract::FromRequest<S, Rejection = axum::extract::rejection::JsonRejection>,
{
    type Rejection = Rejection;

    async fn from_request(req: axum::extract::Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::extract::Json(value) = axum::extract::Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Request(value))
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> axum::response::Response {
        ApiError::from(self).into_response()
    }
}
