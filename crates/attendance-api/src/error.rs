//! Defines the `ApiError` type that can be returned from an API handler, which
//! specifies an HTTP status code and wraps an `anyhow::Error`. It implements
//! `IntoResponse`, allowing handlers to return a `Result<Json<T>, ApiError>`.
//! `From` impls exist for the errors of the capture, face-api, and database
//! layers with reasonable default status codes. The status code can be
//! customized using `ApiErrorExt::with_status` if a handler needs to return a
//! specific response status for a given error.
use axum::http::StatusCode;

use super::Rejection;

pub trait ApiErrorExt {
    /// Sets the given http response status to use when responding with this error.
    fn with_status(self, status: StatusCode) -> ApiError;
}

impl<E: Into<ApiError> + Sized> ApiErrorExt for E {
    fn with_status(self, status: StatusCode) -> ApiError {
        let mut err: ApiError = self.into();
        err.status = status;
        err
    }
}

/// An error response, rendered as `{"error": <message>}`.
#[derive(Debug, thiserror::Error, serde::Serialize)]
#[error("status: {status}, error: {error}")]
pub struct ApiError {
    /// The HTTP status code, conveyed by the response itself.
    #[serde(skip)]
    pub status: StatusCode,

    /// The error message
    #[serde(serialize_with = "serialize_error")]
    #[source]
    pub error: anyhow::Error,
}

fn serialize_error<S: serde::Serializer>(error: &anyhow::Error, s: S) -> Result<S::Ok, S::Error> {
    let err_str = format!("{error:#}"); // alternate renders nested causes
    s.serialize_str(&err_str)
}

impl ApiError {
    pub fn new(status: StatusCode, error: anyhow::Error) -> ApiError {
        ApiError { status, error }
    }

    pub fn not_found(message: impl std::fmt::Display) -> ApiError {
        ApiError::new(StatusCode::NOT_FOUND, anyhow::anyhow!("{message}"))
    }

    fn status_for(err: &anyhow::Error) -> StatusCode {
        if let Some(_rejection) = err.downcast_ref::<Rejection>() {
            return StatusCode::BAD_REQUEST;
        }
        if let Some(api_error) = err.downcast_ref::<ApiError>() {
            return api_error.status;
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl From<capture::Error> for ApiError {
    fn from(error: capture::Error) -> ApiError {
        let status = match &error {
            capture::Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            capture::Error::Superseded => StatusCode::CONFLICT,
            capture::Error::Transport(_) => StatusCode::BAD_GATEWAY,
        };
        ApiError {
            status,
            error: error.into(),
        }
    }
}

impl From<capture::IngestError> for ApiError {
    fn from(error: capture::IngestError) -> ApiError {
        let status = match &error {
            capture::IngestError::Empty => StatusCode::BAD_REQUEST,
            capture::IngestError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        };
        ApiError {
            status,
            error: error.into(),
        }
    }
}

impl From<face_api::Error> for ApiError {
    fn from(error: face_api::Error) -> ApiError {
        match error {
            // The service judged the image itself to be unusable.
            face_api::Error::Service { status, message } if status.is_client_error() => {
                tracing::debug!(%status, %message, "face recognition service rejected image");
                ApiError {
                    status: StatusCode::UNPROCESSABLE_ENTITY,
                    error: anyhow::anyhow!(message),
                }
            }
            error => {
                tracing::error!(?error, "API responding with face recognition error");
                ApiError {
                    status: StatusCode::BAD_GATEWAY,
                    error: anyhow::anyhow!("face recognition service is unavailable"),
                }
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> ApiError {
        tracing::error!(?error, "API responding with database error");
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: anyhow::anyhow!("database error, please retry the request"),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        let status = Self::status_for(&error);
        ApiError { status, error }
    }
}

impl From<Rejection> for ApiError {
    fn from(value: Rejection) -> Self {
        ApiError {
            status: value.status(),
            error: anyhow::Error::from(value),
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status;
        if status.is_server_error() {
            tracing::error!(error = ?self.error, %status, "internal server error");
        } else {
            tracing::debug!(error = %self.error, %status, "request failed");
        }
        (status, axum::Json(self)).into_response()
    }
}
