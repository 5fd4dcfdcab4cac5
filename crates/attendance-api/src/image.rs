use super::{ApiError, Request};
use axum::{
    extract::{multipart, FromRequest},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use base64::Engine;
use bytes::Bytes;

const IMAGE_FIELD: &str = "image";

/// ImagePayload is an image submitted in the body of a request.
/// The image may be provided in one of several ways:
/// - `Content-Type: multipart/form-data` with a field named `image`.
/// - `Content-Type: application/json` with a body of `{"image": <base64>}`.
/// - Any other content type, where the entire body is the raw image.
#[derive(Debug)]
pub struct ImagePayload(pub Bytes);

#[derive(Debug, serde::Deserialize, validator::Validate)]
struct EncodedImage {
    #[serde(default)]
    #[validate(length(min = 1, message = "no image provided"))]
    image: String,
}

/// ImageRejection describes why an ImagePayload could not be extracted.
#[derive(Debug, thiserror::Error)]
pub enum ImageRejection {
    #[error("invalid multipart request: {0}")]
    BadMultipartReq(#[from] multipart::MultipartRejection),
    // Different from MultipartRejection because this catches errors reading the body.
    #[error("multipart error: {0}")]
    MultipartError(#[from] multipart::MultipartError),
    #[error("missing request part: 'image'")]
    MissingImage,
    #[error("duplicate request part: 'image'")]
    DuplicateImage,
    #[error(transparent)]
    InvalidJson(#[from] super::Rejection),
    #[error("image is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("failed to read request body: {0}")]
    InvalidBody(#[from] axum::extract::rejection::BytesRejection),
}

impl ImageRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            ImageRejection::BadMultipartReq(inner) => inner.status(),
            ImageRejection::MultipartError(inner) => inner.status(),
            ImageRejection::InvalidJson(inner) => inner.status(),
            ImageRejection::InvalidBody(inner) => inner.status(),
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<ImageRejection> for ApiError {
    fn from(rejection: ImageRejection) -> Self {
        ApiError::new(rejection.status(), rejection.into())
    }
}

impl IntoResponse for ImageRejection {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

impl<S> FromRequest<S> for ImagePayload
where
    S: Send + Sync,
{
    type Rejection = ImageRejection;

    async fn from_request(req: axum::extract::Request, state: &S) -> Result<Self, Self::Rejection> {
        let mime = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<mime::Mime>().ok());

        match mime
            .as_ref()
            .map(|m| (m.type_().as_str(), m.subtype().as_str()))
        {
            Some(("multipart", "form-data")) => {
                let multipart = axum::extract::Multipart::from_request(req, state).await?;
                Self::from_multipart(multipart).await
            }
            Some(("application", "json")) => {
                let Request(EncodedImage { image }) =
                    Request::<EncodedImage>::from_request(req, state).await?;
                let bytes = base64::engine::general_purpose::STANDARD.decode(image.trim())?;
                Ok(ImagePayload(bytes.into()))
            }
            _ => Ok(ImagePayload(Bytes::from_request(req, state).await?)),
        }
    }
}

impl ImagePayload {
    async fn from_multipart(mut multipart: axum::extract::Multipart) -> Result<Self, ImageRejection> {
        let mut image: Option<Bytes> = None;

        while let Some(field) = multipart.next_field().await? {
            if field.name() != Some(IMAGE_FIELD) {
                tracing::debug!(name = ?field.name(), "skipping unexpected multipart field");
                continue;
            }
            let bytes = field.bytes().await?;
            if image.is_some() {
                return Err(ImageRejection::DuplicateImage);
            }
            image = Some(bytes);
        }

        image
            .map(ImagePayload)
            .ok_or(ImageRejection::MissingImage)
    }
}
