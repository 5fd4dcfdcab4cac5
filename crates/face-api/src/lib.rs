//! Client of the external face-recognition service.
//!
//! The service holds face encodings of registered students. Given an image,
//! it answers whether the image contains a known face, and whose.
use base64::Engine;
use std::time::Duration;

/// Recognition is the service's verdict on a submitted image.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Recognition {
    pub recognized: bool,
    #[serde(default)]
    pub student_id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    /// Explanation of a negative verdict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid face recognition service URL")]
    Url(#[from] url::ParseError),
    #[error("face recognition request failed")]
    Request(#[from] reqwest::Error),
    #[error("face recognition service responded with {status}: {message}")]
    Service {
        status: reqwest::StatusCode,
        message: String,
    },
}

#[derive(serde::Serialize)]
struct RecognizeRequest<'a> {
    image: &'a str,
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    recognize_url: url::Url,
}

impl Client {
    /// Build a Client of the service rooted at `base_url`.
    /// Requests which take longer than `timeout` fail.
    pub fn new(base_url: &url::Url, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let recognize_url = base_url.join("recognize")?;

        Ok(Self {
            http,
            recognize_url,
        })
    }

    /// Submit an image for recognition.
    #[tracing::instrument(skip_all, fields(len = image.len()))]
    pub async fn recognize(&self, image: &[u8]) -> Result<Recognition, Error> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);

        let response = self
            .http
            .post(self.recognize_url.clone())
            .json(&RecognizeRequest { image: &encoded })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(ErrorBody { error }) => error,
                Err(_) => "<no error detail>".to_string(),
            };
            return Err(Error::Service { status, message });
        }

        let recognition: Recognition = response.json().await?;
        tracing::debug!(
            recognized = recognition.recognized,
            student_id = ?recognition.student_id,
            confidence = recognition.confidence,
            "face recognition completed"
        );

        Ok(recognition)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::{json, Value};

    // Stand-in for the recognition service which knows a single face,
    // encoded as the literal image bytes "alice".
    async fn recognize_stub(axum::Json(body): axum::Json<Value>) -> axum::response::Response {
        use axum::response::IntoResponse;

        let Some(image) = body.get("image").and_then(Value::as_str) else {
            return (
                axum::http::StatusCode::BAD_REQUEST,
                axum::Json(json!({"error": "no image provided"})),
            )
                .into_response();
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(image)
            .unwrap_or_default();

        let body = match decoded.as_slice() {
            b"alice" => json!({
                "recognized": true,
                "student_id": 7,
                "student_name": "Alice",
                "confidence": 0.75,
            }),
            b"" => {
                return (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    axum::Json(json!({"error": "empty image"})),
                )
                    .into_response()
            }
            _ => json!({
                "recognized": false,
                "student_id": null,
                "confidence": 0.0,
                "message": "face not recognized",
            }),
        };
        axum::Json(body).into_response()
    }

    async fn start_stub() -> url::Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let router =
            axum::Router::new().route("/recognize", axum::routing::post(recognize_stub));
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        format!("http://{addr}/").parse().unwrap()
    }

    #[tokio::test]
    async fn test_recognized_face() {
        let client = Client::new(&start_stub().await, Duration::from_secs(5)).unwrap();
        let recognition = client.recognize(b"alice").await.unwrap();

        insta::assert_json_snapshot!(recognition, @r###"
        {
          "recognized": true,
          "student_id": 7,
          "student_name": "Alice",
          "confidence": 0.75
        }
        "###);
    }

    #[tokio::test]
    async fn test_unrecognized_face() {
        let client = Client::new(&start_stub().await, Duration::from_secs(5)).unwrap();
        let recognition = client.recognize(b"mallory").await.unwrap();

        assert_eq!(
            recognition,
            Recognition {
                recognized: false,
                student_id: None,
                student_name: None,
                confidence: 0.0,
                message: Some("face not recognized".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_service_error() {
        let client = Client::new(&start_stub().await, Duration::from_secs(5)).unwrap();
        let err = client.recognize(b"").await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "face recognition service responded with 500 Internal Server Error: empty image"
        );
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        // Bind and immediately release a port, so that nothing is listening on it.
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let base = format!("http://{addr}/").parse().unwrap();

        let client = Client::new(&base, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            client.recognize(b"alice").await,
            Err(Error::Request(_))
        ));
    }
}
