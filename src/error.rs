use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use std::fmt;

/// Request-scoped failures surfaced to the client.
///
/// Startup failures (missing or corrupt artifact, bad config) never appear
/// here; those travel as `anyhow::Error` out of `main` and the process exits
/// non-zero before serving.
#[derive(Debug)]
pub enum PredictError {
    /// Body failed to decode as numeric CSV. Always a client error.
    InputFormat(String),
    /// The `Content-Type` header names a media type other than CSV.
    UnsupportedContentType(String),
    /// The model failed to evaluate an already-parsed batch.
    Inference(String),
    /// The artifact is not loaded yet, or workers behind the gateway are not.
    NotReady,
}

impl fmt::Display for PredictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictError::InputFormat(msg) => write!(f, "invalid request body: {}", msg),
            PredictError::UnsupportedContentType(ct) => {
                write!(f, "unsupported content type {:?}, expected text/csv", ct)
            }
            PredictError::Inference(msg) => write!(f, "inference failed: {}", msg),
            PredictError::NotReady => write!(f, "model is not loaded yet"),
        }
    }
}

impl std::error::Error for PredictError {}

impl ResponseError for PredictError {
    fn status_code(&self) -> StatusCode {
        match self {
            PredictError::InputFormat(_) => StatusCode::BAD_REQUEST,
            PredictError::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            PredictError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PredictError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}
