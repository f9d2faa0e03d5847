use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tts_core::{SynthesisError, SynthesisErrorKind};

use crate::gate::AdmissionError;
use crate::scratch::ResourceError;

/// Failures reported to the client before any audio bytes are sent.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Synthesizer busy: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl ApiError {
    /// Stable machine-readable category for the error body.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) | ApiError::PayloadTooLarge(_) => "validation",
            ApiError::Resource(_) => "resource",
            ApiError::Admission(_) => "admission",
            ApiError::Synthesis(_) => "synthesis",
            ApiError::InternalError(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            // the client stopped sending mid-upload
            ApiError::Resource(ResourceError::Truncated(_)) => StatusCode::BAD_REQUEST,
            ApiError::Resource(_) | ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Admission(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Synthesis(e) => match e.kind() {
                SynthesisErrorKind::InvalidText | SynthesisErrorKind::InvalidVoiceSample => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                SynthesisErrorKind::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
                SynthesisErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                SynthesisErrorKind::Inference => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<SynthesisErrorKind>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "{self}");
        } else {
            tracing::warn!(kind = self.kind(), "{self}");
        }

        let reason = match &self {
            ApiError::Synthesis(e) => Some(e.kind()),
            _ => None,
        };
        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: status.as_u16(),
            kind: self.kind(),
            reason,
        });

        let mut response = (status, body).into_response();
        if let ApiError::Admission(AdmissionError::Timeout(wait)) = &self {
            // whole seconds, rounded up
            let retry_after = wait.as_millis().div_ceil(1000).max(1).to_string();
            if let Ok(value) = HeaderValue::from_str(&retry_after) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
