use crate::chat::FrameError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub error_type: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            error_type: "invalid_request_error".to_string(),
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    /// OpenAI-style error envelope, also used as the payload of a terminal stream event.
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                message: self.message.clone(),
                error_type: self.error_type.clone(),
                param: None,
                code: self.code.clone(),
            },
        }
    }
}

impl From<FrameError> for AppError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Serialize(_) => AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "response_encode_failed",
                err.to_string(),
            )
            .with_type("server_error"),
            FrameError::MalformedEvent { .. } => {
                AppError::new(StatusCode::BAD_GATEWAY, "backend_event_malformed", err.to_string())
                    .with_type("upstream_error")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub param: Option<String>,
    pub code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, axum::Json(self.envelope())).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
