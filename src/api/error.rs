//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::content::ContentError;
use crate::runner::EngineError;
use crate::verify::CheckError;

pub const INTERNAL_ERROR: &str = "Internal server error.";

/// Body layout of an error response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyStyle {
    /// `{"success": false, "output": "", "details": message}`
    Verdict,
    /// `{"error": message}`
    Plain,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub style: BodyStyle,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            style: BodyStyle::Plain,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR)
    }

    /// Render as a failed verdict, for the verification endpoints
    pub fn as_verdict(mut self) -> Self {
        self.style = BodyStyle::Verdict;
        self
    }
}

impl From<ContentError> for ApiError {
    fn from(err: ContentError) -> Self {
        match err {
            ContentError::SourceNotConfigured { .. } => {
                error!("Content misconfigured: {}", err);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            _ => {
                error!("Content error: {}", err);
                Self::internal()
            }
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        error!("Execution engine error: {}", err);
        Self::internal()
    }
}

impl From<CheckError> for ApiError {
    fn from(err: CheckError) -> Self {
        match err {
            CheckError::CourseNotFound(_) | CheckError::ExerciseNotFound { .. } => {
                Self::not_found(err.to_string())
            }
            CheckError::Content(e) => e.into(),
            CheckError::Engine(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.style {
            BodyStyle::Verdict => json!({
                "success": false,
                "output": "",
                "details": self.message,
            }),
            BodyStyle::Plain => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}
