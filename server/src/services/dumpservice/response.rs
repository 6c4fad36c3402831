//! Response bodies for the dump API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use joblib::DumpStats;
use serde::Serialize;

const FALLBACK_MESSAGE: &str = "Internal server error";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpResponse {
    pub success: bool,
    pub dumped_code: String,
    pub stats: Option<DumpStats>,
    pub console_output: String,
    pub warnings: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub uptime: f64,
}

#[derive(Clone, Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ErrorState {
    pub message: String,
    pub details: Option<String>,
}

impl ErrorState {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }
}

/// Every failure the dump API reports. Both variants render as `{success: false, error, details?}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(ErrorState),
    Internal(ErrorState),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(ErrorState::new(message))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(ErrorState::new(message))
    }

    pub fn with_details(mut self, details: Option<String>) -> Self {
        match &mut self {
            Self::BadRequest(s) | Self::Internal(s) => s.details = details,
        }
        self
    }
}

impl From<joblib::error::Error> for ApiError {
    fn from(err: joblib::error::Error) -> Self {
        let message = err.to_string();
        if message.is_empty() {
            Self::internal(FALLBACK_MESSAGE)
        } else {
            Self::internal(message)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, state) = match self {
            Self::BadRequest(s) => (StatusCode::BAD_REQUEST, s),
            Self::Internal(s) => (StatusCode::INTERNAL_SERVER_ERROR, s),
        };
        let body = ErrorBody {
            success: false,
            error: state.message,
            details: state.details,
        };
        (status, Json(body)).into_response()
    }
}

/// The 500 returned when a handler panics.
pub fn unhandled() -> ApiError {
    ApiError::internal(FALLBACK_MESSAGE)
}
