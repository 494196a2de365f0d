use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use line_client::LineError;
use notion_client::NotionError;
use serde_json::json;
use summary_engine::SummaryError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("State does not match")]
    InvalidState,

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Summary(#[from] SummaryError),

    #[error("Record store error: {0}")]
    Store(#[from] NotionError),

    #[error("LINE login error: {0}")]
    Auth(#[from] LineError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl ApiError {
    /// Status and client-facing message. Upstream details stay in the logs.
    pub fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::InvalidState => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Summary(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            ApiError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to access the record store".to_string(),
            ),
            ApiError::Auth(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "LINE login failed".to_string(),
            ),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = self.status_and_message();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, %status, "Request rejected");
        }

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
