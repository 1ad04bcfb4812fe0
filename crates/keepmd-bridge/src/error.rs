use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use keepmd_core::Error as CoreError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Browser login required.")]
    BrowserLoginRequired { url: Option<String> },
    #[error("External dependency error: {0}")]
    External(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error body shape expected by export clients: `{"detail": ...}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: Detail,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Detail {
    Message(String),
    Browser { message: String, url: Option<String> },
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Login-path mapping: anything other than a browser challenge is
    /// reported as an authentication failure.
    pub fn from_login(error: CoreError) -> Self {
        match error {
            CoreError::BrowserLoginRequired { url } => Self::BrowserLoginRequired { url },
            CoreError::Authentication(message) => Self::Unauthorized(message),
            other => Self::Unauthorized(other.to_string()),
        }
    }

    fn detail(self) -> Detail {
        match self {
            Self::BrowserLoginRequired { url } => Detail::Browser {
                message: "Browser login required.".to_string(),
                url,
            },
            Self::BadRequest(message)
            | Self::Unauthorized(message)
            | Self::External(message)
            | Self::Internal(message) => Detail::Message(message),
        }
    }
}

impl From<CoreError> for AppError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Authentication(message) => Self::Unauthorized(message),
            CoreError::NotLoggedIn => Self::Unauthorized(error.to_string()),
            CoreError::BrowserLoginRequired { url } => Self::BrowserLoginRequired { url },
            CoreError::Exchange(_) | CoreError::Sync(_) => Self::External(error.to_string()),
            CoreError::Storage(_) => Self::Internal(error.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BrowserLoginRequired { .. } => StatusCode::CONFLICT,
            Self::External(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), "Request failed: {}", self);
        }
        let body = ErrorBody {
            detail: self.detail(),
        };
        (status, Json(body)).into_response()
    }
}
