//! Unified API error handling with structured responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::auth::AuthError;
use crate::label::LabelError;
use crate::launch::LaunchError;
use crate::login::LoginError;

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Client-visible request failures.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown service ID.
    #[error("{0}")]
    InvalidService(String),

    /// The authorization lookup found no matching user.
    #[error("{0}")]
    InvalidCredentials(String),

    /// The user already holds a session for the service.
    #[error("{0}")]
    SessionConflict(String),

    /// The instance never reported readiness.
    #[error("{0}")]
    LaunchFailure(String),

    /// The labeling tool failed; the request is aborted.
    #[error("{0}")]
    LabelingFailure(String),

    /// The forwarded login was rejected or undeliverable.
    #[error("{0}")]
    LoginForwardFailure(String),

    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid_service(msg: impl Into<String>) -> Self {
        Self::InvalidService(msg.into())
    }

    pub fn invalid_credentials(msg: impl Into<String>) -> Self {
        Self::InvalidCredentials(msg.into())
    }

    pub fn session_conflict(msg: impl Into<String>) -> Self {
        Self::SessionConflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidService(_) => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials(_) => StatusCode::BAD_REQUEST,
            Self::SessionConflict(_) => StatusCode::CONFLICT,
            Self::LaunchFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::LabelingFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::LoginForwardFailure(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidService(_) => "INVALID_SERVICE",
            Self::InvalidCredentials(_) => "INVALID_CREDENTIALS",
            Self::SessionConflict(_) => "SESSION_CONFLICT",
            Self::LaunchFailure(_) => "LAUNCH_FAILURE",
            Self::LabelingFailure(_) => "LABELING_FAILURE",
            Self::LoginForwardFailure(_) => "LOGIN_FORWARD_FAILURE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::LabelingFailure(msg) | ApiError::Internal(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            ApiError::LaunchFailure(msg) | ApiError::LoginForwardFailure(msg) => {
                warn!(error_code = code, message = %msg, "Provisioning failed");
            }
            _ => {
                tracing::debug!(error_code = code, message = %message, "Client error");
            }
        }

        let body = ErrorResponse { message, code };
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<LaunchError> for ApiError {
    fn from(err: LaunchError) -> Self {
        match err {
            LaunchError::ReadinessTimeout { .. } => ApiError::LaunchFailure(err.to_string()),
            LaunchError::Engine(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<LoginError> for ApiError {
    fn from(err: LoginError) -> Self {
        ApiError::LoginForwardFailure(err.to_string())
    }
}

impl From<LabelError> for ApiError {
    fn from(err: LabelError) -> Self {
        ApiError::LabelingFailure(err.to_string())
    }
}
