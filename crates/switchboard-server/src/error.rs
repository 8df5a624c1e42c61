//! HTTP error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::broker::BrokerError;

/// Error returned by admin handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request or missing confirmation.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or wrong bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// The broker actor is not running.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Storage or other internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Shorthand for [`ApiError::BadRequest`].
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        let message = err.to_string();
        match err {
            BrokerError::Unavailable => Self::ServiceUnavailable(message),
            BrokerError::ConfirmationRequired => Self::BadRequest(message),
            BrokerError::Store(_) => Self::Internal(message),
        }
    }
}

impl From<switchboard_store::StoreError> for ApiError {
    fn from(err: switchboard_store::StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            Self::Internal(_) => error!(error_code = code, %message, "API error"),
            Self::ServiceUnavailable(_) => warn!(error_code = code, %message, "service unavailable"),
            _ => debug!(error_code = code, %message, "client error"),
        }

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn renders_code_and_message() {
        let (status, body) = body_json(ApiError::bad_request("group must be a string")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
        assert_eq!(body["error"]["message"], "bad request: group must be a string");
    }

    #[test]
    fn broker_errors_map_to_statuses() {
        assert_eq!(
            ApiError::from(BrokerError::Unavailable).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(BrokerError::ConfirmationRequired).status_code(),
            StatusCode::BAD_REQUEST
        );
        let store = switchboard_store::StoreError::Migration {
            message: "boom".into(),
        };
        assert_eq!(
            ApiError::from(BrokerError::Store(store)).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn unauthorized_status() {
        let (status, body) = body_json(ApiError::Unauthorized).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }
}
