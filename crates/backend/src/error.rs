//! API error type.
//!
//! Handlers return `ApiResult<T>` and use `?`; `IntoResponse` turns every
//! variant into a status code plus a JSON `{error, details}` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::calendar::provider::ProviderError;
use crate::calendar::SyncError;
use crate::services::MeetingError;

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Unified error type for API handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// Database connection pool error
    #[error("Database connection error")]
    ConnectionPool(#[source] diesel_async::pooled_connection::deadpool::PoolError),

    /// Database query error
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Generic database/anyhow error
    #[error("{0}")]
    Internal(anyhow::Error),

    /// Resource not found
    #[error("{0} not found")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Calendar provider (or its token endpoint) failed
    #[error("Calendar provider error: {0}")]
    Upstream(String),

    /// Environment variable missing
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication required but not provided or invalid
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl ApiError {
    /// Create a not found error with a custom message
    pub fn not_found(resource: impl Into<String>) -> Self {
        ApiError::NotFound(resource.into())
    }

    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    /// Create a config error for missing env vars
    pub fn missing_env(var_name: &str) -> Self {
        ApiError::Config(format!("{} environment variable must be set", var_name))
    }
}

impl From<MeetingError> for ApiError {
    fn from(err: MeetingError) -> Self {
        match err {
            MeetingError::NotFound => ApiError::not_found("Meeting"),
            MeetingError::ClientNotFound => ApiError::not_found("Client"),
            MeetingError::Internal(e) => ApiError::from(e),
            invalid => ApiError::bad_request(invalid.to_string()),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotConnected => ApiError::BadRequest("Calendar is not connected".to_string()),
            SyncError::MeetingNotFound => ApiError::not_found("Meeting"),
            SyncError::NotLinked => {
                ApiError::BadRequest("Meeting has no linked calendar event".to_string())
            }
            SyncError::MissingWebhookAddress => ApiError::missing_env("WEBHOOK_ADDRESS"),
            stale @ SyncError::StaleGrant => ApiError::Upstream(stale.to_string()),
            SyncError::Provider(ProviderError::Unauthorized(msg)) => ApiError::Upstream(format!(
                "Calendar access was rejected, reconnect the calendar: {}",
                msg
            )),
            SyncError::Provider(e) => ApiError::Upstream(e.to_string()),
            SyncError::Store(e) => ApiError::from(e),
        }
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for ApiError {
    fn from(err: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        ApiError::ConnectionPool(err)
    }
}

/// Data access returns `anyhow`; recover pool and diesel errors so they keep
/// their status codes.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<diesel_async::pooled_connection::deadpool::PoolError>() {
            Ok(pool_err) => return ApiError::ConnectionPool(pool_err),
            Err(err) => err,
        };
        match err.downcast::<diesel::result::Error>() {
            Ok(db_err) => ApiError::Database(db_err),
            Err(err) => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            ApiError::ConnectionPool(e) => {
                tracing::error!("Connection pool error: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Database connection unavailable".to_string(),
                    None,
                )
            }
            ApiError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                match e {
                    diesel::result::Error::NotFound => (
                        StatusCode::NOT_FOUND,
                        "Resource not found".to_string(),
                        None,
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Database operation failed".to_string(),
                        None,
                    ),
                }
            }
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    Some(e.to_string()),
                )
            }
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                format!("{} not found", resource),
                None,
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            ApiError::Upstream(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "Calendar provider request failed".to_string(),
                    Some(msg.clone()),
                )
            }
            ApiError::Config(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Server configuration error".to_string(),
                    None,
                )
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(status_of(ApiError::not_found("Meeting")), StatusCode::NOT_FOUND);
        assert_eq!(status_of(ApiError::bad_request("ends_at")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(ApiError::Database(diesel::result::Error::NotFound)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApiError::Unauthorized("missing".to_string())),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_sync_errors_map_to_gateway_or_client_errors() {
        let provider = SyncError::Provider(ProviderError::Transport("reset".to_string()));
        assert_eq!(status_of(provider.into()), StatusCode::BAD_GATEWAY);
        assert_eq!(status_of(SyncError::NotConnected.into()), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(SyncError::MeetingNotFound.into()), StatusCode::NOT_FOUND);
        assert_eq!(status_of(SyncError::StaleGrant.into()), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_anyhow_keeps_diesel_not_found() {
        let wrapped = anyhow::Error::new(diesel::result::Error::NotFound).context("Loading agent");
        assert_eq!(status_of(wrapped.into()), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(anyhow::anyhow!("boom").into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_meeting_errors() {
        assert_eq!(status_of(MeetingError::InvalidWindow.into()), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(MeetingError::ClientNotFound.into()), StatusCode::NOT_FOUND);
        assert_eq!(status_of(MeetingError::NotFound.into()), StatusCode::NOT_FOUND);
    }
}
