//! API error types

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use cadence_dispatch::{ServiceError, ValidationError};
use serde_json::json;
use thiserror::Error;

/// Errors that stop the API server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address
    #[error("Failed to bind API server to {address}: {source}")]
    BindError {
        address: String,
        source: std::io::Error,
    },

    /// API server encountered a runtime error
    #[error("API server error: {0}")]
    ServerError(String),
}

/// A failed request, rendered as `{"error": "..."}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(error: ValidationError) -> Self {
        Self::BadRequest(error.to_string())
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Validation(e) => e.into(),
            e @ ServiceError::NotFound(_) => Self::NotFound(e.to_string()),
            e @ ServiceError::NotPending(_) => Self::Conflict(e.to_string()),
            ServiceError::Store(e) => {
                tracing::error!(error = %e, "Store failure while handling request");
                Self::Internal("Internal server error".to_string())
            }
            ServiceError::Interrupted(e) => {
                tracing::error!(error = %e, "Scheduling task failed while handling request");
                Self::Internal("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use cadence_store::{StoreError, UnitId};

    use super::*;

    #[test]
    fn test_service_errors_map_to_status_codes() {
        let id = UnitId::generate();

        assert_eq!(
            ApiError::from(ServiceError::Validation(ValidationError::EmptyBody)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ServiceError::NotFound(id)).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(ServiceError::NotPending(id)).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(ServiceError::Store(StoreError::Internal("disk".to_string()))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_store_details_are_not_leaked() {
        let error = ApiError::from(ServiceError::Store(StoreError::Internal(
            "/var/lib/cadence is read-only".to_string(),
        )));
        assert_eq!(error.to_string(), "Internal server error");
    }
}
