//! API error handling

use std::collections::BTreeMap;

use abundance_core::CoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::auth::password::PasswordError;

/// Error body returned by every endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Human-readable message
    pub error: String,
    /// Field name to failed rule, present only for validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_fields: Option<BTreeMap<String, String>>,
}

impl ApiError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            invalid_fields: None,
        }
    }

    pub fn with_fields(mut self, fields: BTreeMap<String, String>) -> Self {
        self.invalid_fields = Some(fields);
        self
    }
}

/// Application error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Body was not parseable JSON for the expected shape
    #[error("Invalid request payload")]
    InvalidPayload,

    #[error("Invalid payload")]
    Validation(BTreeMap<String, String>),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    /// Missing records are reported as client errors
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    TooManyRequests(String),

    /// Detail is logged, never returned
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn access_denied() -> Self {
        AppError::Forbidden("Access denied".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidPayload
            | AppError::Validation(_)
            | AppError::BadRequest(_)
            | AppError::NotFound(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            AppError::Validation(fields) => ApiError::new("Invalid payload").with_fields(fields),
            AppError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                ApiError::new("Internal server error")
            }
            other => ApiError::new(other.to_string()),
        };

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        AppError::Internal(format!("Error hashing password: {err}"))
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(msg) => AppError::NotFound(msg),
            CoreError::Conflict(msg) => AppError::BadRequest(msg),
            CoreError::ValidationError(msg) => AppError::BadRequest(msg),
            CoreError::DatabaseError(msg) => AppError::Internal(msg),
            CoreError::ConfigError(msg) => AppError::Internal(format!("Configuration error: {msg}")),
            CoreError::Other(err) => AppError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::InvalidPayload.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::NotFound("user not found".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Unauthorized("Token is missing".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AppError::access_denied().status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::TooManyRequests("slow down".into()).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_core_error_mapping() {
        let conflict: AppError =
            CoreError::Conflict("User with email a@b.c already exists".into()).into();
        assert!(matches!(conflict, AppError::BadRequest(_)));

        let db: AppError = CoreError::DatabaseError("connection reset".into()).into();
        assert!(matches!(db, AppError::Internal(_)));
    }

    #[test]
    fn test_validation_body_shape() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "email".to_string(),
            "Validation failed on the 'email' tag".to_string(),
        );
        let body = ApiError::new("Invalid payload").with_fields(fields);

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "Invalid payload");
        assert_eq!(
            json["invalid_fields"]["email"],
            "Validation failed on the 'email' tag"
        );
    }

    #[test]
    fn test_plain_body_has_no_field_map() {
        let json = serde_json::to_value(ApiError::new("Access denied")).unwrap();
        assert!(json.get("invalid_fields").is_none());
    }
}
