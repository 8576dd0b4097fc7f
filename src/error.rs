//! Error types for chatfed
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::federation::FederationError;

/// Application-wide error type
///
/// This enum represents all possible errors that can occur
/// in the application. It implements `IntoResponse` to
/// automatically convert errors to appropriate HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Federation transform or resolution error (400/404/502/500)
    #[error(transparent)]
    Federation(#[from] FederationError),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Status code, client-facing message and metric label for this error
    fn classify(&self) -> (StatusCode, String, &'static str) {
        match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string(), "not_found"),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "validation"),
            AppError::Federation(error) => match error {
                FederationError::MissingRequiredField(_) => (
                    StatusCode::BAD_REQUEST,
                    error.to_string(),
                    "missing_required_field",
                ),
                FederationError::TypeMismatch { .. } => {
                    (StatusCode::BAD_REQUEST, error.to_string(), "type_mismatch")
                }
                FederationError::IdentityNotFound(_) => {
                    (StatusCode::NOT_FOUND, error.to_string(), "identity_not_found")
                }
                FederationError::ResolutionFailure(_) => {
                    (StatusCode::BAD_GATEWAY, error.to_string(), "resolution_failure")
                }
                FederationError::KeyGeneration(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "key_generation",
                ),
            },
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                "database",
            ),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "config"),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "internal",
            ),
        }
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code
    /// and JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message, error_type) = self.classify();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        crate::metrics::ERRORS_TOTAL
            .with_label_values(&[error_type])
            .inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn federation_errors_map_to_client_and_gateway_statuses() {
        let cases = [
            (
                AppError::from(FederationError::MissingRequiredField("attributedTo")),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::from(FederationError::type_mismatch("Note", "Announce")),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::from(FederationError::IdentityNotFound("42".to_string())),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::from(FederationError::ResolutionFailure("timeout".to_string())),
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn key_generation_details_are_not_leaked() {
        let error = AppError::from(FederationError::KeyGeneration("rng exhausted".to_string()));
        let (status, message, _) = error.classify();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!message.contains("rng"));
    }
}
