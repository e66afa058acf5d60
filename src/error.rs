/// Unified error types for the StudyAI account guard
use crate::tokens::TokenError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the guard
#[derive(Error, Debug)]
pub enum GuardError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Malformed request or configuration value
    #[error("{0}")]
    Validation(String),

    /// Field-level validation failures, first entry is the headline
    #[error("{}", headline(.0))]
    InvalidInput(Vec<String>),

    /// Bad credentials or inactive account
    #[error("{0}")]
    Authentication(String),

    /// Too many failed logins
    #[error("Account is locked until {until}")]
    AccountLocked { until: DateTime<Utc> },

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded {
        message: String,
        retry_after: std::time::Duration,
    },

    /// Conflict errors (e.g., duplicate account)
    #[error("{0}")]
    Conflict(String),

    /// Token verification or signing errors
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn headline(errors: &[String]) -> &str {
    errors.first().map(String::as_str).unwrap_or("Invalid input")
}

impl GuardError {
    /// True for failures the caller did not cause
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            GuardError::Database(_)
                | GuardError::Internal(_)
                | GuardError::Io(_)
                | GuardError::Token(TokenError::Signing(_))
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GuardError::Validation(_) | GuardError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GuardError::Authentication(_) => StatusCode::UNAUTHORIZED,
            GuardError::AccountLocked { .. } => StatusCode::LOCKED,
            GuardError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GuardError::Conflict(_) => StatusCode::CONFLICT,
            GuardError::Token(TokenError::Signing(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            GuardError::Token(_) => StatusCode::UNAUTHORIZED,
            GuardError::NotFound(_) => StatusCode::NOT_FOUND,
            GuardError::Database(_) | GuardError::Internal(_) | GuardError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<sqlx::migrate::MigrateError> for GuardError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        GuardError::Internal(format!("Migration failed: {}", e))
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Convert GuardError to HTTP response
impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut retry_after = None;
        let mut errors = Vec::new();

        let (error_code, detail) = match &self {
            GuardError::Validation(message) => ("InvalidRequest", message.clone()),
            GuardError::InvalidInput(list) => {
                errors = list.clone();
                ("InvalidRequest", self.to_string())
            }
            GuardError::Authentication(message) => ("AuthenticationRequired", message.clone()),
            GuardError::AccountLocked { .. } => (
                "AccountLocked",
                "Account is temporarily locked due to multiple failed attempts. Please try again later."
                    .to_string(),
            ),
            GuardError::RateLimitExceeded {
                message,
                retry_after: wait,
            } => {
                retry_after = Some(wait.as_secs().max(1));
                ("RateLimitExceeded", message.clone())
            }
            GuardError::Conflict(message) => ("Conflict", message.clone()),
            GuardError::Token(TokenError::Expired) => ("TokenExpired", self.to_string()),
            GuardError::Token(TokenError::WrongType) => ("InvalidTokenType", self.to_string()),
            GuardError::Token(TokenError::InvalidSignature) | GuardError::Token(TokenError::Malformed) => {
                ("InvalidToken", self.to_string())
            }
            GuardError::NotFound(_) => ("NotFound", self.to_string()),
            GuardError::Token(TokenError::Signing(_))
            | GuardError::Database(_)
            | GuardError::Internal(_)
            | GuardError::Io(_) => (
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            detail,
            errors,
        });

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type alias for guard operations
pub type GuardResult<T> = Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GuardError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GuardError::AccountLocked { until: Utc::now() }.status(),
            StatusCode::LOCKED
        );
        assert_eq!(
            GuardError::Token(TokenError::WrongType).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GuardError::Token(TokenError::Signing("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let response = GuardError::Internal("sqlite file vanished".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let response = GuardError::RateLimitExceeded {
            message: "Too many".into(),
            retry_after: std::time::Duration::from_secs(42),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn test_invalid_input_headline() {
        let err = GuardError::InvalidInput(vec!["Name is required".into(), "Email is required".into()]);
        assert_eq!(err.to_string(), "Name is required");
    }
}
