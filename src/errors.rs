use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;

/// Field name -> human readable message, as returned to the form.
pub type FieldErrors = BTreeMap<String, String>;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Submitted lead failed validation. Carries every failing field.
    Validation(FieldErrors),
    /// Per-source submission cap reached for the current window.
    RateLimited,
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// The lead could not be persisted; the caller may retry.
    PersistenceFailed(String),
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Internal server error.
    InternalError(String),
    /// Unauthorized access error.
    Unauthorized(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(errors) => {
                let fields: Vec<&str> = errors.keys().map(String::as_str).collect();
                write!(f, "Validation failed: {}", fields.join(", "))
            }
            AppError::RateLimited => write!(f, "Rate limit exceeded"),
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::PersistenceFailed(msg) => write!(f, "Persistence failed: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::DatabaseError(_)
            | AppError::PersistenceFailed(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::WithContext { source, .. } => source.status_code(),
        }
    }
}

impl IntoResponse for AppError {
    /// Maps each variant to a status code and JSON body, logging by severity.
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            AppError::Validation(errors) => {
                tracing::debug!("Validation failed for fields: {:?}", errors.keys());
                json!({ "error": "Validation failed", "errors": errors })
            }
            AppError::RateLimited => {
                json!({ "error": "Too many requests. Please try again later." })
            }
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                json!({ "error": "Database error" })
            }
            AppError::PersistenceFailed(msg) => {
                tracing::error!("Failed to persist lead: {}", msg);
                json!({ "error": "Failed to save lead. Please try again." })
            }
            AppError::NotFound(msg) => json!({ "error": msg }),
            AppError::BadRequest(msg) => json!({ "error": msg }),
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                json!({ "error": "Internal server error" })
            }
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized access: {}", msg);
                json!({ "error": "Unauthorized" })
            }
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                return source.into_response();
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }
}

impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }
}
