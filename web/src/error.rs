//! Error types for web handlers.
//!
//! [`AppError`] bridges store, gateway and forwarding errors to HTTP
//! responses. Every error body has the same shape:
//!
//! ```json
//! { "code": "VALIDATION_ERROR", "message": "...", "errors": { "year": "must be provided" } }
//! ```
//!
//! `errors` is present only for field-level validation failures.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use marquee_core::store::StoreError;
use marquee_core::validator::{FieldErrors, Validator};
use marquee_runtime::GatewayError;
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```
/// use axum::http::StatusCode;
/// use marquee_web::AppError;
///
/// let err = AppError::not_found("movie", 7);
/// assert_eq!(err.status(), StatusCode::NOT_FOUND);
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: &'static str,
    fields: Option<FieldErrors>,
    /// Internal error, logged but never sent to the client.
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            fields: None,
            source: None,
        }
    }

    /// Attach the underlying error for logging.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    /// 404 Not Found.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND",
        )
    }

    /// 409 Conflict.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message, "CONFLICT")
    }

    /// 422 with per-field messages.
    #[must_use]
    pub fn validation(fields: FieldErrors) -> Self {
        Self {
            fields: Some(fields),
            ..Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "the request failed validation",
                "VALIDATION_ERROR",
            )
        }
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
            "INTERNAL_SERVER_ERROR",
        )
    }

    /// 502 Bad Gateway.
    #[must_use]
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message, "BAD_GATEWAY")
    }

    /// 503 Service Unavailable.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message,
            "SERVICE_UNAVAILABLE",
        )
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Field errors, for validation failures.
    #[must_use]
    pub const fn fields(&self) -> Option<&FieldErrors> {
        self.fields.as_ref()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<FieldErrors>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
            errors: self.fields,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, key } => Self::not_found(kind, key),
            StoreError::EditConflict { .. } => Self::conflict(
                "unable to update the record due to an edit conflict, please try again",
            ),
            StoreError::DuplicateCorrelation { .. } => {
                Self::conflict("a record with this correlation id already exists")
            }
            StoreError::ReferenceNotFound { kind, .. } => {
                let mut v = Validator::new();
                v.add_error(&format!("{kind}_id"), "must reference an existing record");
                Self::validation(v.errors().clone())
            }
            err @ (StoreError::Constraint { .. } | StoreError::InvalidQuery(_)) => {
                Self::bad_request(err.to_string())
            }
            err @ StoreError::Unavailable(_) => {
                Self::unavailable("the store is temporarily unavailable").with_source(err)
            }
            err @ StoreError::Backend(_) => {
                Self::internal("the server encountered a problem").with_source(err)
            }
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            err @ GatewayError::ChannelUnavailable(_) => {
                Self::unavailable("the intent could not be queued, please retry").with_source(err)
            }
            err @ GatewayError::Serialization(_) => {
                Self::internal("the server encountered a problem").with_source(err)
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::record::EntityKind;

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("invalid id");
        assert_eq!(err.to_string(), "[BAD_REQUEST] invalid id");
    }

    #[test]
    fn test_not_found() {
        let err = AppError::from(StoreError::not_found(EntityKind::Movie, 3));
        assert_eq!(err.to_string(), "[NOT_FOUND] movie with id 3 not found");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_edit_conflict_is_409() {
        let err = AppError::from(StoreError::EditConflict {
            kind: EntityKind::Movie,
            id: 1,
            expected_version: 2,
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_missing_parent_is_a_field_error() {
        let err = AppError::from(StoreError::ReferenceNotFound {
            kind: EntityKind::Movie,
            id: 9,
        });
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            err.fields().and_then(|f| f.get("movie_id")),
            Some("must reference an existing record")
        );
    }

    #[test]
    fn test_unavailable_store_is_503() {
        let err = AppError::from(StoreError::Unavailable("pool timed out".into()));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "SERVICE_UNAVAILABLE");
    }
}
