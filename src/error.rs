// Service error taxonomy
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

use crate::database::StoreError;
use crate::idp::RemoteError;

/// A single field-scoped validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub key: String,
    pub message: String,
    pub value: String,
}

/// Collected field errors for one request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, message: impl Into<String>, value: impl Into<String>) {
        self.errors.push(FieldError {
            key: key.into(),
            message: message.into(),
            value: value.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// First error recorded against `key`
    pub fn field(&self, key: &str) -> Option<&FieldError> {
        self.errors.iter().find(|e| e.key == key)
    }

    /// Ok when nothing was recorded
    pub fn into_result(self) -> Result<(), ServiceError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.key, e.message))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

/// Errors returned by the sync, hierarchy and cascade services
#[derive(Debug, Error)]
pub enum ServiceError {
    // 400
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    // 403
    #[error("access denied: {0}")]
    AccessDenied(String),

    // 404
    #[error("not found: {0}")]
    NotFound(String),

    // 409
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    // 502
    #[error("identity provider error: {0}")]
    Sync(RemoteError),

    // 502
    #[error("{operation} failed for all {count} entities", count = .failures.len())]
    BatchFailed {
        operation: String,
        failures: Vec<String>,
    },

    // 500
    #[error("local store error: {0}")]
    Store(StoreError),

    // 500
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Get HTTP-equivalent status code
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::AccessDenied(_) => 403,
            ServiceError::NotFound(_) => 404,
            ServiceError::InvalidTransition(_) => 409,
            ServiceError::Sync(_) => 502,
            ServiceError::BatchFailed { .. } => 502,
            ServiceError::Store(_) => 500,
            ServiceError::Internal(_) => 500,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::AccessDenied(_) => "ACCESS_DENIED",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::InvalidTransition(_) => "INVALID_TRANSITION",
            ServiceError::Sync(_) => "SYNC_ERROR",
            ServiceError::BatchFailed { .. } => "CASCADE_FAILED",
            ServiceError::Store(_) => "INTERNAL_SERVER_ERROR",
            ServiceError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Convert to a JSON body. Store and internal details are not exposed.
    pub fn to_json(&self) -> Value {
        match self {
            ServiceError::Validation(errors) => json!({
                "error": true,
                "message": "validation failed",
                "code": self.error_code(),
                "errors": errors.errors,
            }),
            ServiceError::BatchFailed { operation, failures } => json!({
                "error": true,
                "message": format!("{} failed", operation),
                "code": self.error_code(),
                "failures": failures,
            }),
            ServiceError::Store(_) | ServiceError::Internal(_) => json!({
                "error": true,
                "message": "internal error",
                "code": self.error_code(),
            }),
            _ => json!({
                "error": true,
                "message": self.to_string(),
                "code": self.error_code(),
            }),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ServiceError::Validation(_))
    }

    /// Single-field validation error
    pub fn invalid_field(key: &str, message: &str, value: &str) -> Self {
        let mut errors = ValidationErrors::new();
        errors.push(key, message, value);
        ServiceError::Validation(errors)
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        ServiceError::AccessDenied(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ServiceError::Internal(message.into())
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ServiceError::NotFound(msg),
            other => {
                tracing::error!(error = %other, "local store error");
                ServiceError::Store(other)
            }
        }
    }
}

/// Caller-fixable identity provider failures become validation errors
impl From<RemoteError> for ServiceError {
    fn from(err: RemoteError) -> Self {
        if err.is_client_error() {
            ServiceError::Validation(err.field_errors())
        } else {
            ServiceError::Sync(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(ServiceError::invalid_field("name", "cannot_be_empty", "").status_code(), 400);
        assert_eq!(ServiceError::access_denied("nope").status_code(), 403);
        assert_eq!(ServiceError::not_found("org").status_code(), 404);
        assert_eq!(ServiceError::InvalidTransition("x".into()).status_code(), 409);
        assert_eq!(
            ServiceError::BatchFailed { operation: "delete".into(), failures: vec!["a".into()] }.status_code(),
            502
        );
    }

    #[test]
    fn validation_json_lists_fields() {
        let err = ServiceError::invalid_field("custom_data.vat", "required", "");
        let body = err.to_json();
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["errors"][0]["key"], "custom_data.vat");
        assert_eq!(body["errors"][0]["message"], "required");
    }

    #[test]
    fn remote_client_errors_are_reclassified() {
        let body = r#"{"code":"user.email_already_in_use","message":"This email is associated with an existing account."}"#;
        let err: ServiceError = RemoteError::from_status(422, body).into();
        match err {
            ServiceError::Validation(errors) => {
                assert_eq!(errors.errors[0].key, "email");
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        let err: ServiceError = RemoteError::from_status(503, "upstream down").into();
        assert!(matches!(err, ServiceError::Sync(_)));
    }

    #[test]
    fn store_internals_are_hidden() {
        let err = ServiceError::from(StoreError::Unavailable("connection refused".into()));
        assert_eq!(err.to_json()["message"], "internal error");
    }
}
