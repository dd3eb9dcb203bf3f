use serde_json::Value;
use thiserror::Error;

use crate::error::ValidationErrors;

/// A failed identity provider call.
///
/// `status` is set when the provider answered; transport failures leave it empty.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub status: Option<u16>,
    pub body: Option<Value>,
    pub message: String,
}

impl RemoteError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            body: None,
            message: message.into(),
        }
    }

    /// Build from a non-success response; the body is kept as JSON when it parses
    pub fn from_status(status: u16, body: &str) -> Self {
        Self {
            status: Some(status),
            body: serde_json::from_str(body).ok(),
            message: format!("status {}: {}", status, body),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    /// Whether the caller can fix this by changing the request
    pub fn is_client_error(&self) -> bool {
        match self.status {
            Some(401) | Some(403) | Some(408) | Some(429) => false,
            Some(status) => (400..500).contains(&status),
            None => false,
        }
    }

    /// Field-scoped view of a provider rejection
    pub fn field_errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        if let Some(body) = &self.body {
            let message = body.get("message").and_then(Value::as_str).unwrap_or_default();

            if let Some(issues) = body.pointer("/data/issues").and_then(Value::as_array) {
                for issue in issues {
                    let key = issue
                        .get("path")
                        .and_then(Value::as_array)
                        .map(|path| issue_key(path))
                        .unwrap_or_else(|| "remote".to_string());
                    let detail = issue
                        .get("message")
                        .or_else(|| issue.get("code"))
                        .and_then(Value::as_str)
                        .unwrap_or("invalid");
                    errors.push(key, detail, "");
                }
            }

            if errors.is_empty() {
                if let Some(code) = body.get("code").and_then(Value::as_str) {
                    let reason = code.rsplit('.').next().unwrap_or(code);
                    errors.push(field_from_code(reason), reason, message);
                }
            }
        }

        if errors.is_empty() {
            errors.push("remote", self.message.clone(), "");
        }
        errors
    }
}

fn issue_key(path: &[Value]) -> String {
    let parts: Vec<String> = path
        .iter()
        .map(|p| match p {
            Value::String(s) => normalize_field(s).to_string(),
            other => other.to_string(),
        })
        .collect();
    if parts.is_empty() {
        "remote".to_string()
    } else {
        parts.join(".")
    }
}

fn normalize_field(name: &str) -> &str {
    match name {
        "primaryEmail" => "email",
        "primaryPhone" => "phone",
        "customData" => "custom_data",
        other => other,
    }
}

fn field_from_code(reason: &str) -> &'static str {
    for field in ["username", "email", "phone", "password", "name"] {
        if reason.starts_with(field) {
            return field;
        }
    }
    "remote"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_and_body() {
        let err = RemoteError::from_status(400, r#"{"code":"guard.invalid_input","message":"bad"}"#);
        assert_eq!(err.status, Some(400));
        assert!(err.body.is_some());
        assert!(err.to_string().starts_with("status 400: "));
        assert!(err.is_client_error());
    }

    #[test]
    fn auth_and_throttling_are_not_caller_errors() {
        for status in [401, 403, 408, 429, 500, 503] {
            assert!(!RemoteError::from_status(status, "").is_client_error(), "{status}");
        }
        assert!(!RemoteError::transport("connection reset").is_client_error());
    }

    #[test]
    fn issues_map_to_field_keys() {
        let body = r#"{"code":"guard.invalid_input","message":"Request body is invalid.","data":{"issues":[{"path":["primaryEmail"],"message":"Invalid email"}]}}"#;
        let errors = RemoteError::from_status(400, body).field_errors();
        assert_eq!(errors.errors.len(), 1);
        assert_eq!(errors.errors[0].key, "email");
        assert_eq!(errors.errors[0].message, "Invalid email");
    }

    #[test]
    fn code_maps_to_field_key() {
        let body = r#"{"code":"user.username_already_in_use","message":"This username is already in use."}"#;
        let errors = RemoteError::from_status(422, body).field_errors();
        assert_eq!(errors.errors[0].key, "username");
        assert_eq!(errors.errors[0].message, "username_already_in_use");
    }

    #[test]
    fn unparseable_body_falls_back_to_remote_key() {
        let errors = RemoteError::from_status(400, "plain text").field_errors();
        assert_eq!(errors.errors[0].key, "remote");
    }
}
