use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("dataset creation response has no numeric dataset_id")]
    MissingDatasetId,
    #[error("not signed in")]
    NotSignedIn,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("cannot read file to upload: {0}")]
    LocalFile(String),
}

impl ApiError {
    /// The backend rejected the credentials (401/403)
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Status { status: 401 | 403, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Build from a non-success response body, preferring the backend's `detail`
    pub(crate) fn from_response(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|value| error_message(&value))
            .or_else(|| {
                let trimmed = body.trim();
                (!trimmed.is_empty() && trimmed.len() <= 200).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string());

        ApiError::Status {
            status: status.as_u16(),
            message,
        }
    }
}

fn error_message(value: &Value) -> Option<String> {
    match value.get("detail").or_else(|| value.get("message"))? {
        Value::String(message) => Some(message.clone()),
        // Validation errors come back as a list of {loc, msg, type}
        Value::Array(items) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            (!messages.is_empty()).then(|| messages.join("; "))
        }
        _ => None,
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            ApiError::Timeout
        } else if value.is_decode() {
            ApiError::Decode(value.to_string())
        } else if value.is_builder() {
            ApiError::InvalidRequest(value.to_string())
        } else {
            ApiError::Network(value.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::Decode(value.to_string())
    }
}
