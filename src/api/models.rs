//! Wire models for the dataset-sharing backend.
//!
//! Request bodies mirror what the backend validates; response models accept
//! missing optional fields so older backend versions still decode.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::TokenGrant;
use crate::upload::DatasetMetadata;

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// Third-party identity assertion, e.g. a Google ID token
#[derive(Debug, Clone, Serialize)]
pub struct OAuthRequest {
    pub provider: String,
    pub credential: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserSummary {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<UserSummary>,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl From<TokenResponse> for TokenGrant {
    fn from(value: TokenResponse) -> Self {
        TokenGrant {
            access_token: value.access_token,
            refresh_token: value.refresh_token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateDatasetRequest {
    pub dataset_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_description: Option<String>,
    pub uploader_id: i64,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geographic_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_time_period: Option<String>,
}

impl CreateDatasetRequest {
    pub fn new(metadata: &DatasetMetadata, uploader_id: i64) -> Self {
        Self {
            dataset_name: metadata.name.clone(),
            dataset_description: metadata.description.clone(),
            uploader_id,
            tags: metadata.tags.clone(),
            geographic_location: metadata.geographic_location.clone(),
            data_time_period: metadata.data_time_period.clone(),
        }
    }
}

/// `dataset_id` from a creation response; only a JSON integer counts
pub fn extract_dataset_id(body: &Value) -> Option<i64> {
    body.get("dataset_id").and_then(Value::as_i64)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatasetResponse {
    pub dataset_id: i64,
    pub dataset_name: String,
    #[serde(default)]
    pub dataset_description: Option<String>,
    #[serde(default)]
    pub downloads_count: i64,
    pub uploader_id: i64,
    pub date_of_creation: NaiveDateTime,
    #[serde(default)]
    pub dataset_last_updated: Option<NaiveDateTime>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub geographic_location: Option<String>,
    #[serde(default)]
    pub data_time_period: Option<String>,
    #[serde(default)]
    pub approval_status: Option<String>,
    #[serde(default)]
    pub file_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatasetFileResponse {
    pub file_id: i64,
    pub file_name: String,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub file_type: Option<String>,
    pub file_date_of_upload: NaiveDateTime,
    #[serde(default)]
    pub file_url: Option<String>,
    pub dataset_id: i64,
}
