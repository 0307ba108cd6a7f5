//! HTTP client for the dataset-sharing backend

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use mime::Mime;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::error::ApiError;
use super::models::{
    CreateDatasetRequest, DatasetFileResponse, DatasetResponse, LoginRequest, OAuthRequest,
    SignupRequest, TokenResponse, extract_dataset_id,
};
use super::{DatasetBackend, Result};
use crate::config::Config;
use crate::session::{SessionManager, TokenGrant, TokenRefresher};
use crate::upload::{FileSource, SelectedFile, UploadTick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    /// Credential exchanges; a 401 here means bad credentials, not a stale session
    None,
    /// Send the token if there is one
    Optional,
    Required,
}

/// Every request the client issues goes through here, so this is where the
/// bearer token is attached and where 401/403 responses sign the session out.
pub struct ApiClient {
    http: Client,
    base_url: String,
    chunk_size: usize,
    session: Arc<SessionManager>,
}

impl ApiClient {
    pub fn new(config: &Config, session: Arc<SessionManager>) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.api.connect_timeout())
            .timeout(config.api.request_timeout())
            .user_agent(&config.api.user_agent)
            .build()?;

        Ok(Self {
            http,
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
            chunk_size: usize::try_from(config.upload.chunk_size.as_u64())
                .unwrap_or(usize::MAX)
                .max(1),
            session,
        })
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<TokenResponse> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let request = self.http.post(self.url("/users/login")).json(&body);
        self.fetch_json("/users/login", request, Auth::None).await
    }

    pub async fn signup(&self, body: &SignupRequest) -> Result<TokenResponse> {
        let request = self.http.post(self.url("/users/signup")).json(body);
        self.fetch_json("/users/signup", request, Auth::None).await
    }

    pub async fn oauth(&self, provider: &str, credential: &str) -> Result<TokenResponse> {
        let body = OAuthRequest {
            provider: provider.to_string(),
            credential: credential.to_string(),
        };
        let request = self.http.post(self.url("/auth/oauth")).json(&body);
        self.fetch_json("/auth/oauth", request, Auth::None).await
    }

    pub async fn get_dataset(&self, dataset_id: i64) -> Result<DatasetResponse> {
        let path = format!("/datasets/{dataset_id}");
        let request = self.http.get(self.url(&path));
        self.fetch_json(&path, request, Auth::Optional).await
    }

    pub async fn list_dataset_files(&self, dataset_id: i64) -> Result<Vec<DatasetFileResponse>> {
        let path = format!("/datasets/{dataset_id}/files");
        let request = self.http.get(self.url(&path));
        self.fetch_json(&path, request, Auth::Optional).await
    }

    pub async fn download_file(&self, file_id: i64) -> Result<Bytes> {
        let path = format!("/files/{file_id}/download");
        let request = self.http.get(self.url(&path));
        let response = self.send(&path, request, Auth::Required).await?;
        let bytes = response.bytes().await?;
        debug!(file_id, size = bytes.len(), "Downloaded file");
        Ok(bytes)
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        path: &str,
        request: RequestBuilder,
        auth: Auth,
    ) -> Result<T> {
        let response = self.send(path, request, auth).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn send(&self, path: &str, request: RequestBuilder, auth: Auth) -> Result<Response> {
        let request = match auth {
            Auth::None => request,
            Auth::Optional | Auth::Required => {
                self.session.record_activity(self).await;
                match self.session.bearer_token() {
                    Some(token) => request.bearer_auth(token),
                    None if auth == Auth::Required => return Err(ApiError::NotSignedIn),
                    None => request,
                }
            }
        };

        debug!(path, "Sending request");
        let response = request.send().await.map_err(|e| {
            warn!(path, error = %e, "Request failed");
            ApiError::from(e)
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(path, status = status.as_u16(), "Request succeeded");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = ApiError::from_response(status, &body);
        warn!(path, status = status.as_u16(), error = %err, "Backend returned error");
        if auth != Auth::None && err.is_auth_failure() {
            self.session.handle_unauthorized();
        }
        Err(err)
    }

    /// Multipart file part streamed in `chunk_size` pieces, one tick per piece
    async fn file_part(&self, file: &SelectedFile, progress: mpsc::Sender<UploadTick>) -> Result<Part> {
        let total = file.size_bytes;
        let body = match &file.source {
            FileSource::Memory(data) => {
                let data = data.clone();
                let chunks: Vec<Bytes> = (0..data.len())
                    .step_by(self.chunk_size)
                    .map(|start| data.slice(start..(start + self.chunk_size).min(data.len())))
                    .collect();
                let chunks = futures::stream::iter(chunks).map(Ok::<_, std::io::Error>);
                Body::wrap_stream(with_ticks(chunks, total, progress))
            }
            FileSource::Path(path) => {
                let handle = tokio::fs::File::open(path).await.map_err(|e| {
                    warn!(path = %path.display(), error = %e, "Cannot open file for upload");
                    ApiError::LocalFile(format!("{}: {e}", path.display()))
                })?;
                let chunks = ReaderStream::with_capacity(handle, self.chunk_size);
                Body::wrap_stream(with_ticks(chunks, total, progress))
            }
        };

        let mime = file
            .mime_type
            .parse::<Mime>()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM);
        let part = Part::stream_with_length(body, total)
            .file_name(file.name.clone())
            .mime_str(mime.as_ref())?;
        Ok(part)
    }
}

/// Report the running byte count after every chunk
fn with_ticks<S>(
    chunks: S,
    total: u64,
    progress: mpsc::Sender<UploadTick>,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static
where
    S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
{
    let mut sent = 0u64;
    chunks.map(move |chunk| {
        if let Ok(bytes) = &chunk {
            sent += bytes.len() as u64;
            // A full channel only costs one progress update.
            let _ = progress.try_send(UploadTick { sent, total });
        }
        chunk
    })
}

#[async_trait]
impl TokenRefresher for ApiClient {
    async fn refresh_access_token(&self, credential: &str) -> Result<TokenGrant> {
        let request = self
            .http
            .post(self.url("/api/auth/refresh"))
            .query(&[("refresh_token", credential)]);
        // Not through the activity funnel: the session is mid-refresh.
        let response: TokenResponse = self.fetch_json("/api/auth/refresh", request, Auth::None).await?;
        info!("Access token refreshed");
        Ok(response.into())
    }
}

#[async_trait]
impl DatasetBackend for ApiClient {
    async fn create_dataset(&self, request: &CreateDatasetRequest) -> Result<i64> {
        let builder = self.http.post(self.url("/datasets/")).json(request);
        let body: Value = self.fetch_json("/datasets/", builder, Auth::Required).await?;
        extract_dataset_id(&body).ok_or(ApiError::MissingDatasetId)
    }

    async fn upload_file(
        &self,
        dataset_id: i64,
        file: &SelectedFile,
        progress: mpsc::Sender<UploadTick>,
    ) -> Result<()> {
        let form = Form::new()
            .text("dataset_id", dataset_id.to_string())
            .part("file", self.file_part(file, progress).await?);
        let request = self.http.post(self.url("/upload-file/")).multipart(form);
        self.send("/upload-file/", request, Auth::Required).await?;
        Ok(())
    }
}
