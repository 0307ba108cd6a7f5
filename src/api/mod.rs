mod client;
mod error;
pub mod models;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::upload::{SelectedFile, UploadTick};

pub use client::ApiClient;
pub use error::ApiError;
pub use models::{CreateDatasetRequest, DatasetFileResponse, DatasetResponse, TokenResponse};

pub type Result<T> = std::result::Result<T, ApiError>;

/// The two calls an upload needs; `ApiClient` in production, a stub in tests
#[async_trait]
pub trait DatasetBackend: Send + Sync {
    /// Create the dataset record and return its numeric id
    async fn create_dataset(&self, request: &CreateDatasetRequest) -> Result<i64>;

    /// Attach one file to the dataset, reporting bytes sent on `progress`
    async fn upload_file(
        &self,
        dataset_id: i64,
        file: &SelectedFile,
        progress: mpsc::Sender<UploadTick>,
    ) -> Result<()>;
}
