use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use super::batch::{BatchPhase, UploadBatch, UploadOutcome};
use super::progress::UploadProgress;
use super::selection::FileStatus;
use crate::api::{CreateDatasetRequest, DatasetBackend};
use crate::notify::{Notice, Notifier};
use crate::observability::Metrics;
use crate::session::SessionManager;

const TICK_CHANNEL_SIZE: usize = 32;

/// Creates a dataset, then uploads each selected file into it, one at a time.
///
/// Never returns an error: every failure is reported through the
/// [`UploadOutcome`], a [`Notice`], and the progress channel.
pub struct UploadOrchestrator {
    backend: Arc<dyn DatasetBackend>,
    session: Arc<SessionManager>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
    progress: watch::Sender<UploadProgress>,
}

impl UploadOrchestrator {
    pub fn new(
        backend: Arc<dyn DatasetBackend>,
        session: Arc<SessionManager>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (progress, _) = watch::channel(UploadProgress::default());
        Self {
            backend,
            session,
            notifier,
            metrics: Arc::new(Metrics::new()),
            progress,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadProgress> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> UploadProgress {
        self.progress.borrow().clone()
    }

    pub async fn upload_dataset(&self, batch: &mut UploadBatch) -> UploadOutcome {
        if batch.phase() != BatchPhase::Idle {
            return self.reject("Upload failed", "This upload was already submitted");
        }

        let file_indices: Vec<usize> = batch
            .selection
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.status() == FileStatus::Idle)
            .map(|(index, _)| index)
            .collect();
        if file_indices.is_empty() {
            return self.reject("No files selected", "Select at least one valid file to upload");
        }

        let metadata = match batch.metadata.validated() {
            Ok(metadata) => metadata,
            Err(e) => return self.reject("Invalid dataset details", e.to_string()),
        };

        let Some(session) = self.session.current() else {
            return self.reject("Upload failed", "You must be signed in to upload");
        };
        let Some(uploader_id) = session.uploader_id() else {
            return self.reject("Upload failed", "Your session has no user id; sign in again");
        };

        self.metrics.batch_started();
        let mut progress = UploadProgress::starting(file_indices.len());
        self.progress.send_replace(progress.clone());

        transition(batch, BatchPhase::CreatingDataset);
        info!(dataset = %metadata.name, files = file_indices.len(), uploader_id, "Creating dataset");

        let request = CreateDatasetRequest::new(&metadata, uploader_id);
        let dataset_id = match self.backend.create_dataset(&request).await {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "Dataset creation failed");
                return self.fail(batch, &mut progress, None, format!("Could not create dataset: {e}"));
            }
        };
        batch.dataset_id = Some(dataset_id);
        transition(batch, BatchPhase::UploadingFiles);
        info!(dataset_id, "Dataset created");

        for (completed, &index) in file_indices.iter().enumerate() {
            let entry = &mut batch.selection.entries_mut()[index];
            entry.begin();
            let file = entry.file().clone();

            progress.current_file = Some(file.name.clone());
            progress.recompute(completed, 0.0);
            self.progress.send_replace(progress.clone());
            info!(dataset_id, file = %file.name, size = file.size_bytes, "Uploading file");

            let (ticks_tx, mut ticks) = mpsc::channel(TICK_CHANNEL_SIZE);
            let upload = self.backend.upload_file(dataset_id, &file, ticks_tx);
            tokio::pin!(upload);

            let result = loop {
                tokio::select! {
                    result = &mut upload => break result,
                    Some(tick) = ticks.recv() => {
                        batch.selection.entries_mut()[index].set_progress(tick.percent());
                        progress.recompute(completed, tick.fraction());
                        self.progress.send_replace(progress.clone());
                    }
                }
            };

            let entry = &mut batch.selection.entries_mut()[index];
            match result {
                Ok(()) => {
                    entry.succeed();
                    self.metrics.file_uploaded();
                    progress.recompute(completed + 1, 0.0);
                    self.progress.send_replace(progress.clone());
                    info!(dataset_id, file = %file.name, "File uploaded");
                }
                Err(e) => {
                    entry.fail(e.to_string());
                    self.metrics.file_failed();
                    let remaining = file_indices.len() - completed - 1;
                    error!(dataset_id, file = %file.name, error = %e, remaining, "File upload failed, abandoning batch");
                    return self.fail(
                        batch,
                        &mut progress,
                        Some(dataset_id),
                        format!("Failed to upload {}: {e}", file.name),
                    );
                }
            }
        }

        transition(batch, BatchPhase::Completed);
        progress.complete();
        self.progress.send_replace(progress.clone());
        self.metrics.batch_completed();

        info!(dataset_id, files = file_indices.len(), "Dataset upload completed");
        self.notifier.notify(Notice::success(
            "Dataset uploaded",
            format!("{} uploaded with {} file(s)", metadata.name, file_indices.len()),
        ));
        UploadOutcome::succeeded(dataset_id)
    }

    /// Refused before any network call; batch and progress stay untouched
    fn reject(&self, title: &str, message: impl Into<String>) -> UploadOutcome {
        let message = message.into();
        warn!(reason = %message, "{title}");
        self.notifier.notify(Notice::error(title, message.clone()));
        UploadOutcome::failed(None, message)
    }

    fn fail(
        &self,
        batch: &mut UploadBatch,
        progress: &mut UploadProgress,
        dataset_id: Option<i64>,
        message: String,
    ) -> UploadOutcome {
        transition(batch, BatchPhase::Failed);
        progress.fail(message.clone());
        self.progress.send_replace(progress.clone());
        self.metrics.batch_failed();

        self.notifier.notify(Notice::error("Upload failed", message.clone()));
        UploadOutcome::failed(dataset_id, message)
    }
}

fn transition(batch: &mut UploadBatch, next: BatchPhase) {
    if let Err(e) = batch.advance(next) {
        warn!(error = %e, "Ignoring batch transition");
    }
}
