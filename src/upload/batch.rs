use thiserror::Error;

use super::metadata::DatasetMetadata;
use super::selection::{FileSelection, UploadLimits};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchPhase {
    #[default]
    Idle,
    CreatingDataset,
    UploadingFiles,
    Completed,
    Failed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal batch transition {from:?} -> {to:?}")]
pub struct PhaseError {
    pub from: BatchPhase,
    pub to: BatchPhase,
}

impl BatchPhase {
    pub fn can_advance_to(self, next: BatchPhase) -> bool {
        use BatchPhase::*;
        matches!(
            (self, next),
            (Idle, CreatingDataset)
                | (CreatingDataset, UploadingFiles)
                | (CreatingDataset, Failed)
                | (UploadingFiles, Completed)
                | (UploadingFiles, Failed)
        )
    }

    pub fn advance(&mut self, next: BatchPhase) -> Result<(), PhaseError> {
        if !self.can_advance_to(next) {
            return Err(PhaseError {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    pub fn is_finished(self) -> bool {
        matches!(self, BatchPhase::Completed | BatchPhase::Failed)
    }
}

/// One submission of the upload form
#[derive(Debug, Clone)]
pub struct UploadBatch {
    pub metadata: DatasetMetadata,
    pub selection: FileSelection,
    pub dataset_id: Option<i64>,
    phase: BatchPhase,
}

impl UploadBatch {
    pub fn new(metadata: DatasetMetadata, limits: UploadLimits) -> Self {
        Self {
            metadata,
            selection: FileSelection::new(limits),
            dataset_id: None,
            phase: BatchPhase::Idle,
        }
    }

    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    pub(crate) fn advance(&mut self, next: BatchPhase) -> Result<(), PhaseError> {
        self.phase.advance(next)
    }

    /// Make a failed batch submittable again; the next run creates a new dataset
    pub fn retry(&mut self) -> bool {
        if self.phase != BatchPhase::Failed {
            return false;
        }
        self.selection.resubmit();
        self.dataset_id = None;
        self.phase = BatchPhase::Idle;
        true
    }

    /// Back to an empty form
    pub fn reset(&mut self) {
        self.metadata = DatasetMetadata::default();
        self.selection.clear();
        self.dataset_id = None;
        self.phase = BatchPhase::Idle;
    }
}

/// What the caller learns from one `upload_dataset` run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub success: bool,
    pub dataset_id: Option<i64>,
    pub error: Option<String>,
}

impl UploadOutcome {
    pub fn succeeded(dataset_id: i64) -> Self {
        Self {
            success: true,
            dataset_id: Some(dataset_id),
            error: None,
        }
    }

    pub fn failed(dataset_id: Option<i64>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            dataset_id,
            error: Some(error.into()),
        }
    }
}
