//! Dataset upload: file selection, batch state and the orchestrator that
//! creates the dataset and attaches its files sequentially.

mod batch;
mod metadata;
mod orchestrator;
mod progress;
mod selection;

pub use batch::{BatchPhase, PhaseError, UploadBatch, UploadOutcome};
pub use metadata::{DatasetMetadata, MetadataError};
pub use orchestrator::UploadOrchestrator;
pub use progress::{ProgressStatus, UploadProgress, UploadTick, overall_percent};
pub use selection::{
    FileEntry, FileSelection, FileSource, FileStatus, SelectedFile, SelectionError, UploadLimits,
    mime_for_name,
};
