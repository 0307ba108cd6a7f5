use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use mime::Mime;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::humanize::ByteSize;

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("{name} is {size}, larger than the {max} limit")]
    TooLarge {
        name: String,
        size: ByteSize,
        max: ByteSize,
    },

    #[error("{name} ({mime_type}) is not an accepted file type")]
    NotAccepted { name: String, mime_type: String },

    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where a selected file's bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    Memory(Bytes),
    /// Read lazily, only while the file is being uploaded
    Path(PathBuf),
}

/// A local file chosen for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub source: FileSource,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size_bytes: data.len() as u64,
            source: FileSource::Memory(data),
        }
    }

    /// MIME type guessed from the file name
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let mime_type = mime_for_name(&name);
        Self::new(name, mime_type, data)
    }

    /// Stat the file; its contents are not read until upload.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, SelectionError> {
        let path = path.as_ref();
        let unreadable = |source: io::Error| SelectionError::Unreadable {
            path: path.to_path_buf(),
            source,
        };
        let metadata = tokio::fs::metadata(path).await.map_err(unreadable)?;
        if !metadata.is_file() {
            return Err(unreadable(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        debug!(file = %name, size = metadata.len(), "Selected file");
        Ok(Self {
            mime_type: mime_for_name(&name),
            name,
            size_bytes: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    pub fn size(&self) -> ByteSize {
        ByteSize(self.size_bytes)
    }

    fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
    }
}

pub fn mime_for_name(name: &str) -> String {
    let ext = Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "csv" => mime::TEXT_CSV.to_string(),
        "txt" => mime::TEXT_PLAIN.to_string(),
        "json" => mime::APPLICATION_JSON.to_string(),
        "geojson" => "application/geo+json".to_string(),
        "pdf" => mime::APPLICATION_PDF.to_string(),
        "png" => mime::IMAGE_PNG.to_string(),
        "jpg" | "jpeg" => mime::IMAGE_JPEG.to_string(),
        "tif" | "tiff" => "image/tiff".to_string(),
        "xls" => "application/vnd.ms-excel".to_string(),
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".to_string(),
        "zip" => "application/zip".to_string(),
        "xml" => mime::TEXT_XML.to_string(),
        "parquet" => "application/vnd.apache.parquet".to_string(),
        _ => mime::APPLICATION_OCTET_STREAM.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Idle,
    Uploading,
    Success,
    Error,
}

impl FileStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, FileStatus::Success | FileStatus::Error)
    }
}

/// One file in a batch, tracked through validation and upload.
///
/// Status only moves forward: idle, uploading, then success or error.
#[derive(Debug, Clone)]
pub struct FileEntry {
    local_id: String,
    file: SelectedFile,
    status: FileStatus,
    progress_percent: u8,
    error: Option<String>,
}

impl FileEntry {
    pub fn new(file: SelectedFile) -> Self {
        Self {
            local_id: Uuid::new_v4().to_string(),
            file,
            status: FileStatus::Idle,
            progress_percent: 0,
            error: None,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn file(&self) -> &SelectedFile {
        &self.file
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn progress_percent(&self) -> u8 {
        self.progress_percent
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn begin(&mut self) -> bool {
        if self.status != FileStatus::Idle {
            return false;
        }
        self.status = FileStatus::Uploading;
        true
    }

    /// Ignored unless uploading; never moves backwards
    pub(crate) fn set_progress(&mut self, percent: u8) {
        if self.status == FileStatus::Uploading {
            self.progress_percent = self.progress_percent.max(percent.min(100));
        }
    }

    pub(crate) fn succeed(&mut self) {
        if self.status == FileStatus::Uploading {
            self.status = FileStatus::Success;
            self.progress_percent = 100;
        }
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        if !self.status.is_terminal() {
            self.status = FileStatus::Error;
            self.error = Some(message.into());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_file_size: ByteSize,
    pub max_files: usize,
    /// `.ext`, `type/*` or `type/subtype`; empty accepts everything
    pub accept: Vec<String>,
}

impl From<&UploadConfig> for UploadLimits {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_file_size: config.max_file_size,
            max_files: config.max_files,
            accept: config.accept.clone(),
        }
    }
}

impl UploadLimits {
    pub fn check(&self, file: &SelectedFile) -> Result<(), SelectionError> {
        if file.size_bytes > self.max_file_size.as_u64() {
            return Err(SelectionError::TooLarge {
                name: file.name.clone(),
                size: file.size(),
                max: self.max_file_size,
            });
        }
        if !self.accepts(file) {
            return Err(SelectionError::NotAccepted {
                name: file.name.clone(),
                mime_type: file.mime_type.clone(),
            });
        }
        Ok(())
    }

    pub fn accepts(&self, file: &SelectedFile) -> bool {
        if self.accept.is_empty() {
            return true;
        }
        let extension = file.extension();
        let mime = file.mime_type.parse::<Mime>().ok();

        self.accept.iter().any(|entry| {
            let entry = entry.trim().to_ascii_lowercase();
            if let Some(ext) = entry.strip_prefix('.') {
                return extension.as_deref() == Some(ext);
            }
            let Some(mime) = &mime else {
                return false;
            };
            match entry.split_once('/') {
                Some((top, "*")) => mime.type_().as_str() == top,
                Some(_) => mime.essence_str() == entry,
                None => false,
            }
        })
    }
}

/// Files chosen for one batch, including those that failed validation
#[derive(Debug, Clone)]
pub struct FileSelection {
    limits: UploadLimits,
    entries: Vec<FileEntry>,
}

impl FileSelection {
    pub fn new(limits: UploadLimits) -> Self {
        Self {
            limits,
            entries: Vec::new(),
        }
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    /// Append files; anything beyond `max_files` is dropped without notice.
    ///
    /// Returns how many files were taken.
    pub fn add(&mut self, files: impl IntoIterator<Item = SelectedFile>) -> usize {
        let room = self.limits.max_files.saturating_sub(self.entries.len());
        let mut taken = 0;

        for file in files.into_iter().take(room) {
            let mut entry = FileEntry::new(file);
            if let Err(e) = self.limits.check(entry.file()) {
                warn!(file = %entry.file().name, error = %e, "File rejected");
                entry.fail(e.to_string());
            }
            self.entries.push(entry);
            taken += 1;
        }
        taken
    }

    pub fn remove(&mut self, local_id: &str) -> Option<FileEntry> {
        let index = self.entries.iter().position(|e| e.local_id == local_id)?;
        Some(self.entries.remove(index))
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [FileEntry] {
        &mut self.entries
    }

    /// Entries that passed validation and have not been uploaded yet
    pub fn uploadable(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter().filter(|e| e.status == FileStatus::Idle)
    }

    pub fn uploadable_count(&self) -> usize {
        self.uploadable().count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Replace every entry with a fresh one for the same file, validated again
    pub fn resubmit(&mut self) {
        let files: Vec<SelectedFile> = self.entries.drain(..).map(|entry| entry.file).collect();
        self.add(files);
    }
}
