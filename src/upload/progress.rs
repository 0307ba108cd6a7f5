use serde::Serialize;

/// Bytes of the in-flight file handed to the transport so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadTick {
    pub sent: u64,
    pub total: u64,
}

impl UploadTick {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.sent.min(self.total) * 100 / self.total) as u8
    }

    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.sent.min(self.total) as f64 / self.total as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    #[default]
    Idle,
    Uploading,
    Completed,
    Error,
}

/// Aggregate view of a batch, recomputed after every file change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    pub overall_percent: u8,
    pub current_file: Option<String>,
    pub total_files: usize,
    pub completed_files: usize,
    pub status: ProgressStatus,
    pub error: Option<String>,
}

impl UploadProgress {
    pub fn starting(total_files: usize) -> Self {
        Self {
            total_files,
            status: ProgressStatus::Uploading,
            ..Default::default()
        }
    }

    /// Update counts with one file at most in flight at `in_flight` (0.0..=1.0)
    pub fn recompute(&mut self, completed_files: usize, in_flight: f64) {
        self.completed_files = completed_files;
        self.overall_percent = overall_percent(completed_files, in_flight, self.total_files);
    }

    pub fn complete(&mut self) {
        self.completed_files = self.total_files;
        self.overall_percent = 100;
        self.current_file = None;
        self.status = ProgressStatus::Completed;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ProgressStatus::Error;
        self.error = Some(error.into());
    }
}

/// `(completed + in_flight) / total`, as a rounded percentage
pub fn overall_percent(completed_files: usize, in_flight: f64, total_files: usize) -> u8 {
    if total_files == 0 {
        return 0;
    }
    let done = completed_files as f64 + in_flight.clamp(0.0, 1.0);
    let percent = (done / total_files as f64 * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_percent() {
        assert_eq!(overall_percent(0, 0.0, 3), 0);
        assert_eq!(overall_percent(1, 0.0, 3), 33);
        assert_eq!(overall_percent(1, 0.5, 3), 50);
        assert_eq!(overall_percent(2, 1.0, 3), 100);
        assert_eq!(overall_percent(0, 0.0, 0), 0);
    }

    #[test]
    fn test_tick_percent() {
        let tick = UploadTick { sent: 64, total: 256 };
        assert_eq!(tick.percent(), 25);
        assert_eq!(tick.fraction(), 0.25);
        assert_eq!(UploadTick { sent: 0, total: 0 }.percent(), 100);
        assert_eq!(UploadTick { sent: 10, total: 5 }.percent(), 100);
    }

    #[test]
    fn test_complete_forces_full_progress() {
        let mut progress = UploadProgress::starting(3);
        progress.current_file = Some("c.csv".into());
        progress.recompute(2, 0.9);
        assert_eq!(progress.overall_percent, 97);

        progress.complete();
        assert_eq!(progress.overall_percent, 100);
        assert_eq!(progress.completed_files, 3);
        assert_eq!(progress.status, ProgressStatus::Completed);
        assert!(progress.current_file.is_none());
    }
}
