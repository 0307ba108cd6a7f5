//! Logging setup and client-side counters

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over the configured default level. Calling this twice is
/// harmless; the second install is ignored.
pub fn init_tracing(telemetry: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(telemetry.log_level.as_str()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Counters for upload batches and session activity
#[derive(Debug, Default)]
pub struct Metrics {
    batches_started: AtomicU64,
    batches_completed: AtomicU64,
    batches_failed: AtomicU64,
    files_uploaded: AtomicU64,
    files_failed: AtomicU64,
    session_refreshes: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_started(&self) {
        self.batches_started.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "batches_started", "Metric incremented");
    }

    pub fn batch_completed(&self) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "batches_completed", "Metric incremented");
    }

    pub fn batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "batches_failed", "Metric incremented");
    }

    pub fn file_uploaded(&self) {
        self.files_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_refreshed(&self) {
        self.session_refreshes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "session_refreshes", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_started: self.batches_started.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            files_uploaded: self.files_uploaded.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            session_refreshes: self.session_refreshes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub batches_started: u64,
    pub batches_completed: u64,
    pub batches_failed: u64,
    pub files_uploaded: u64,
    pub files_failed: u64,
    pub session_refreshes: u64,
}
