use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Tracks user activity; a gap of at least `timeout` between two activities
/// counts as an idle period.
#[derive(Debug)]
pub struct IdleTracker {
    timeout: Duration,
    last_activity: Mutex<Instant>,
}

impl IdleTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_activity: Mutex::new(Instant::now()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record activity now. Returns `true` when this activity ends an idle period.
    pub fn record_activity(&self) -> bool {
        let now = Instant::now();
        match self.last_activity.lock() {
            Ok(mut last) => {
                let was_idle = now.duration_since(*last) >= self.timeout;
                *last = now;
                was_idle
            }
            Err(_) => false,
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    pub fn is_idle(&self) -> bool {
        self.idle_for() >= self.timeout
    }
}
