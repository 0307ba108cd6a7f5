use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use time::OffsetDateTime;

/// Wall-clock source for token expiry checks
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_epoch_secs(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }
}

/// Settable clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_epoch_secs: i64) -> Self {
        Self {
            now: AtomicI64::new(now_epoch_secs),
        }
    }

    pub fn set(&self, now_epoch_secs: i64) {
        self.now.store(now_epoch_secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_secs(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
