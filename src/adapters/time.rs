//! Clock adapters.
//!
//! [`WallClock`] is the production time source. [`ManualClock`] is a
//! hand-advanced clock for deterministic dwell and timeout tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::app::ports::Clock;

/// Current wall-clock time in epoch seconds. A pre-epoch system clock
/// reads as 0 rather than panicking.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now_epoch_secs(&self) -> u64 {
        epoch_secs()
    }
}

/// Test clock advanced explicitly. Shared-reference friendly so it can be
/// passed alongside a backend into the service.
#[derive(Debug, Default)]
pub struct ManualClock {
    secs: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            secs: AtomicU64::new(start),
        }
    }

    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_epoch_secs(), 100);
        clock.advance(25);
        assert_eq!(clock.now_epoch_secs(), 125);
        clock.set(1000);
        assert_eq!(clock.now_epoch_secs(), 1000);
    }
}
