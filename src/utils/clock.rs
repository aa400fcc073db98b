//! Clock abstraction for deterministic time-dependent tests.

use std::time::Duration;

/// A fake clock counting whole seconds from an arbitrary epoch, advanced
/// manually instead of reading the OS clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct MockClock {
    current: u64,
}

impl MockClock {
    #[must_use]
    pub fn new(start_secs: u64) -> Self {
        Self { current: start_secs }
    }

    #[must_use]
    pub fn now(&self) -> u64 {
        self.current
    }

    pub fn advance_secs(&mut self, secs: u64) {
        self.current += secs;
    }

    #[must_use]
    pub fn has_elapsed(&self, since: u64, duration: Duration) -> bool {
        self.current.saturating_sub(since) >= duration.as_secs()
    }
}

/// Formatting helpers for epoch timestamps, using the same `chrono` stack
/// as [`crate::runtimes::checkpointer`].
pub mod time_utils {
    use chrono::{DateTime, Utc};

    #[must_use]
    pub fn format_timestamp(epoch_secs: i64) -> String {
        DateTime::<Utc>::from_timestamp(epoch_secs, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default()
    }
}
