#![forbid(unsafe_code)]

use serde::Serialize;

/// Upper bound on the stored command line, in bytes.
pub const MAX_COMMAND_LEN: usize = 255;

/// One schedulable unit: a shell command with a minimum gap between runs.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Task {
    pub id: u64,
    pub command: String,
    pub interval_seconds: u64,
    /// Epoch seconds of the last execution; `None` means never run.
    pub last_run: Option<i64>,
    pub active: bool,
}

impl Task {
    /// Whether enough time has elapsed for the task to run again.
    ///
    /// Purely time-based; callers decide what to do with paused tasks.
    #[must_use]
    pub fn is_due(&self, now: i64) -> bool {
        match self.last_run {
            None => true,
            Some(last) => {
                let interval = i64::try_from(self.interval_seconds).unwrap_or(i64::MAX);
                now.saturating_sub(last) >= interval
            }
        }
    }

    #[must_use]
    pub fn status_str(&self) -> &'static str {
        if self.active { "enabled" } else { "paused" }
    }
}
