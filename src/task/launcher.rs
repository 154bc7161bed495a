#![forbid(unsafe_code)]

use std::path::Path;
use std::process::Stdio;

use anyhow::Context as _;

use crate::task::scheduler;

/// Spawns the scheduler loop as a detached child of the current executable
/// and returns its PID. The child re-reads configuration itself; stdio is
/// discarded so the invoking terminal is released immediately.
pub fn spawn_background() -> anyhow::Result<u32> {
    let exe = std::env::current_exe().context("failed to resolve current executable")?;
    let child = std::process::Command::new(exe)
        .args(["start", "--foreground"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to spawn scheduler process")?;
    Ok(child.id())
}

/// Scheduler liveness as observed through the sentinel file.
#[must_use]
pub fn is_running(data_dir: &Path) -> bool {
    scheduler::sentinel_path(data_dir).exists()
}

/// Requests a stop by removing the sentinel; the loop notices at its next
/// poll. Returns false when no sentinel existed (nothing was running).
pub fn request_stop(data_dir: &Path) -> bool {
    std::fs::remove_file(scheduler::sentinel_path(data_dir)).is_ok()
}
