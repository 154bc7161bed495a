#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use time::OffsetDateTime;

use crate::task::runlog::RunLog;
use crate::task::store::TaskStore;

/// Zero-byte marker whose presence means "a scheduler loop is active".
/// Removing it is the stop signal, honored at the next poll boundary.
pub const SENTINEL_FILE: &str = "scheduler.running";

#[must_use]
pub fn sentinel_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SENTINEL_FILE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerExit {
    /// The store had no tasks, so the loop never started polling.
    NoTasks,
    /// Stop was requested and the loop wound down normally.
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub data_dir: PathBuf,
    pub poll_interval: Duration,
    pub shell: String,
}

/// The polling loop. Each iteration reloads the store from disk so that
/// edits made by other invocations take effect without a restart, runs
/// every due task sequentially, and patches only the executed tasks'
/// `last_run` fields back to the durable file.
///
/// Runs until the sentinel file disappears or ctrl-c arrives; either way
/// the stop lands at a poll boundary, after the current tick finishes.
pub async fn run(
    opts: &SchedulerOptions,
    store: &mut TaskStore,
    log: &RunLog,
) -> anyhow::Result<SchedulerExit> {
    store.load();
    if store.is_empty() {
        return Ok(SchedulerExit::NoTasks);
    }

    let sentinel = sentinel_path(&opts.data_dir);
    std::fs::write(&sentinel, b"")
        .with_context(|| format!("failed to create {}", sentinel.display()))?;
    let _guard = SentinelGuard {
        path: sentinel.clone(),
    };

    let mut ticker = tokio::time::interval(opts.poll_interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }

        if !sentinel.exists() {
            break;
        }

        store.load();
        let now = OffsetDateTime::now_utc().unix_timestamp();
        if let Err(e) = run_tick(store, log, &opts.shell, now).await {
            eprintln!("scheduler tick warning: {e}");
        }
    }

    Ok(SchedulerExit::Stopped)
}

/// One poll iteration: execute every active, due task in store order, log
/// each run, then apply the incremental on-disk update for each task that
/// ran. Returns the IDs that executed.
pub async fn run_tick(
    store: &mut TaskStore,
    log: &RunLog,
    shell: &str,
    now: i64,
) -> anyhow::Result<Vec<u64>> {
    let due: Vec<(u64, String)> = store
        .tasks()
        .iter()
        .filter(|t| t.active && t.is_due(now))
        .map(|t| (t.id, t.command.clone()))
        .collect();

    let mut ran = Vec::with_capacity(due.len());
    for (id, command) in due {
        // Fire and forget: the command's exit status does not affect
        // scheduling, and a failure to spawn must not stall the loop.
        let status = tokio::process::Command::new(shell)
            .args(["-c", &command])
            .status()
            .await;
        if let Err(e) = status {
            eprintln!("task {id} could not be started: {e}");
        }

        if let Err(e) = log.append(now, id, &command) {
            eprintln!("failed to record run of task {id}: {e}");
        }

        store.set_last_run(id, now);
        ran.push(id);
    }

    for id in &ran {
        store
            .update_last_run(*id, now)
            .with_context(|| format!("failed to persist last run of task {id}"))?;
    }

    Ok(ran)
}

struct SentinelGuard {
    path: PathBuf,
}

impl Drop for SentinelGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHELL: &str = "/bin/sh";

    fn fixtures(dir: &Path) -> (TaskStore, RunLog) {
        (
            TaskStore::new(dir.join("tasks.txt"), 10),
            RunLog::new(dir.join("task_logs.txt"), dir.join("archive")),
        )
    }

    #[tokio::test]
    async fn due_task_runs_and_last_run_is_persisted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, log) = fixtures(dir.path());

        let now = 1_700_000_000;
        let id = store.add("echo hi", 60).expect("add");
        store.set_last_run(id, now - 60);
        store.save().expect("save");

        let ran = run_tick(&mut store, &log, SHELL, now).await.expect("tick");
        assert_eq!(ran, vec![id]);
        assert_eq!(store.tasks()[0].last_run, Some(now));

        let mut reloaded = TaskStore::new(store.path().to_path_buf(), 10);
        reloaded.load();
        assert_eq!(reloaded.tasks()[0].last_run, Some(now));

        let lines = log.read_filtered(id).expect("read");
        assert_eq!(lines.len(), 1);
    }

    #[tokio::test]
    async fn task_short_of_its_interval_does_not_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, log) = fixtures(dir.path());

        let now = 1_700_000_000;
        let id = store.add("echo hi", 60).expect("add");
        store.set_last_run(id, now - 59);
        store.save().expect("save");

        let ran = run_tick(&mut store, &log, SHELL, now).await.expect("tick");
        assert!(ran.is_empty());
        assert_eq!(store.tasks()[0].last_run, Some(now - 59));
        assert!(log.read_all().expect("read").is_empty());
    }

    #[tokio::test]
    async fn never_run_task_executes_immediately() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, log) = fixtures(dir.path());

        let id = store.add("echo hi", 3600).expect("add");
        store.save().expect("save");

        let now = 1_700_000_000;
        let ran = run_tick(&mut store, &log, SHELL, now).await.expect("tick");
        assert_eq!(ran, vec![id]);
    }

    #[tokio::test]
    async fn paused_task_is_skipped_even_when_due() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, log) = fixtures(dir.path());

        let id = store.add("echo hi", 5).expect("add");
        store.pause(id).expect("pause");
        store.save().expect("save");

        let ran = run_tick(&mut store, &log, SHELL, 1_700_000_000)
            .await
            .expect("tick");
        assert!(ran.is_empty());
        assert_eq!(store.tasks()[0].last_run, None);
        assert!(log.read_all().expect("read").is_empty());
    }

    #[tokio::test]
    async fn tick_runs_due_tasks_in_store_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut store, log) = fixtures(dir.path());

        let a = store.add("echo a", 5).expect("add");
        let b = store.add("echo b", 5).expect("add");
        store.save().expect("save");

        let ran = run_tick(&mut store, &log, SHELL, 1_700_000_000)
            .await
            .expect("tick");
        assert_eq!(ran, vec![a, b]);
    }
}
