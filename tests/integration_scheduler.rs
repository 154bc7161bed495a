use std::path::Path;
use std::process::Command;

use flux::task::launcher;
use flux::task::runlog::RunLog;
use flux::task::scheduler;
use flux::task::store::TaskStore;

fn sh_available() -> bool {
    Command::new("/bin/sh").args(["-c", "true"]).status().is_ok()
}

fn fixtures(dir: &Path) -> (TaskStore, RunLog) {
    (
        TaskStore::new(dir.join("tasks.txt"), 100),
        RunLog::new(dir.join("task_logs.txt"), dir.join("archive")),
    )
}

#[test]
fn store_round_trips_through_real_files() {
    let td = tempfile::tempdir().expect("tempdir");
    let (mut store, _log) = fixtures(td.path());

    let a = store.add("echo hello", 5).expect("add");
    let b = store.add("date", 60).expect("add");
    store.pause(b).expect("pause");
    store.save().expect("save");

    let (mut reloaded, _log) = fixtures(td.path());
    reloaded.load();
    assert_eq!(reloaded.tasks(), store.tasks());

    reloaded.delete(a).expect("delete");
    reloaded.save().expect("save");

    let (mut third, _log) = fixtures(td.path());
    third.load();
    assert_eq!(third.len(), 1);
    assert_eq!(third.tasks()[0].id, b);
}

#[tokio::test]
async fn a_tick_really_executes_the_command() {
    if !sh_available() {
        eprintln!("skipping: /bin/sh not found");
        return;
    }

    let td = tempfile::tempdir().expect("tempdir");
    let (mut store, log) = fixtures(td.path());
    let out = td.path().join("out.txt");

    let id = store
        .add(&format!("echo ran >> {}", out.display()), 60)
        .expect("add");
    store.save().expect("save");

    let now = 1_700_000_000;
    let ran = scheduler::run_tick(&mut store, &log, "/bin/sh", now)
        .await
        .expect("tick");
    assert_eq!(ran, vec![id]);

    let written = std::fs::read_to_string(&out).expect("command output");
    assert_eq!(written, "ran\n");

    let history = log.read_filtered(id).expect("history");
    assert_eq!(history.len(), 1);
    assert!(history[0].contains(&format!("Ran task #{id}: echo ran")));

    // The durable record was patched, so a fresh process sees the run.
    let (mut reloaded, _log) = fixtures(td.path());
    reloaded.load();
    assert_eq!(reloaded.tasks()[0].last_run, Some(now));

    // A second tick inside the interval does nothing.
    let ran = scheduler::run_tick(&mut store, &log, "/bin/sh", now + 59)
        .await
        .expect("tick");
    assert!(ran.is_empty());
    assert_eq!(
        std::fs::read_to_string(&out).expect("command output"),
        "ran\n"
    );

    // At the interval boundary it runs again.
    let ran = scheduler::run_tick(&mut store, &log, "/bin/sh", now + 60)
        .await
        .expect("tick");
    assert_eq!(ran, vec![id]);
}

#[tokio::test]
async fn paused_tasks_are_not_executed() {
    if !sh_available() {
        eprintln!("skipping: /bin/sh not found");
        return;
    }

    let td = tempfile::tempdir().expect("tempdir");
    let (mut store, log) = fixtures(td.path());
    let out = td.path().join("out.txt");

    let id = store
        .add(&format!("echo ran >> {}", out.display()), 5)
        .expect("add");
    store.pause(id).expect("pause");
    store.save().expect("save");

    let ran = scheduler::run_tick(&mut store, &log, "/bin/sh", 1_700_000_000)
        .await
        .expect("tick");
    assert!(ran.is_empty());
    assert!(!out.exists());
    assert!(log.read_all().expect("read").is_empty());
}

#[test]
fn archive_rotation_lifecycle() {
    let td = tempfile::tempdir().expect("tempdir");
    let (_store, log) = fixtures(td.path());

    assert!(log.archive().is_err());

    log.append(0, 1, "echo hi").expect("append");
    log.append(1, 2, "date").expect("append");
    let archived = log.archive().expect("archive");

    let moved = std::fs::read_to_string(&archived).expect("read archive");
    assert_eq!(moved.lines().count(), 2);
    assert!(log.read_all().expect("read").is_empty());

    // Appends keep working against the recreated log.
    log.append(2, 1, "echo hi").expect("append");
    assert_eq!(log.read_all().expect("read").len(), 1);
}

#[test]
fn sentinel_drives_status_and_stop() {
    let td = tempfile::tempdir().expect("tempdir");

    assert!(!launcher::is_running(td.path()));
    assert!(!launcher::request_stop(td.path()));

    std::fs::write(scheduler::sentinel_path(td.path()), b"").expect("write sentinel");
    assert!(launcher::is_running(td.path()));
    assert!(launcher::request_stop(td.path()));
    assert!(!launcher::is_running(td.path()));
}

#[tokio::test]
async fn scheduler_run_exits_on_empty_store() {
    let td = tempfile::tempdir().expect("tempdir");
    let (mut store, log) = fixtures(td.path());

    let opts = scheduler::SchedulerOptions {
        data_dir: td.path().to_path_buf(),
        poll_interval: std::time::Duration::from_millis(50),
        shell: "/bin/sh".to_owned(),
    };

    let exit = scheduler::run(&opts, &mut store, &log).await.expect("run");
    assert_eq!(exit, scheduler::SchedulerExit::NoTasks);
    assert!(!launcher::is_running(td.path()));
}

#[tokio::test]
async fn scheduler_run_stops_when_the_sentinel_disappears() {
    if !sh_available() {
        eprintln!("skipping: /bin/sh not found");
        return;
    }

    let td = tempfile::tempdir().expect("tempdir");
    let (mut store, log) = fixtures(td.path());

    store.add("true", 3600).expect("add");
    store.save().expect("save");

    let sentinel = scheduler::sentinel_path(td.path());
    let opts = scheduler::SchedulerOptions {
        data_dir: td.path().to_path_buf(),
        poll_interval: std::time::Duration::from_millis(20),
        shell: "/bin/sh".to_owned(),
    };

    let stopper = tokio::spawn({
        let sentinel = sentinel.clone();
        async move {
            for _ in 0..100 {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                if sentinel.exists() {
                    let _ = std::fs::remove_file(&sentinel);
                    return;
                }
            }
        }
    });

    let exit = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        scheduler::run(&opts, &mut store, &log),
    )
    .await
    .expect("scheduler did not stop in time")
    .expect("run");

    assert_eq!(exit, scheduler::SchedulerExit::Stopped);
    assert!(!sentinel.exists());
    stopper.await.expect("stopper task");
}
