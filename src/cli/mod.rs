#![forbid(unsafe_code)]

use std::process::ExitCode;
use std::time::Duration;

use clap::{CommandFactory as _, Parser, Subcommand};

use crate::config;
use crate::error::FluxError;
use crate::output::table::Table;
use crate::task::launcher;
use crate::task::runlog::{RunLog, format_epoch};
use crate::task::scheduler::{self, SchedulerExit, SchedulerOptions};
use crate::task::store::TaskStore;

#[derive(Debug, Parser)]
#[command(name = "flux", version, about = "Personal task scheduler")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Add a new task
    Add(AddArgs),
    /// List all tasks
    List(ListArgs),
    /// Delete a task by ID
    Delete(IdArg),
    /// Pause a task; it stays in the store but will not run
    Pause(IdArg),
    /// Resume a paused task
    Resume(IdArg),
    /// Start the scheduler
    Start(StartArgs),
    /// Stop the scheduler at its next poll
    Stop,
    /// Show whether the scheduler is running
    Status(StatusArgs),
    /// Show run history, optionally filtered by task ID
    History(HistoryArgs),
    /// Rotate the run log into the archive directory
    Archive,
    /// Generate shell completions
    Completion(CompletionArgs),
}

#[derive(Debug, Parser)]
pub struct AddArgs {
    /// Shell command line to run (quote it)
    pub command: String,
    /// Minimum number of seconds between runs
    pub interval: u64,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Output in JSON format
    #[arg(long = "json")]
    pub json: bool,
    /// Output in CSV format
    #[arg(long = "csv")]
    pub csv: bool,
}

#[derive(Debug, Parser)]
pub struct IdArg {
    /// Task ID
    pub id: u64,
}

#[derive(Debug, Parser)]
pub struct StartArgs {
    /// Run the scheduler in this process instead of detaching
    #[arg(long = "foreground")]
    pub foreground: bool,
}

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output in JSON format
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct HistoryArgs {
    /// Only show runs of this task
    pub id: Option<u64>,
}

#[derive(Debug, Parser)]
pub struct CompletionArgs {
    pub shell: clap_complete::Shell,
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if let Commands::Completion(args) = &cli.cmd {
        let mut cmd = Cli::command();
        clap_complete::generate(args.shell, &mut cmd, "flux", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let cfg = config::load()?;
    let data_dir = cfg.data_dir()?;
    let mut store = TaskStore::new(data_dir.join(config::TASKS_FILE), cfg.storage.max_tasks);
    let runlog = RunLog::new(
        data_dir.join(config::LOG_FILE),
        data_dir.join(config::ARCHIVE_DIR),
    );

    match cli.cmd {
        Commands::Add(args) => cmd_add(&cfg, &mut store, &args),
        Commands::List(args) => cmd_list(&mut store, &args),
        Commands::Delete(args) => cmd_delete(&mut store, args.id),
        Commands::Pause(args) => cmd_pause(&mut store, args.id),
        Commands::Resume(args) => cmd_resume(&mut store, args.id),
        Commands::Start(args) => cmd_start(&cfg, &mut store, &runlog, &args).await,
        Commands::Stop => cmd_stop(&cfg),
        Commands::Status(args) => cmd_status(&cfg, &args),
        Commands::History(args) => cmd_history(&runlog, &args),
        Commands::Archive => cmd_archive(&runlog),
        Commands::Completion(_) => unreachable!("handled above"),
    }
}

fn cmd_add(
    cfg: &config::Config,
    store: &mut TaskStore,
    args: &AddArgs,
) -> anyhow::Result<ExitCode> {
    if args.interval == 0 {
        return Err(FluxError::InvalidInterval.into());
    }

    let Some(executable) = args.command.split_whitespace().next() else {
        return Err(FluxError::CommandNotFound(args.command.clone()).into());
    };
    if !command_resolvable(&cfg.scheduler.shell, executable) {
        return Err(FluxError::CommandNotFound(executable.to_owned()).into());
    }

    let _lock = store.lock()?;
    store.load();
    let id = store.add(&args.command, args.interval)?;
    store.save()?;

    println!("Task {id} added: '{}' runs every {} second(s).", args.command, args.interval);
    println!("Run 'flux start' to begin scheduling.");
    Ok(ExitCode::SUCCESS)
}

fn cmd_list(store: &mut TaskStore, args: &ListArgs) -> anyhow::Result<ExitCode> {
    store.load();

    if args.json {
        let mut s = serde_json::to_string_pretty(store.tasks())?;
        s.push('\n');
        print!("{s}");
        return Ok(ExitCode::SUCCESS);
    }

    if args.csv {
        let mut t = Table::new(["id", "command", "interval_seconds", "last_run", "active"]);
        for task in store.tasks() {
            t.row([
                task.id.to_string(),
                task.command.clone(),
                task.interval_seconds.to_string(),
                task.last_run.unwrap_or(0).to_string(),
                u8::from(task.active).to_string(),
            ]);
        }
        t.write_csv()?;
        return Ok(ExitCode::SUCCESS);
    }

    if store.is_empty() {
        println!("No tasks found. Run 'flux add \"<command>\" <interval>' to add one.");
        return Ok(ExitCode::SUCCESS);
    }

    let mut t = Table::new(["ID", "COMMAND", "INTERVAL", "LAST RUN", "STATUS"]);
    for task in store.tasks() {
        t.row([
            task.id.to_string(),
            task.command.clone(),
            format!("{}s", task.interval_seconds),
            match task.last_run {
                Some(ts) => format_epoch(ts),
                None => "never".to_owned(),
            },
            task.status_str().to_owned(),
        ]);
    }
    t.print()?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_delete(store: &mut TaskStore, id: u64) -> anyhow::Result<ExitCode> {
    let _lock = store.lock()?;
    store.load();
    store.delete(id)?;
    store.save()?;
    println!("Task {id} deleted.");
    Ok(ExitCode::SUCCESS)
}

fn cmd_pause(store: &mut TaskStore, id: u64) -> anyhow::Result<ExitCode> {
    let _lock = store.lock()?;
    store.load();
    store.pause(id)?;
    store.save()?;
    println!("Task {id} paused. It will be skipped until resumed.");
    Ok(ExitCode::SUCCESS)
}

fn cmd_resume(store: &mut TaskStore, id: u64) -> anyhow::Result<ExitCode> {
    let _lock = store.lock()?;
    store.load();
    store.resume(id)?;
    store.save()?;
    println!("Task {id} resumed.");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_start(
    cfg: &config::Config,
    store: &mut TaskStore,
    runlog: &RunLog,
    args: &StartArgs,
) -> anyhow::Result<ExitCode> {
    let data_dir = cfg.data_dir()?;

    if args.foreground {
        let opts = SchedulerOptions {
            data_dir,
            poll_interval: Duration::from_secs(cfg.scheduler.poll_interval_secs),
            shell: cfg.scheduler.shell.clone(),
        };
        return match scheduler::run(&opts, store, runlog).await? {
            SchedulerExit::NoTasks => {
                eprintln!("No tasks to schedule. Add one first.");
                Ok(ExitCode::from(1))
            }
            SchedulerExit::Stopped => {
                println!("Scheduler stopped.");
                Ok(ExitCode::SUCCESS)
            }
        };
    }

    if launcher::is_running(&data_dir) {
        anyhow::bail!(
            "scheduler already running ({} exists)",
            scheduler::sentinel_path(&data_dir).display()
        );
    }

    store.load();
    if store.is_empty() {
        anyhow::bail!("no tasks to schedule; add one first");
    }

    let pid = launcher::spawn_background()?;
    println!("Scheduler started in the background (PID {pid}).");
    Ok(ExitCode::SUCCESS)
}

fn cmd_stop(cfg: &config::Config) -> anyhow::Result<ExitCode> {
    let data_dir = cfg.data_dir()?;
    if launcher::request_stop(&data_dir) {
        println!("Stopping scheduler; it will exit on its next poll.");
    } else {
        println!("Scheduler is not running.");
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_status(cfg: &config::Config, args: &StatusArgs) -> anyhow::Result<ExitCode> {
    let running = launcher::is_running(&cfg.data_dir()?);

    if args.json {
        #[derive(serde::Serialize)]
        struct StatusOut {
            running: bool,
        }
        let mut s = serde_json::to_string_pretty(&StatusOut { running })?;
        s.push('\n');
        print!("{s}");
        return Ok(ExitCode::SUCCESS);
    }

    if running {
        println!("Scheduler is running.");
    } else {
        println!("Scheduler is not running.");
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_history(runlog: &RunLog, args: &HistoryArgs) -> anyhow::Result<ExitCode> {
    let lines = match args.id {
        Some(0) => anyhow::bail!("task IDs start at 1"),
        Some(id) => runlog.read_filtered(id)?,
        None => runlog.read_all()?,
    };

    if lines.is_empty() {
        println!("No task runs recorded yet.");
        return Ok(ExitCode::SUCCESS);
    }

    for line in lines {
        println!("{line}");
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_archive(runlog: &RunLog) -> anyhow::Result<ExitCode> {
    let archived = runlog.archive()?;
    println!("Run log archived to {}.", archived.display());
    Ok(ExitCode::SUCCESS)
}

/// `command -v` through the configured shell; mirrors what the scheduler
/// will eventually invoke, so a task that cannot resolve is rejected before
/// it ever reaches the store.
fn command_resolvable(shell: &str, executable: &str) -> bool {
    std::process::Command::new(shell)
        .args(["-c", &format!("command -v {executable}")])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}
