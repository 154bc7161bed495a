#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::Context as _;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

pub const TASKS_FILE: &str = "tasks.txt";
pub const LOG_FILE: &str = "task_logs.txt";
pub const ARCHIVE_DIR: &str = "archive";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the task file, run log, sentinel and archives.
    pub data_dir: String,
    /// Capacity limit enforced at `add`.
    pub max_tasks: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.local/share/flux".to_owned(),
            max_tasks: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Polling granularity: a task is never detected as due sooner than
    /// this many seconds after it becomes eligible.
    pub poll_interval_secs: u64,
    pub shell: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 1,
            shell: "/bin/sh".to_owned(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.max_tasks == 0 {
            anyhow::bail!("storage.max_tasks must be at least 1");
        }
        if self.scheduler.poll_interval_secs == 0 {
            anyhow::bail!("scheduler.poll_interval_secs must be at least 1");
        }
        if self.scheduler.shell.trim().is_empty() {
            anyhow::bail!("scheduler.shell must not be empty");
        }
        Ok(())
    }

    pub fn data_dir(&self) -> anyhow::Result<PathBuf> {
        expand_path(&self.storage.data_dir)
    }
}

/// Loads `~/.config/flux/config.toml`. A missing file means defaults; a
/// malformed one is an error worth surfacing.
pub fn load() -> anyhow::Result<Config> {
    load_from_file(&config_file_path()?)
}

fn load_from_file(path: &PathBuf) -> anyhow::Result<Config> {
    let cfg = if path.exists() {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))?
    } else {
        Config::default()
    };
    cfg.validate()?;
    Ok(cfg)
}

fn config_file_path() -> anyhow::Result<PathBuf> {
    let unix = home_config_path_unix();
    if !cfg!(windows) {
        return Ok(unix);
    }

    // Windows: prefer the Unix-style path if present for portability.
    if unix.exists() {
        return Ok(unix);
    }

    let proj = ProjectDirs::from("com", "flux", "flux")
        .context("failed to determine platform config directory")?;
    Ok(proj.config_dir().join("config.toml"))
}

fn home_config_path_unix() -> PathBuf {
    let home = home_dir().unwrap_or_else(|| PathBuf::from("~"));
    home.join(".config").join("flux").join("config.toml")
}

fn home_dir() -> Option<PathBuf> {
    if let Some(v) = std::env::var_os("HOME") {
        return Some(PathBuf::from(v));
    }
    if let Some(v) = std::env::var_os("USERPROFILE") {
        return Some(PathBuf::from(v));
    }
    None
}

#[must_use]
pub fn expand_tilde(input: &str) -> String {
    if let Some(rest) = input.strip_prefix("~/")
        && let Some(home) = home_dir()
    {
        return home.join(rest).to_string_lossy().to_string();
    }
    input.to_owned()
}

pub fn expand_path(input: &str) -> anyhow::Result<PathBuf> {
    let expanded = expand_env_vars(&expand_tilde(input));
    let p = PathBuf::from(expanded);
    if p.is_absolute() {
        return Ok(p);
    }
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    Ok(cwd.join(p))
}

fn expand_env_vars(input: &str) -> String {
    // Expand $VAR and ${VAR}. Leave unknown vars untouched.
    let re = regex::Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?")
        .unwrap_or_else(|_| regex::Regex::new("$^").unwrap());
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_owned())
    })
    .into_owned()
}
