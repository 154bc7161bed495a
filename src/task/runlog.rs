#![forbid(unsafe_code)]

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::error::FluxError;

/// Literal that precedes the task ID on every run-log line. Filtered
/// playback keys off this marker, never off a bare number.
pub const RUN_MARKER: &str = "Ran task #";

/// Append-only history of task executions, with archival rotation.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
    archive_dir: PathBuf,
}

impl RunLog {
    #[must_use]
    pub fn new(path: PathBuf, archive_dir: PathBuf) -> Self {
        Self { path, archive_dir }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one execution record. Never truncates; the file and its
    /// parent directory are created on demand.
    pub fn append(&self, timestamp: i64, task_id: u64, command: &str) -> Result<(), FluxError> {
        let io_err = |source| FluxError::IoPath {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        writeln!(
            file,
            "[{}] {RUN_MARKER}{task_id}: {command}",
            format_epoch(timestamp)
        )
        .map_err(io_err)
    }

    /// Every log line in file order. An absent log reads as empty; callers
    /// report that case to the user.
    pub fn read_all(&self) -> Result<Vec<String>, FluxError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(FluxError::IoPath {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        Ok(data.lines().map(str::to_owned).collect())
    }

    /// Only the lines recording runs of the given task. The ID is parsed
    /// from the digits directly after the marker; lines without the marker
    /// never match, even if the number appears elsewhere in them.
    pub fn read_filtered(&self, task_id: u64) -> Result<Vec<String>, FluxError> {
        let lines = self.read_all()?;
        Ok(lines
            .into_iter()
            .filter(|line| line_task_id(line) == Some(task_id))
            .collect())
    }

    /// Rotates the log into the archive directory under a timestamped name
    /// and recreates an empty log at the canonical path. Refuses to archive
    /// an empty or missing log.
    pub fn archive(&self) -> Result<PathBuf, FluxError> {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.len() > 0 => {}
            Ok(_) => return Err(FluxError::EmptyLog),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(FluxError::EmptyLog);
            }
            Err(source) => {
                return Err(FluxError::IoPath {
                    path: self.path.clone(),
                    source,
                });
            }
        }

        fs::create_dir_all(&self.archive_dir).map_err(|source| FluxError::IoPath {
            path: self.archive_dir.clone(),
            source,
        })?;

        let dest = self.archive_dir.join(archive_file_name(
            OffsetDateTime::now_utc().unix_timestamp(),
        ));
        fs::rename(&self.path, &dest).map_err(|source| FluxError::IoPath {
            path: dest.clone(),
            source,
        })?;

        File::create(&self.path).map_err(|source| FluxError::IoPath {
            path: self.path.clone(),
            source,
        })?;

        Ok(dest)
    }
}

fn line_task_id(line: &str) -> Option<u64> {
    let rest = &line[line.find(RUN_MARKER)? + RUN_MARKER.len()..];
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// `YYYY-MM-DD HH:MM:SS`, UTC.
pub(crate) fn format_epoch(epoch: i64) -> String {
    let Ok(dt) = OffsetDateTime::from_unix_timestamp(epoch) else {
        return "unknown".to_owned();
    };
    let Ok(format) =
        time::format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")
    else {
        return "unknown".to_owned();
    };
    dt.format(&format).unwrap_or_else(|_| "unknown".to_owned())
}

fn archive_file_name(epoch: i64) -> String {
    let stamp = match OffsetDateTime::from_unix_timestamp(epoch) {
        Ok(dt) => time::format_description::parse(
            "[year]-[month]-[day]_[hour]-[minute]-[second]",
        )
        .ok()
        .and_then(|format| dt.format(&format).ok())
        .unwrap_or_else(|| epoch.to_string()),
        Err(_) => epoch.to_string(),
    };
    format!("tasks_{stamp}.log")
}
