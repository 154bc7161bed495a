#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FluxError {
    #[error("task store is full ({0} tasks); delete a task to make room")]
    CapacityExceeded(usize),

    #[error("no task found with ID {0}")]
    TaskNotFound(u64),

    #[error("task {0} is already paused")]
    AlreadyPaused(u64),

    #[error("task {0} is already active")]
    AlreadyActive(u64),

    #[error("interval must be a positive number of seconds")]
    InvalidInterval,

    #[error("command '{0}' not found on this system")]
    CommandNotFound(String),

    #[error("command is longer than {0} bytes")]
    CommandTooLong(usize),

    #[error("command must not contain the field separator '{0}'")]
    ReservedDelimiter(char),

    #[error("run log is empty; no runs to archive")]
    EmptyLog,

    #[error("io error at {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
