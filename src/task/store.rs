#![forbid(unsafe_code)]

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use fs2::FileExt as _;

use crate::error::FluxError;
use crate::task::model::{MAX_COMMAND_LEN, Task};

/// Field separator for the on-disk task file. Practically impossible in a
/// shell command line; commands containing it are rejected at add time
/// rather than escaped.
pub const DELIMITER: char = '█';

const FIELD_COUNT: usize = 5;

/// The persistent task collection.
///
/// The in-memory task list is a snapshot: `load` replaces it wholesale from
/// the durable file, `save` publishes it wholesale. The durable file is
/// shared with the scheduler process; every read-modify-write sequence must
/// hold the advisory lock from [`TaskStore::lock`].
#[derive(Debug)]
pub struct TaskStore {
    path: PathBuf,
    capacity: usize,
    next_id: u64,
    tasks: Vec<Task>,
}

impl TaskStore {
    #[must_use]
    pub fn new(path: PathBuf, capacity: usize) -> Self {
        Self {
            path,
            capacity,
            next_id: 1,
            tasks: Vec::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Acquires the advisory lock guarding the durable file. Hold the guard
    /// across the whole load-mutate-save sequence.
    pub fn lock(&self) -> Result<StoreLock, FluxError> {
        StoreLock::acquire(&self.path)
    }

    /// Appends a new record and returns its assigned ID. Fails closed: the
    /// store is unchanged on any error.
    pub fn add(&mut self, command: &str, interval_seconds: u64) -> Result<u64, FluxError> {
        if self.tasks.len() >= self.capacity {
            return Err(FluxError::CapacityExceeded(self.capacity));
        }
        if command.len() > MAX_COMMAND_LEN {
            return Err(FluxError::CommandTooLong(MAX_COMMAND_LEN));
        }
        if command.contains(DELIMITER) {
            return Err(FluxError::ReservedDelimiter(DELIMITER));
        }

        let id = self.next_id;
        self.next_id += 1;
        self.tasks.push(Task {
            id,
            command: command.to_owned(),
            interval_seconds,
            last_run: None,
            active: true,
        });
        Ok(id)
    }

    /// Removes the record with the given ID, compacting the remainder in
    /// order. IDs are never reused afterwards.
    pub fn delete(&mut self, id: u64) -> Result<(), FluxError> {
        match self.tasks.iter().position(|t| t.id == id) {
            Some(idx) => {
                self.tasks.remove(idx);
                Ok(())
            }
            None => Err(FluxError::TaskNotFound(id)),
        }
    }

    pub fn pause(&mut self, id: u64) -> Result<(), FluxError> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(FluxError::TaskNotFound(id))?;
        if !task.active {
            return Err(FluxError::AlreadyPaused(id));
        }
        task.active = false;
        Ok(())
    }

    pub fn resume(&mut self, id: u64) -> Result<(), FluxError> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(FluxError::TaskNotFound(id))?;
        if task.active {
            return Err(FluxError::AlreadyActive(id));
        }
        task.active = true;
        Ok(())
    }

    /// Records an execution time in memory only; the durable copy is patched
    /// separately via [`TaskStore::update_last_run`].
    pub fn set_last_run(&mut self, id: u64, timestamp: i64) {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) {
            task.last_run = Some(timestamp);
        }
    }

    /// Replaces the in-memory collection with the parsed contents of the
    /// durable file, discarding unsaved state. A missing or unreadable file
    /// is an empty store, not an error; lines with too few fields are
    /// skipped. The ID allocator resumes above the highest loaded ID.
    pub fn load(&mut self) {
        self.tasks.clear();
        self.next_id = 1;

        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    eprintln!("could not read {}: {err}", self.path.display());
                }
                return;
            }
        };

        for line in data.lines() {
            let Some(task) = parse_line(line) else {
                continue;
            };
            if self.tasks.len() >= self.capacity {
                eprintln!(
                    "task limit of {} reached; some saved tasks were not loaded",
                    self.capacity
                );
                break;
            }
            if task.id >= self.next_id {
                self.next_id = task.id + 1;
            }
            self.tasks.push(task);
        }
    }

    /// Serializes every record to the durable file, replacing it wholesale.
    /// Writes go to a temporary file first and land via atomic rename, so
    /// readers never observe a partial set.
    pub fn save(&self) -> Result<(), FluxError> {
        let mut data = String::new();
        for task in &self.tasks {
            data.push_str(&encode_line(task));
            data.push('\n');
        }
        write_atomic(&self.path, data.as_bytes())
    }

    /// Patches a single record's `last_run` field on disk without touching
    /// the in-memory collections of other processes' unrelated edits.
    ///
    /// Re-reads the durable file, rewrites every well-formed line (patching
    /// only the matching ID's fourth field) to a temporary file, and renames
    /// it into place. Lines that do not split into exactly five fields are
    /// dropped — a lossy policy, kept deliberately; see DESIGN.md.
    pub fn update_last_run(&self, id: u64, timestamp: i64) -> Result<(), FluxError> {
        let _lock = self.lock()?;

        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(FluxError::IoPath {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let mut out = String::new();
        for line in data.lines() {
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(DELIMITER).collect();
            if fields.len() != FIELD_COUNT {
                continue;
            }
            if fields[0].parse::<u64>() == Ok(id) {
                out.push_str(&format!(
                    "{}{d}{}{d}{}{d}{timestamp}{d}{}",
                    fields[0],
                    fields[1],
                    fields[2],
                    fields[4],
                    d = DELIMITER,
                ));
            } else {
                out.push_str(line);
            }
            out.push('\n');
        }

        write_atomic(&self.path, out.as_bytes())
    }
}

fn encode_line(task: &Task) -> String {
    format!(
        "{id}{d}{command}{d}{interval}{d}{last_run}{d}{active}",
        id = task.id,
        command = task.command,
        interval = task.interval_seconds,
        last_run = task.last_run.unwrap_or(0),
        active = u8::from(task.active),
        d = DELIMITER,
    )
}

fn parse_line(line: &str) -> Option<Task> {
    let fields: Vec<&str> = line.split(DELIMITER).collect();
    if fields.len() != FIELD_COUNT {
        return None;
    }

    let id = fields[0].parse::<u64>().ok()?;
    let command = fields[1].to_owned();
    let interval_seconds = fields[2].parse::<u64>().ok()?;
    let last_run = match fields[3].parse::<i64>().ok()? {
        0 => None,
        ts => Some(ts),
    };
    let active = fields[4].parse::<i64>().ok()? != 0;

    Some(Task {
        id,
        command,
        interval_seconds,
        last_run,
        active,
    })
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), FluxError> {
    let io_err = |source| FluxError::IoPath {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tmp = path.with_extension("txt.tmp");
    let mut file = File::create(&tmp).map_err(io_err)?;
    file.write_all(data).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    fs::rename(&tmp, path).map_err(io_err)
}

/// Advisory lock on the durable task file, released on drop.
///
/// Taken on a sidecar `.lock` file so the data file itself can still be
/// atomically replaced while the lock is held.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    fn acquire(store_path: &Path) -> Result<Self, FluxError> {
        let path = store_path.with_extension("txt.lock");
        let io_err = |source| FluxError::IoPath {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(&path)
            .map_err(io_err)?;
        file.lock_exclusive().map_err(io_err)?;

        Ok(Self { file, path })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        let _ = fs::remove_file(&self.path);
    }
}
