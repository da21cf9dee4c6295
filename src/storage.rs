//! App-data files, managed folders, backups and the rotating JSON log.
//!
//! Every file operation made through [`AppData`] is counted and registered,
//! so a host can export a monitoring report. Periodic upkeep (change scans,
//! backups, log compression) is meant to be pushed as pool jobs.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} already exists")]
    AlreadyExists(PathBuf),
    #[error("{0} does not exist")]
    NotFound(PathBuf),
    #[error("invalid name {0:?}")]
    InvalidName(String),
    #[error("failed to encode json: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// True if `name` is a single path component that stays inside its parent.
pub(crate) fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn checked_name(name: &str) -> Result<&str, StorageError> {
    if is_plain_name(name) {
        Ok(name)
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Serialize)]
struct LogRecord<'a> {
    timestamp: String,
    level: LogLevel,
    message: &'a str,
}

const DATE_FORMAT: &str = "%Y%m%d";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const REPORT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// JSON-lines log file that rolls over daily and when it grows past a size.
///
/// The active file is `<base>_<YYYYMMDD>.txt`. A full file is renamed to
/// `<base>_<YYYYMMDD>_<YYYYMMDD_HHMMSS>.txt` and a fresh one started.
pub struct LogFile {
    dir: PathBuf,
    base: String,
    max_size: u64,
    active_date: String,
    path: PathBuf,
}

impl LogFile {
    pub fn new(dir: impl Into<PathBuf>, base: &str, max_size: u64) -> Self {
        Self::starting_at(dir.into(), base, max_size, Local::now())
    }

    fn starting_at(dir: PathBuf, base: &str, max_size: u64, now: DateTime<Local>) -> Self {
        let active_date = now.format(DATE_FORMAT).to_string();
        let path = dir.join(format!("{base}_{active_date}.txt"));
        LogFile {
            dir,
            base: base.to_string(),
            max_size,
            active_date,
            path,
        }
    }

    /// Path of the file currently written to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True for files this log produced that are no longer written to.
    fn is_retired_file(&self, path: &Path) -> bool {
        if path == self.path || path.extension().is_none_or(|ext| ext != "txt") {
            return false;
        }
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&format!("{}_", self.base)))
    }

    /// Creates the active file if it does not exist.
    pub fn touch(&self) -> Result<(), StorageError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map(drop)
            .map_err(io_err(&self.path))
    }

    pub fn log(&mut self, level: LogLevel, message: &str) -> Result<(), StorageError> {
        self.log_at(Local::now(), level, message)
    }

    fn log_at(
        &mut self,
        now: DateTime<Local>,
        level: LogLevel,
        message: &str,
    ) -> Result<(), StorageError> {
        self.rotate_if_needed(now)?;

        let mut line = serde_json::to_string(&LogRecord {
            timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
            level,
            message,
        })?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err(&self.path))?;
        file.write_all(line.as_bytes()).map_err(io_err(&self.path))
    }

    fn rotate_if_needed(&mut self, now: DateTime<Local>) -> Result<(), StorageError> {
        let today = now.format(DATE_FORMAT).to_string();
        if today != self.active_date {
            self.active_date = today;
            self.path = self.dir.join(format!("{}_{}.txt", self.base, self.active_date));
            debug!(path = %self.path.display(), "log switched to new day");
            return Ok(());
        }

        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if size < self.max_size {
            return Ok(());
        }

        let stamp = now.format(TIMESTAMP_FORMAT);
        let mut rotated = self
            .dir
            .join(format!("{}_{}_{}.txt", self.base, self.active_date, stamp));
        let mut n = 1;
        while rotated.exists() {
            rotated = self
                .dir
                .join(format!("{}_{}_{}_{}.txt", self.base, self.active_date, stamp, n));
            n += 1;
        }
        fs::rename(&self.path, &rotated).map_err(io_err(&self.path))?;
        debug!(rotated = %rotated.display(), size, "log rotated");
        Ok(())
    }
}

/// Counters over the file operations made through an [`AppData`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitoringStats {
    pub files_created: u64,
    pub files_modified: u64,
    pub files_deleted: u64,
    pub files_read: u64,
    pub last_operation: String,
    pub last_operation_time: String,
}

/// Registry entry for a file written through an [`AppData`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    /// Path relative to the data directory.
    pub path: String,
    pub modified_time: String,
    pub size: u64,
    pub content_type: String,
}

#[derive(Serialize)]
struct RegisteredFiles<'a> {
    files: Vec<&'a FileInfo>,
    total_files: usize,
}

#[derive(Serialize)]
struct MonitoringReport<'a> {
    monitoring_statistics: &'a MonitoringStats,
    registered_files: RegisteredFiles<'a>,
}

#[derive(Clone, Copy)]
enum FileOp {
    Created,
    Modified,
    Deleted,
    Read,
}

struct Monitor {
    stats: MonitoringStats,
    registry: BTreeMap<String, FileInfo>,
    mtimes: HashMap<PathBuf, SystemTime>,
}

impl Monitor {
    fn new() -> Self {
        Monitor {
            stats: MonitoringStats {
                files_created: 0,
                files_modified: 0,
                files_deleted: 0,
                files_read: 0,
                last_operation: "initialized".to_string(),
                last_operation_time: Local::now().format(REPORT_TIME_FORMAT).to_string(),
            },
            registry: BTreeMap::new(),
            mtimes: HashMap::new(),
        }
    }

    fn record(&mut self, op: FileOp, operation: String) {
        let counter = match op {
            FileOp::Created => &mut self.stats.files_created,
            FileOp::Modified => &mut self.stats.files_modified,
            FileOp::Deleted => &mut self.stats.files_deleted,
            FileOp::Read => &mut self.stats.files_read,
        };
        *counter += 1;
        self.stats.last_operation = operation;
        self.stats.last_operation_time = Local::now().format(REPORT_TIME_FORMAT).to_string();
    }

    fn register(&mut self, key: String, path: &Path, content_type: &str) {
        let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let info = FileInfo {
            path: key.clone(),
            modified_time: Local::now().format(REPORT_TIME_FORMAT).to_string(),
            size,
            content_type: content_type.to_string(),
        };
        self.registry.insert(key, info);
    }
}

fn content_type(name: &str) -> &'static str {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some("json") => "json",
        _ => "text",
    }
}

/// Per-application data directory with a backup area, managed sub-folders
/// and a rotating log.
pub struct AppData {
    data_dir: PathBuf,
    backup_dir: PathBuf,
    log: Mutex<LogFile>,
    folders: Mutex<Vec<String>>,
    monitor: Mutex<Monitor>,
}

impl AppData {
    /// Lays out `<root>/<app_name>_data` and its `backup` sub-directory.
    /// Nothing is created until [`initialize`](Self::initialize).
    pub fn new(root: impl AsRef<Path>, app_name: &str, max_log_size: u64) -> Self {
        let data_dir = root.as_ref().join(format!("{app_name}_data"));
        let backup_dir = data_dir.join("backup");
        let log = LogFile::new(data_dir.clone(), "log", max_log_size);
        AppData {
            data_dir,
            backup_dir,
            log: Mutex::new(log),
            folders: Mutex::new(Vec::new()),
            monitor: Mutex::new(Monitor::new()),
        }
    }

    pub fn initialize(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.data_dir).map_err(io_err(&self.data_dir))?;
        fs::create_dir_all(&self.backup_dir).map_err(io_err(&self.backup_dir))?;
        self.log.lock().touch()?;
        debug!(dir = %self.data_dir.display(), "app data initialized");
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Path of the log file currently being written.
    pub fn log_path(&self) -> PathBuf {
        self.log.lock().path().to_path_buf()
    }

    pub fn log(&self, level: LogLevel, message: &str) -> Result<(), StorageError> {
        self.log.lock().log(level, message)
    }

    /// Logs a folder operation; a failing log write never fails the operation.
    fn note(&self, level: LogLevel, message: &str) {
        if let Err(err) = self.log(level, &format!("[folders] {message}")) {
            warn!(error = %err, "failed to write app log");
        }
    }

    /// Writes `content` to `<data>/<name>`, replacing any existing file.
    pub fn create_file(&self, name: &str, content: &str) -> Result<(), StorageError> {
        let path = self.data_dir.join(checked_name(name)?);
        let existed = path.exists();
        fs::write(&path, content).map_err(io_err(&path))?;

        let mut monitor = self.monitor.lock();
        monitor.register(name.to_string(), &path, content_type(name));
        if existed {
            monitor.record(FileOp::Modified, format!("overwrote file {name}"));
        } else {
            monitor.record(FileOp::Created, format!("created file {name}"));
        }
        Ok(())
    }

    pub fn read_file(&self, name: &str) -> Result<String, StorageError> {
        let path = self.data_dir.join(checked_name(name)?);
        let text = fs::read_to_string(&path).map_err(io_err(&path))?;
        self.monitor
            .lock()
            .record(FileOp::Read, format!("read file {name}"));
        Ok(text)
    }

    /// Writes `value` as pretty JSON to a new or existing `<data>/<name>`.
    pub fn create_json_file(&self, name: &str, value: &serde_json::Value) -> Result<(), StorageError> {
        let text = serde_json::to_string_pretty(value)?;
        self.create_file(name, &text)
    }

    /// Replaces the contents of an existing JSON file.
    pub fn update_json_file(&self, name: &str, value: &serde_json::Value) -> Result<(), StorageError> {
        let path = self.data_dir.join(checked_name(name)?);
        if !path.is_file() {
            return Err(StorageError::NotFound(path));
        }
        let text = serde_json::to_string_pretty(value)?;
        fs::write(&path, text).map_err(io_err(&path))?;

        let mut monitor = self.monitor.lock();
        monitor.register(name.to_string(), &path, "json");
        monitor.record(FileOp::Modified, format!("updated json file {name}"));
        Ok(())
    }

    pub fn delete_file(&self, name: &str) -> Result<(), StorageError> {
        let path = self.data_dir.join(checked_name(name)?);
        if !path.is_file() {
            return Err(StorageError::NotFound(path));
        }
        fs::remove_file(&path).map_err(io_err(&path))?;

        let mut monitor = self.monitor.lock();
        monitor.registry.remove(name);
        monitor.mtimes.remove(&path);
        monitor.record(FileOp::Deleted, format!("deleted file {name}"));
        Ok(())
    }

    pub fn monitoring_stats(&self) -> MonitoringStats {
        self.monitor.lock().stats.clone()
    }

    /// Files written through this handle and not deleted, sorted by path.
    pub fn registered_files(&self) -> Vec<FileInfo> {
        self.monitor.lock().registry.values().cloned().collect()
    }

    /// Writes the monitoring counters and the file registry as JSON to
    /// `<data>/<name>`.
    pub fn export_monitoring_data(&self, name: &str) -> Result<PathBuf, StorageError> {
        let path = self.data_dir.join(checked_name(name)?);
        let text = {
            let monitor = self.monitor.lock();
            serde_json::to_string_pretty(&MonitoringReport {
                monitoring_statistics: &monitor.stats,
                registered_files: RegisteredFiles {
                    files: monitor.registry.values().collect(),
                    total_files: monitor.registry.len(),
                },
            })?
        };
        fs::write(&path, text).map_err(io_err(&path))?;
        debug!(path = %path.display(), "monitoring data exported");
        Ok(path)
    }

    /// Compares the modification time of every regular file in the data
    /// directory with the previous scan and returns the files that changed,
    /// sorted. A file seen for the first time is recorded, not reported.
    pub fn scan_changes(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut seen = Vec::new();
        for entry in fs::read_dir(&self.data_dir).map_err(io_err(&self.data_dir))? {
            let entry = entry.map_err(io_err(&self.data_dir))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .map_err(io_err(&path))?;
            seen.push((path, modified));
        }

        let mut monitor = self.monitor.lock();
        monitor.mtimes.retain(|path, _| seen.iter().any(|(p, _)| p == path));
        let mut changed = Vec::new();
        for (path, modified) in seen {
            match monitor.mtimes.insert(path.clone(), modified) {
                Some(previous) if previous != modified => {
                    debug!(path = %path.display(), "file changed");
                    changed.push(path);
                }
                _ => {}
            }
        }
        changed.sort();
        Ok(changed)
    }

    /// Moves every rotated-out log file into its own `<stem>.zip` next to it.
    /// Returns the number of logs archived.
    pub fn compress_old_logs(&self) -> Result<usize, StorageError> {
        let log = self.log.lock();
        let mut archived = 0;
        for entry in fs::read_dir(&self.data_dir).map_err(io_err(&self.data_dir))? {
            let entry = entry.map_err(io_err(&self.data_dir))?;
            let path = entry.path();
            if !path.is_file() || !log.is_retired_file(&path) {
                continue;
            }
            let zip_path = path.with_extension("zip");
            archive_file(&path, &zip_path)?;
            fs::remove_file(&path).map_err(io_err(&path))?;
            archived += 1;
        }
        if archived > 0 {
            info!(archived, "old logs compressed");
        }
        Ok(archived)
    }

    /// Copies every regular file in the data directory, except the active
    /// log, into the backup directory. Returns the number of files copied.
    pub fn backup_files(&self) -> Result<usize, StorageError> {
        let active_log = self.log_path();
        let mut copied = 0;
        for entry in fs::read_dir(&self.data_dir).map_err(io_err(&self.data_dir))? {
            let entry = entry.map_err(io_err(&self.data_dir))?;
            let path = entry.path();
            if !path.is_file() || path == active_log {
                continue;
            }
            let target = self.backup_dir.join(entry.file_name());
            fs::copy(&path, &target).map_err(io_err(&path))?;
            copied += 1;
        }
        debug!(copied, "data files backed up");
        Ok(copied)
    }

    fn folder_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        Ok(self.data_dir.join(checked_name(name)?))
    }

    pub fn create_folder(&self, name: &str) -> Result<PathBuf, StorageError> {
        let mut folders = self.folders.lock();
        let path = self.folder_path(name)?;
        if path.exists() {
            self.note(LogLevel::Warn, &format!("folder already exists: {name}"));
            return Err(StorageError::AlreadyExists(path));
        }
        fs::create_dir(&path).map_err(io_err(&path))?;
        folders.push(name.to_string());
        self.note(LogLevel::Info, &format!("created folder: {name}"));
        Ok(path)
    }

    pub fn delete_folder(&self, name: &str) -> Result<(), StorageError> {
        let mut folders = self.folders.lock();
        let path = self.folder_path(name)?;
        if !path.exists() {
            self.note(LogLevel::Warn, &format!("folder does not exist: {name}"));
            return Err(StorageError::NotFound(path));
        }
        fs::remove_dir_all(&path).map_err(io_err(&path))?;
        folders.retain(|f| f != name);
        self.note(LogLevel::Info, &format!("deleted folder: {name}"));
        Ok(())
    }

    /// Folders created through this handle and not yet deleted.
    pub fn managed_folders(&self) -> Vec<String> {
        self.folders.lock().clone()
    }

    pub fn create_file_in_folder(
        &self,
        folder: &str,
        name: &str,
        content: &str,
    ) -> Result<(), StorageError> {
        let _folders = self.folders.lock();
        let dir = self.folder_path(folder)?;
        if !dir.is_dir() {
            return Err(StorageError::NotFound(dir));
        }
        let path = dir.join(checked_name(name)?);
        fs::write(&path, content).map_err(io_err(&path))?;
        {
            let mut monitor = self.monitor.lock();
            monitor.register(format!("{folder}/{name}"), &path, content_type(name));
            monitor.record(FileOp::Created, format!("created file {name} in folder {folder}"));
        }
        self.note(LogLevel::Info, &format!("created file {name} in folder {folder}"));
        Ok(())
    }

    pub fn read_file_in_folder(&self, folder: &str, name: &str) -> Result<String, StorageError> {
        let _folders = self.folders.lock();
        let dir = self.folder_path(folder)?;
        if !dir.is_dir() {
            return Err(StorageError::NotFound(dir));
        }
        let path = dir.join(checked_name(name)?);
        let text = fs::read_to_string(&path).map_err(io_err(&path))?;
        self.monitor
            .lock()
            .record(FileOp::Read, format!("read file {name} in folder {folder}"));
        Ok(text)
    }

    /// Copies a folder's files into `backup/<folder>_<unix seconds>/`.
    pub fn backup_folder(&self, folder: &str) -> Result<PathBuf, StorageError> {
        let _folders = self.folders.lock();
        let dir = self.folder_path(folder)?;
        if !dir.is_dir() {
            self.note(LogLevel::Warn, &format!("folder does not exist for backup: {folder}"));
            return Err(StorageError::NotFound(dir));
        }

        let secs = Local::now().timestamp();
        let target = self.backup_dir.join(format!("{folder}_{secs}"));
        fs::create_dir_all(&target).map_err(io_err(&target))?;

        for entry in fs::read_dir(&dir).map_err(io_err(&dir))? {
            let entry = entry.map_err(io_err(&dir))?;
            let path = entry.path();
            if path.is_file() {
                fs::copy(&path, target.join(entry.file_name())).map_err(io_err(&path))?;
            }
        }

        self.note(
            LogLevel::Info,
            &format!("backed up folder {folder} to {}", target.display()),
        );
        Ok(target)
    }
}

/// Writes `source` as the single deflated entry of a new archive at `target`.
fn archive_file(source: &Path, target: &Path) -> Result<(), StorageError> {
    let bytes = fs::read(source).map_err(io_err(source))?;
    let entry_name = source
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("log.txt")
        .to_string();
    let archive_err = |source: zip::result::ZipError| StorageError::Archive {
        path: target.to_path_buf(),
        source,
    };

    let file = File::create(target).map_err(io_err(target))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(entry_name, options).map_err(archive_err)?;
    zip.write_all(&bytes).map_err(io_err(target))?;
    zip.finish().map_err(archive_err)?;
    Ok(())
}
