// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Record store management.
//!
//! The __record store__ owns everything beneath the `files/` directory of the
//! application root: one day file per calendar day that has records, the
//! shared project-name list, and the running timer slot.
//!
//! # Day Files
//!
//! A day file holds one encoded [`Record`] per line in insertion order. Line
//! order is never re-sorted by time. Every save is a full rewrite of the day
//! file, performed by writing a temporary sibling and renaming it into place.
//! Thus, a crash or failed write mid-save never leaves a truncated day file
//! behind.
//!
//! Loading a day tolerates damage. Lines that fail to decode, including lines
//! that are not valid UTF-8, are skipped and handed back to the caller as
//! [`MalformedLine`] warnings instead of failing the whole load.
//!
//! # Notifications
//!
//! Interested collaborators can [`subscribe`](RecordStore::subscribe) to a
//! broadcast channel of [`StoreEvent`]s emitted on every load and save.

use crate::{
    path::{DayPath, FILES_DIR, PROJECT_LIST, RUNNING_FILE},
    record::{decode_bytes, encode, MalformedRecord, Record},
};

use chrono::{Datelike, NaiveDate};
use std::{
    fs::{read, remove_file, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

const EVENT_CAPACITY: usize = 64;

/// Change notifications published by the record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Day was loaded.
    Loaded { date: NaiveDate, records: usize },

    /// Day was rewritten.
    Saved { date: NaiveDate, records: usize },

    /// Record was removed from a day.
    Deleted { date: NaiveDate, index: usize },

    /// Backup archive was unpacked into the data directory.
    Imported { files: usize },
}

/// Result of loading one day bucket.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DayLoad {
    /// Decoded records in file order.
    pub records: Vec<Record>,

    /// Lines that could not be decoded.
    pub warnings: Vec<MalformedLine>,
}

impl DayLoad {
    /// Day loaded without any malformed lines.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// A line of a day file that failed to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine {
    /// One-based line number inside the day file.
    pub line_number: usize,

    /// Raw content of the line, lossily converted to UTF-8.
    pub line: String,

    /// Reason for the failure.
    pub error: MalformedRecord,
}

/// File-backed record store rooted at an application root.
#[derive(Debug)]
pub struct RecordStore {
    root: PathBuf,
    events: broadcast::Sender<StoreEvent>,
}

impl RecordStore {
    /// Construct new record store over target application root.
    ///
    /// Does not touch the file system. Call [`ensure_root`](Self::ensure_root)
    /// to create the layout.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            root: root.into(),
            events,
        }
    }

    /// Application root of this store.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Data directory holding all record files.
    pub fn files_dir(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    /// Absolute path of the day file for target date.
    pub fn day_file(&self, date: NaiveDate) -> PathBuf {
        self.root.join(DayPath::resolve(date).file())
    }

    /// Subscribe to store change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Publish a notification to current subscribers.
    ///
    /// Notifications are dropped if nobody listens.
    pub fn notify(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }

    /// Create data directory and project list if missing.
    ///
    /// Idempotent: existing files and directories are left untouched.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::CreateDir`] if data directory cannot be created.
    /// - Return [`StoreError::Write`] if project list cannot be created.
    #[instrument(skip(self), level = "debug")]
    pub fn ensure_root(&self) -> Result<()> {
        let files_dir = self.files_dir();
        create_dir(&files_dir)?;

        // INVARIANT: Create project list if needed, never truncate it.
        let project_list = files_dir.join(PROJECT_LIST);
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&project_list)
            .map_err(|source| StoreError::Write {
                source,
                path: project_list.clone(),
            })?;

        Ok(())
    }

    /// Load all records of target day in file order.
    ///
    /// A missing day file yields an empty load.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Read`] if the day file exists but cannot be read.
    #[instrument(skip(self), level = "debug")]
    pub fn load_day(&self, date: NaiveDate) -> Result<DayLoad> {
        let path = self.day_file(date);
        let Some(content) = read_optional(&path)? else {
            debug!("no day file at {:?}", path.display());
            self.notify(StoreEvent::Loaded { date, records: 0 });
            return Ok(DayLoad::default());
        };

        let mut load = DayLoad::default();
        for (index, line) in lines(&content).enumerate() {
            if line.trim_ascii().is_empty() {
                continue;
            }

            match decode_bytes(line) {
                Ok(record) => load.records.push(record),
                Err(error) => {
                    warn!(
                        "skip malformed line {} of {:?}: {error}",
                        index + 1,
                        path.display()
                    );
                    load.warnings.push(MalformedLine {
                        line_number: index + 1,
                        line: String::from_utf8_lossy(line).into_owned(),
                        error,
                    });
                }
            }
        }

        self.notify(StoreEvent::Loaded {
            date,
            records: load.records.len(),
        });

        Ok(load)
    }

    /// Replace all records of target day.
    ///
    /// Creates missing month directories, then rewrites the day file through
    /// a temporary file and an atomic rename.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::CreateDir`] if month directory cannot be created.
    /// - Return [`StoreError::Write`] if day file cannot be written.
    #[instrument(skip(self, records), level = "debug")]
    pub fn save_day(&self, date: NaiveDate, records: &[Record]) -> Result<()> {
        let day = DayPath::resolve(date);
        create_dir(self.root.join(day.directory()))?;

        let content = records
            .iter()
            .map(|record| format!("{}\n", encode(record)))
            .collect::<String>();

        let path = self.root.join(day.file());
        write_atomic(&path, content.as_bytes()).map_err(|source| StoreError::Write {
            source,
            path: path.clone(),
        })?;

        info!("saved {} record(s) to {:?}", records.len(), path.display());
        self.notify(StoreEvent::Saved {
            date,
            records: records.len(),
        });

        Ok(())
    }

    /// List days of target month that have a day file, in ascending order.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Glob`] if the search pattern cannot be built.
    /// - Return [`StoreError::Read`] if the month directory cannot be read.
    pub fn recorded_days(&self, year: i32, month: u32) -> Result<Vec<NaiveDate>> {
        let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
            return Ok(Vec::new());
        };

        let directory = self.root.join(DayPath::resolve(first).directory());
        let pattern = format!(
            "{}/*.txt",
            glob::Pattern::escape(&directory.to_string_lossy())
        );

        let mut days = Vec::new();
        for entry in glob::glob(&pattern)? {
            let path = entry.map_err(|err| StoreError::Read {
                path: err.path().to_path_buf(),
                source: err.into(),
            })?;

            let date = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(DayPath::parse_file_name);

            match date {
                Some(date) if date.year() == year && date.month() == month => days.push(date),
                _ => debug!("ignore foreign file {:?}", path.display()),
            }
        }

        days.sort();
        days.dedup();

        Ok(days)
    }

    /// List known project names in insertion order.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Read`] if project list cannot be read.
    pub fn projects(&self) -> Result<Vec<String>> {
        let path = self.files_dir().join(PROJECT_LIST);
        let content = read_optional(&path)?.unwrap_or_default();
        let content = String::from_utf8_lossy(&content);

        let mut projects: Vec<String> = Vec::new();
        for name in content.lines().map(str::trim).filter(|name| !name.is_empty()) {
            if !projects.iter().any(|known| known == name) {
                projects.push(name.to_string());
            }
        }

        Ok(projects)
    }

    /// Add project name to project list unless already present.
    ///
    /// Returns `true` if the list changed.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Read`] if project list cannot be read.
    /// - Return [`StoreError::Write`] if project list cannot be written.
    pub fn add_project(&self, name: impl AsRef<str>) -> Result<bool> {
        let name = name.as_ref().trim();
        let mut projects = self.projects()?;
        if name.is_empty() || projects.iter().any(|known| known == name) {
            return Ok(false);
        }

        projects.push(name.to_string());
        let content = projects
            .iter()
            .map(|project| format!("{project}\n"))
            .collect::<String>();

        let files_dir = self.files_dir();
        create_dir(&files_dir)?;
        let path = files_dir.join(PROJECT_LIST);
        write_atomic(&path, content.as_bytes())
            .map_err(|source| StoreError::Write { source, path })?;

        debug!("add project {name:?} to project list");
        Ok(true)
    }

    /// Currently running timer, if any.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Read`] if running slot cannot be read.
    /// - Return [`StoreError::CorruptRunning`] if running slot does not decode.
    pub fn running(&self) -> Result<Option<Record>> {
        let path = self.files_dir().join(RUNNING_FILE);
        let Some(content) = read_optional(&path)? else {
            return Ok(None);
        };

        let first = lines(&content).find(|line| !line.trim_ascii().is_empty());
        match first {
            Some(line) => decode_bytes(line)
                .map(Some)
                .map_err(|source| StoreError::CorruptRunning { source, path }),
            None => Ok(None),
        }
    }

    /// Persist running timer.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::CreateDir`] if data directory cannot be created.
    /// - Return [`StoreError::Write`] if running slot cannot be written.
    pub fn set_running(&self, record: &Record) -> Result<()> {
        let files_dir = self.files_dir();
        create_dir(&files_dir)?;

        let path = files_dir.join(RUNNING_FILE);
        write_atomic(&path, format!("{}\n", encode(record)).as_bytes())
            .map_err(|source| StoreError::Write { source, path })
    }

    /// Clear running timer slot.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Remove`] if running slot cannot be removed.
    pub fn clear_running(&self) -> Result<()> {
        let path = self.files_dir().join(RUNNING_FILE);
        match remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Remove { source, path }),
        }
    }
}

/// Write file contents through a temporary sibling and an atomic rename.
///
/// The previous file stays intact if any step fails.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| err.error)?;

    Ok(())
}

/// Split raw file contents into lines, dropping `\n` or `\r\n` terminators.
fn lines(content: &[u8]) -> impl Iterator<Item = &[u8]> {
    content
        .split(|byte| *byte == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match read(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Read {
            source,
            path: path.to_path_buf(),
        }),
    }
}

fn create_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    mkdirp::mkdirp(path).map_err(|source| StoreError::CreateDir {
        source,
        path: path.to_path_buf(),
    })?;

    Ok(())
}

/// Record store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Directory cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// File cannot be read from.
    #[error("failed to read from {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// File cannot be written to.
    #[error("failed to write to {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// File cannot be removed.
    #[error("failed to remove {:?}", path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Running timer slot holds garbage.
    #[error("running timer at {:?} is corrupt", path.display())]
    CorruptRunning {
        #[source]
        source: MalformedRecord,
        path: PathBuf,
    },

    /// Day file search pattern is invalid.
    #[error(transparent)]
    Glob(#[from] glob::PatternError),
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, read_dir, write};
    use tempfile::TempDir;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn record(project: &str, description: &str, start: i64, end: i64) -> Record {
        Record {
            project: project.into(),
            description: description.into(),
            start: Local.timestamp_millis_opt(start).single(),
            end: Local.timestamp_millis_opt(end).single(),
        }
    }

    #[test]
    fn ensure_root_is_idempotent() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let store = RecordStore::new(root.path());

        store.ensure_root()?;
        store.add_project("Acme")?;
        store.ensure_root()?;

        assert!(store.files_dir().is_dir());
        assert_eq!(store.projects()?, vec!["Acme".to_string()]);

        Ok(())
    }

    #[test]
    fn save_then_load_preserves_order() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let store = RecordStore::new(root.path());
        let day = date(2024, 3, 5);
        let records = vec![
            record("b", "later entry first", 1_709_650_000_000, 1_709_653_600_000),
            record("a", "earlier entry second", 1_709_620_000_000, 1_709_623_600_000),
        ];

        store.save_day(day, &records)?;
        let load = store.load_day(day)?;

        assert_eq!(load.records, records);
        assert!(load.is_clean());
        assert!(root.path().join("files/2024/03/2024-03-05.txt").is_file());

        Ok(())
    }

    #[test]
    fn save_then_load_empty_day() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let store = RecordStore::new(root.path());
        let day = date(2024, 12, 1);

        store.save_day(day, &[record("a", "b", 0, 1)])?;
        store.save_day(day, &[])?;

        assert_eq!(store.load_day(day)?, DayLoad::default());

        Ok(())
    }

    #[test]
    fn load_missing_day_is_empty() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let store = RecordStore::new(root.path());

        assert_eq!(store.load_day(date(1999, 1, 1))?, DayLoad::default());

        Ok(())
    }

    #[test]
    fn load_skips_malformed_lines() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let store = RecordStore::new(root.path());
        let day = date(2024, 3, 5);
        let path = store.day_file(day);
        create_dir_all(path.parent().unwrap())?;
        write(
            &path,
            indoc! {"
                Acme;;;Fix bug;;;1700000000000;;;1700003600000;;;
                this line is garbage
                Acme;;;Review;;;1700003600000;;;1700007200000;;;
            "},
        )?;

        let load = store.load_day(day)?;

        assert_eq!(load.records.len(), 2);
        assert_eq!(load.records[0].description, "Fix bug");
        assert_eq!(load.records[1].description, "Review");
        assert_eq!(load.warnings.len(), 1);
        assert_eq!(load.warnings[0].line_number, 2);
        assert_eq!(load.warnings[0].line, "this line is garbage");
        assert_eq!(
            load.warnings[0].error,
            MalformedRecord::FieldCount { found: 1 }
        );

        Ok(())
    }

    #[test]
    fn load_skips_lines_with_invalid_utf8() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let store = RecordStore::new(root.path());
        let day = date(2024, 3, 5);
        let path = store.day_file(day);
        create_dir_all(path.parent().unwrap())?;

        let mut content = b"Acme;;;Fix bug;;;1700000000000;;;1700003600000;;;\r\n".to_vec();
        content.extend_from_slice(b"bad \xff\xfe line\n");
        content.extend_from_slice("Käse;;;Review;;;1700003600000;;;1700007200000;;;\n".as_bytes());
        write(&path, content)?;

        let load = store.load_day(day)?;

        assert_eq!(load.records.len(), 2);
        assert_eq!(load.records[0].description, "Fix bug");
        assert_eq!(load.records[1].project, "Käse");
        assert_eq!(load.warnings.len(), 1);
        assert_eq!(load.warnings[0].line_number, 2);
        assert_eq!(load.warnings[0].line, "bad \u{fffd}\u{fffd} line");
        assert_eq!(
            load.warnings[0].error,
            MalformedRecord::Encoding { valid_up_to: 4 }
        );

        Ok(())
    }

    #[test]
    fn save_leaves_no_temporary_files() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let store = RecordStore::new(root.path());
        let day = date(2024, 3, 5);

        store.save_day(day, &[record("a", "b", 0, 1)])?;
        store.save_day(day, &[record("a", "c", 0, 1)])?;

        let names = read_dir(store.day_file(day).parent().unwrap())?
            .map(|entry| entry.map(|entry| entry.file_name()))
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(names, vec![std::ffi::OsString::from("2024-03-05.txt")]);

        Ok(())
    }

    #[test]
    fn failed_save_reports_write_error() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let store = RecordStore::new(root.path());
        let day = date(2024, 3, 5);

        // INVARIANT: A directory squatting on the day file path cannot be replaced.
        create_dir_all(store.day_file(day).join("occupied"))?;

        let result = store.save_day(day, &[record("a", "b", 0, 1)]);
        assert!(matches!(result, Err(StoreError::Write { .. })));
        assert!(store.day_file(day).join("occupied").is_dir());

        Ok(())
    }

    #[test]
    fn project_list_has_set_semantics() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let store = RecordStore::new(root.path());
        store.ensure_root()?;

        assert!(store.add_project("Acme")?);
        assert!(store.add_project("Internal")?);
        assert!(!store.add_project("Acme")?);
        assert!(!store.add_project("  ")?);

        assert_eq!(store.projects()?, vec!["Acme", "Internal"]);

        Ok(())
    }

    #[test]
    fn recorded_days_lists_month() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let store = RecordStore::new(root.path());

        store.save_day(date(2024, 3, 17), &[])?;
        store.save_day(date(2024, 3, 5), &[])?;
        store.save_day(date(2024, 4, 1), &[])?;
        write(store.day_file(date(2024, 3, 5)).with_file_name("notes.txt"), "")?;

        assert_eq!(
            store.recorded_days(2024, 3)?,
            vec![date(2024, 3, 5), date(2024, 3, 17)]
        );
        assert_eq!(store.recorded_days(2023, 3)?, Vec::<NaiveDate>::new());

        Ok(())
    }

    #[test]
    fn running_slot_lifecycle() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let store = RecordStore::new(root.path());
        assert_eq!(store.running()?, None);

        let running = Record::started_at("Acme", "Fix bug", Local::now());
        store.set_running(&running)?;
        assert_eq!(store.running()?, Some(running));

        store.clear_running()?;
        store.clear_running()?;
        assert_eq!(store.running()?, None);

        Ok(())
    }

    #[test]
    fn corrupt_running_slot_is_reported() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let store = RecordStore::new(root.path());
        store.ensure_root()?;
        write(store.files_dir().join(RUNNING_FILE), "garbage\n")?;

        assert!(matches!(
            store.running(),
            Err(StoreError::CorruptRunning { .. })
        ));

        Ok(())
    }

    #[test]
    fn subscribers_observe_saves_and_loads() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let store = RecordStore::new(root.path());
        let mut events = store.subscribe();
        let day = date(2024, 3, 5);

        store.save_day(day, &[record("a", "b", 0, 1)])?;
        store.load_day(day)?;

        assert_eq!(
            events.try_recv()?,
            StoreEvent::Saved { date: day, records: 1 }
        );
        assert_eq!(
            events.try_recv()?,
            StoreEvent::Loaded { date: day, records: 1 }
        );

        Ok(())
    }
}
