// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Time tracking service.
//!
//! The [`Tracker`] is the single entry point collaborators talk to. It owns
//! one application root, and composes the record store, settings store, and
//! archive packager over it.
//!
//! # Day Integrity
//!
//! Any operation that rewrites a day file first loads that day in full. If
//! the load reported malformed lines, the operation is refused with
//! [`TrackerError::MalformedDay`] instead of silently dropping those lines
//! on the rewrite. Reading a damaged day through [`Tracker::list_day`] is
//! always allowed.

use crate::{
    archive::{PackSummary, Packager},
    path::{root_dir, PathError, SETTINGS_FILE},
    record::{truncate_to_millis, Field, Record, TimeOfDay, ValidationError},
    settings::{Preferences, SettingsError, SettingsFile},
    store::{DayLoad, RecordStore, StoreError, StoreEvent},
};

use chrono::{DateTime, Local, NaiveDate};
use indicatif::ProgressBar;
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

/// Position of a record inside its day bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordRef {
    /// Day bucket holding the record.
    pub date: NaiveDate,

    /// Zero-based position in file order.
    pub index: usize,
}

impl RecordRef {
    pub fn new(date: NaiveDate, index: usize) -> Self {
        Self { date, index }
    }
}

impl Display for RecordRef {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}#{}", self.date, self.index)
    }
}

/// Field changes to apply to an existing record.
///
/// Unset fields keep their current value. Times are `hh:mm` text and are
/// placed on the calendar date of the edge they replace.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecordEdit {
    pub project: Option<String>,
    pub description: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl RecordEdit {
    /// Edit does not change anything.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Time tracking service over one application root.
#[derive(Debug)]
pub struct Tracker {
    store: RecordStore,
    settings: SettingsFile,
    preferences: Preferences,
}

impl Tracker {
    /// Open tracker at target application root.
    ///
    /// Creates the data directory, project list, and settings file if any of
    /// them is missing.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::Store`] if data directory cannot be set up.
    /// - Return [`TrackerError::Settings`] if settings cannot be loaded.
    #[instrument(skip(root), level = "debug")]
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let store = RecordStore::new(&root);
        store.ensure_root()?;

        let settings = SettingsFile::open(root.join(SETTINGS_FILE))?;
        let preferences = Preferences::from_map(&settings.load()?);

        Ok(Self {
            store,
            settings,
            preferences,
        })
    }

    /// Open tracker at the default application root.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::Path`] if application root cannot be
    ///   determined.
    /// - Return any error of [`Tracker::open`].
    pub fn open_default() -> Result<Self> {
        Self::open(root_dir()?)
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Typed snapshot of current settings.
    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// Subscribe to record store change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    /// Currently running timer, if any.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::Store`] if running slot cannot be read.
    pub fn running(&self) -> Result<Option<Record>> {
        Ok(self.store.running()?)
    }

    /// Start a new timer at `now`.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::Validation`] if project or description is
    ///   invalid.
    /// - Return [`TrackerError::TimerAlreadyRunning`] if a timer is running.
    /// - Return [`TrackerError::Store`] if running slot cannot be written.
    #[instrument(skip(self, project, description), level = "debug")]
    pub fn start_timer(
        &self,
        project: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Local>,
    ) -> Result<Record> {
        let record = Record::started_at(project, description, now);
        record.validate()?;

        if let Some(running) = self.store.running()? {
            return Err(TrackerError::TimerAlreadyRunning {
                project: running.project,
                description: running.description,
            });
        }

        self.store.set_running(&record)?;
        info!("started timer for {:?}", record.project);

        Ok(record)
    }

    /// Stop the running timer at `now`, and file it into its day bucket.
    ///
    /// The end edge never lands before the start edge, even if the clock went
    /// backwards. The record is filed under the date it started on. A timer
    /// whose interval is already filed in that day, e.g., after an earlier
    /// stop failed midway, is not appended a second time.
    ///
    /// Failing to add the project to the project list only logs a warning.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::NoTimerRunning`] if no timer is running.
    /// - Return [`TrackerError::MalformedDay`] if target day has damage.
    /// - Return [`TrackerError::Store`] if record cannot be persisted, or if
    ///   the running slot cannot be cleared.
    #[instrument(skip(self), level = "debug")]
    pub fn stop_timer(&self, now: DateTime<Local>) -> Result<(RecordRef, Record)> {
        let mut record = self.store.running()?.ok_or(TrackerError::NoTimerRunning)?;
        let start = *record.start.get_or_insert(truncate_to_millis(now));
        record.finish_at(now.max(start));

        let date = record.bucket_date().unwrap_or_else(|| now.date_naive());
        let mut records = self.mutable_day(date)?;
        let filed = records
            .iter()
            .position(|filed| filed.project == record.project && filed.start == record.start);

        // INVARIANT: File each running timer at most once.
        let index = match filed {
            Some(index) => {
                debug!("timer for {:?} already filed at index {index}", record.project);
                index
            }
            None => {
                records.push(record);
                self.store.save_day(date, &records)?;
                records.len() - 1
            }
        };
        self.store.clear_running()?;

        let record = records.swap_remove(index);
        if let Err(error) = self.store.add_project(&record.project) {
            warn!("cannot add {:?} to project list: {error}", record.project);
        }

        let at = RecordRef::new(date, index);
        info!("stopped timer for {:?} as {at}", record.project);

        Ok((at, record))
    }

    /// Load every record of target day.
    ///
    /// Malformed lines are reported through [`DayLoad::warnings`].
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::Store`] if day file cannot be read.
    pub fn list_day(&self, date: NaiveDate) -> Result<DayLoad> {
        Ok(self.store.load_day(date)?)
    }

    /// Add a completed record to target day.
    ///
    /// Both times are `hh:mm` text placed on `date`.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::Validation`] if any field is invalid, or if
    ///   start comes after end.
    /// - Return [`TrackerError::MalformedDay`] if target day has damage.
    /// - Return [`TrackerError::Store`] if record cannot be persisted.
    #[instrument(skip(self, project, description), level = "debug")]
    pub fn add_record(
        &self,
        date: NaiveDate,
        project: impl Into<String>,
        description: impl Into<String>,
        start: &str,
        end: &str,
    ) -> Result<RecordRef> {
        let mut record = Record::new(project, description);
        record.validate()?;
        record.start = Some(parse_time(Field::StartTime, start)?.on(date)?);
        record.end = Some(parse_time(Field::EndTime, end)?.on(date)?);
        record.validate_interval()?;

        let mut records = self.mutable_day(date)?;
        records.push(record);
        self.store.save_day(date, &records)?;
        self.store.add_project(&records[records.len() - 1].project)?;

        Ok(RecordRef::new(date, records.len() - 1))
    }

    /// Apply field changes to an existing record.
    ///
    /// The record stays in its day bucket, even when a time changes.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::RecordNotFound`] if reference is out of range.
    /// - Return [`TrackerError::Validation`] if edited record is invalid.
    /// - Return [`TrackerError::MalformedDay`] if target day has damage.
    /// - Return [`TrackerError::Store`] if day cannot be rewritten.
    #[instrument(skip(self, edit), level = "debug")]
    pub fn edit_record(&self, at: RecordRef, edit: RecordEdit) -> Result<Record> {
        let mut records = self.mutable_day(at.date)?;
        let current = records
            .get(at.index)
            .ok_or(TrackerError::RecordNotFound(at))?;

        let mut edited = current.clone();
        if let Some(project) = edit.project {
            edited.project = project;
        }
        if let Some(description) = edit.description {
            edited.description = description;
        }
        if let Some(start) = edit.start {
            let date = edited.start.map_or(at.date, |start| start.date_naive());
            edited.start = Some(parse_time(Field::StartTime, &start)?.on(date)?);
        }
        if let Some(end) = edit.end {
            let date = edited.end.map_or(at.date, |end| end.date_naive());
            edited.end = Some(parse_time(Field::EndTime, &end)?.on(date)?);
        }
        edited.validate()?;
        edited.validate_interval()?;

        records[at.index] = edited.clone();
        self.store.save_day(at.date, &records)?;
        self.store.add_project(&edited.project)?;
        info!("edited record {at}");

        Ok(edited)
    }

    /// Remove a record from its day bucket.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::RecordNotFound`] if reference is out of range.
    /// - Return [`TrackerError::MalformedDay`] if target day has damage.
    /// - Return [`TrackerError::Store`] if day cannot be rewritten.
    #[instrument(skip(self), level = "debug")]
    pub fn delete_record(&self, at: RecordRef) -> Result<Record> {
        let mut records = self.mutable_day(at.date)?;
        if at.index >= records.len() {
            return Err(TrackerError::RecordNotFound(at));
        }

        let removed = records.remove(at.index);
        self.store.save_day(at.date, &records)?;
        self.store.notify(StoreEvent::Deleted {
            date: at.date,
            index: at.index,
        });
        info!("deleted record {at}");

        Ok(removed)
    }

    /// Pack the whole data directory into a backup archive.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::Archive`] if packing fails.
    pub fn export_backup(&self, file: impl AsRef<Path>, progress: ProgressBar) -> Result<PackSummary> {
        let packager = Packager::new().with_progress(progress);
        Ok(packager.pack(self.store.files_dir(), file)?)
    }

    /// Unpack a backup archive over the data directory.
    ///
    /// Files present in the backup replace their counterparts, every other
    /// file is kept.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::Archive`] if unpacking fails.
    pub fn import_backup(&self, file: impl AsRef<Path>, progress: ProgressBar) -> Result<PackSummary> {
        let packager = Packager::new().with_progress(progress);
        let summary = packager.unpack(file, self.store.files_dir())?;
        self.store.notify(StoreEvent::Imported {
            files: summary.files,
        });

        Ok(summary)
    }

    /// Raw value of a setting.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::Settings`] if settings cannot be read.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.settings.get(key)?)
    }

    /// Change a setting and refresh the preference snapshot.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::Settings`] if value is rejected or settings
    ///   cannot be written.
    pub fn set_setting(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.settings.set(key, value)?;
        self.preferences = Preferences::from_map(&self.settings.load()?);
        Ok(())
    }

    /// Every raw setting.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::Settings`] if settings cannot be read.
    pub fn settings(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.settings.load()?)
    }

    /// Known project names in insertion order.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::Store`] if project list cannot be read.
    pub fn projects(&self) -> Result<Vec<String>> {
        Ok(self.store.projects()?)
    }

    /// Days of target month that have records on disk.
    ///
    /// # Errors
    ///
    /// - Return [`TrackerError::Store`] if month directory cannot be searched.
    pub fn recorded_days(&self, year: i32, month: u32) -> Result<Vec<NaiveDate>> {
        Ok(self.store.recorded_days(year, month)?)
    }

    fn mutable_day(&self, date: NaiveDate) -> Result<Vec<Record>> {
        let load = self.store.load_day(date)?;
        if !load.is_clean() {
            return Err(TrackerError::MalformedDay {
                date,
                lines: load.warnings.iter().map(|line| line.line_number).collect(),
            });
        }

        Ok(load.records)
    }
}

fn parse_time(field: Field, text: &str) -> Result<TimeOfDay, ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::Empty(field));
    }

    text.parse()
}

/// Time tracking error types.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Application root cannot be determined.
    #[error(transparent)]
    Path(#[from] PathError),

    /// Record store operations fail.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Settings store operations fail.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Archive packaging fails.
    #[error(transparent)]
    Archive(#[from] crate::archive::ArchiveError),

    /// Caller supplied data is invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Timer cannot start while another one runs.
    #[error("timer already running for {project:?} ({description:?})")]
    TimerAlreadyRunning { project: String, description: String },

    /// Nothing to stop.
    #[error("no timer is running")]
    NoTimerRunning,

    /// Record reference does not name an existing record.
    #[error("no record at {0}")]
    RecordNotFound(RecordRef),

    /// Day holds lines that would be lost on rewrite.
    #[error("day {date} has malformed lines {lines:?}, fix them before editing")]
    MalformedDay { date: NaiveDate, lines: Vec<usize> },
}

/// Friendly result alias :3
pub type Result<T, E = TrackerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_time_rejects() {
        let cases = [
            ("", ValidationError::Empty(Field::StartTime)),
            ("  ", ValidationError::Empty(Field::StartTime)),
            ("24:00", ValidationError::Time { value: "24:00".into() }),
            ("9h", ValidationError::Time { value: "9h".into() }),
        ];

        for (text, expect) in cases {
            assert_eq!(parse_time(Field::StartTime, text), Err(expect));
        }
    }

    #[test]
    fn record_ref_display() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(RecordRef::new(date, 2).to_string(), "2024-03-05#2");
    }
}
