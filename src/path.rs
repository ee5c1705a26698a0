// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where the application root lives, and where each piece of
//! tracked data sits beneath it.
//!
//! # Application Root Layout
//!
//! ```text
//! <root>/
//! ├── settings.ini
//! └── files/
//!     ├── projectlist.txt
//!     ├── running.txt
//!     └── <YYYY>/<MM>/<YYYY>-<MM>-<DD>.txt
//! ```
//!
//! Day files are bucketed by year, then by 1-based month. Every numeric path
//! component that is a single digit gets left-padded with `0` to a width of
//! two. Longer components pass through unchanged.

use chrono::{Datelike, NaiveDate};
use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

/// Directory under the root holding all record data.
pub const FILES_DIR: &str = "files";

/// Project-name list, relative to [`FILES_DIR`].
pub const PROJECT_LIST: &str = "projectlist.txt";

/// Running timer slot, relative to [`FILES_DIR`].
pub const RUNNING_FILE: &str = "running.txt";

/// Settings file, relative to the application root.
pub const SETTINGS_FILE: &str = "settings.ini";

/// Environment variable overriding the application root.
pub const ROOT_ENV: &str = "TIMETRACKER_DIR";

/// Directory and file locations of one day bucket.
///
/// Both paths are relative to the application root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayPath {
    directory: PathBuf,
    file: PathBuf,
}

impl DayPath {
    /// Resolve day bucket paths of target date.
    pub fn resolve(date: NaiveDate) -> Self {
        let directory = Path::new(FILES_DIR)
            .join(pad2(date.year()))
            .join(pad2(date.month()));
        let file = directory.join(format!("{}.txt", Self::file_stem(date)));

        Self { directory, file }
    }

    /// Month directory, e.g., `files/2024/03`.
    pub fn directory(&self) -> &Path {
        self.directory.as_path()
    }

    /// Day file, e.g., `files/2024/03/2024-03-05.txt`.
    pub fn file(&self) -> &Path {
        self.file.as_path()
    }

    /// File stem of a day file, e.g., `2024-03-05`.
    pub fn file_stem(date: NaiveDate) -> String {
        format!(
            "{}-{}-{}",
            pad2(date.year()),
            pad2(date.month()),
            pad2(date.day())
        )
    }

    /// Recover date from a day file name like `2024-03-05.txt`.
    pub fn parse_file_name(name: &str) -> Option<NaiveDate> {
        let stem = name.strip_suffix(".txt")?;
        NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
    }
}

/// Resolve day bucket paths of target date.
pub fn resolve(date: NaiveDate) -> DayPath {
    DayPath::resolve(date)
}

/// Left-pad single-digit component with `0`.
pub fn pad2(value: impl Display) -> String {
    let value = value.to_string();
    if value.len() == 1 {
        format!("0{value}")
    } else {
        value
    }
}

/// Determine default absolute path to the application root.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/timetracker` as the default
/// application root. Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`PathError::NoWayHome`] if data directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_root_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("timetracker"))
        .ok_or(PathError::NoWayHome)
}

/// Determine application root.
///
/// Prefers [`ROOT_ENV`] with shell expansion applied, falling back to
/// [`default_root_dir`] if the variable is unset or empty.
///
/// # Errors
///
/// - Return [`PathError::ShellExpansion`] if [`ROOT_ENV`] refers to an
///   undefined variable.
/// - Return [`PathError::NoWayHome`] if falling back fails.
pub fn root_dir() -> Result<PathBuf> {
    match std::env::var(ROOT_ENV) {
        Ok(raw) if !raw.trim().is_empty() => expand_path(raw),
        _ => default_root_dir(),
    }
}

/// Perform shell expansion on a user supplied path.
///
/// # Errors
///
/// - Return [`PathError::ShellExpansion`] if an undefined variable is used.
pub fn expand_path(raw: impl AsRef<str>) -> Result<PathBuf> {
    Ok(PathBuf::from(shellexpand::full(raw.as_ref())?.into_owned()))
}

/// Path resolution error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PathError {
    /// No way to determine user's home directory.
    #[error("cannot determine absolute path to user's home directory")]
    NoWayHome,

    /// Failed to perform shell expansion on path.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

/// Friendly result alias :3
pub type Result<T, E = PathError> = std::result::Result<T, E>;
