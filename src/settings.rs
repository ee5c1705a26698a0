// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Settings persistence.
//!
//! Preferences live in a flat `settings.ini` file at the application root,
//! one `key=value` pair per line. The key set is open-ended: unknown keys are
//! carried through loads and saves untouched.
//!
//! Known keys are described by the [`OPTIONS`] table, which pairs each key
//! with its default and a validator. [`Preferences`] is the typed snapshot
//! built from that table, so the rest of the application never has to look
//! up preferences by string.

use crate::store::write_atomic;

use std::{
    collections::BTreeMap,
    fs::{read_to_string, OpenOptions},
    path::{Path, PathBuf},
};
use tracing::{debug, instrument, warn};

/// Minimize to the system tray instead of exiting.
pub const USE_SYSTEM_TRAY: &str = "useSystemTray";

/// Launch on login.
pub const AUTOSTART: &str = "autostart";

/// Skip confirmation before deleting records or importing backups.
pub const SKIP_CONFIRM: &str = "skipConfirm";

/// Description of one known setting.
#[derive(Debug, Clone, Copy)]
pub struct SettingOption {
    /// Key as stored in the settings file.
    pub key: &'static str,

    /// Value used when key is absent or invalid.
    pub default: &'static str,

    /// Accepts or rejects a candidate value.
    pub validate: fn(&str) -> bool,

    /// One-line description for listings.
    pub summary: &'static str,
}

/// Table of known settings.
pub const OPTIONS: &[SettingOption] = &[
    SettingOption {
        key: USE_SYSTEM_TRAY,
        default: "false",
        validate: is_bool,
        summary: "minimize to the system tray instead of exiting",
    },
    SettingOption {
        key: AUTOSTART,
        default: "false",
        validate: is_bool,
        summary: "launch on login",
    },
    SettingOption {
        key: SKIP_CONFIRM,
        default: "false",
        validate: is_bool,
        summary: "delete records and import backups without asking",
    },
];

/// Look up a known setting by key.
pub fn option(key: &str) -> Option<&'static SettingOption> {
    OPTIONS.iter().find(|option| option.key == key)
}

fn is_bool(value: &str) -> bool {
    matches!(value, "true" | "false")
}

/// Settings file handle.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    /// Open settings file at target path.
    ///
    /// Creates the settings file if it does not already exist yet.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::Create`] if settings file cannot be created
    ///   if missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        // INVARIANT: Create settings file if needed.
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            mkdirp::mkdirp(parent).map_err(|source| SettingsError::Create {
                source,
                path: path.clone(),
            })?;
        }
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| SettingsError::Create {
                source,
                path: path.clone(),
            })?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Load every setting.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::Read`] if settings file cannot be read.
    #[instrument(skip(self), level = "debug")]
    pub fn load(&self) -> Result<BTreeMap<String, String>> {
        let content = read_to_string(&self.path).map_err(|source| SettingsError::Read {
            source,
            path: self.path.clone(),
        })?;

        Ok(parse(&content))
    }

    /// Overwrite settings file with target settings.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::InvalidEntry`] if a key or value cannot be
    ///   represented in the file format.
    /// - Return [`SettingsError::Write`] if settings file cannot be written.
    #[instrument(skip(self, settings), level = "debug")]
    pub fn save(&self, settings: &BTreeMap<String, String>) -> Result<()> {
        let content = render(settings)?;
        write_atomic(&self.path, content.as_bytes()).map_err(|source| SettingsError::Write {
            source,
            path: self.path.clone(),
        })?;

        debug!("saved {} setting(s)", settings.len());
        Ok(())
    }

    /// Raw value of a setting.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::Read`] if settings file cannot be read.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    /// Boolean value of a setting.
    ///
    /// Only the exact text `true` counts as true. Any other value, or an
    /// absent key, is false.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::Read`] if settings file cannot be read.
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.as_deref() == Some("true"))
    }

    /// Set a single setting, keeping all others.
    ///
    /// Known keys are checked against their validator first.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::InvalidValue`] if a known key rejects value.
    /// - Return [`SettingsError::InvalidEntry`] if key or value cannot be
    ///   represented in the file format.
    /// - Return [`SettingsError::Read`] or [`SettingsError::Write`] on I/O
    ///   failure.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        if let Some(option) = option(&key) {
            if !(option.validate)(&value) {
                return Err(SettingsError::InvalidValue { key, value });
            }
        }

        let mut settings = self.load()?;
        settings.insert(key, value);
        self.save(&settings)
    }
}

/// Parse settings file content.
///
/// Lines that do not contain exactly one `=` are skipped. Blank lines are
/// ignored. Last value wins for duplicate keys.
pub fn parse(content: &str) -> BTreeMap<String, String> {
    let mut settings = BTreeMap::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        match parse_line(line) {
            Some((key, value)) => {
                settings.insert(key.to_string(), value.to_string());
            }
            None => warn!("skip malformed setting on line {}: {line:?}", index + 1),
        }
    }

    settings
}

/// Split one `key=value` line.
pub fn parse_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    if key.is_empty() || value.contains('=') {
        return None;
    }

    Some((key, value))
}

/// Render settings into file content.
///
/// # Errors
///
/// - Return [`SettingsError::InvalidEntry`] if a key is empty or a key or
///   value contains `=` or a line break.
pub fn render(settings: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::new();
    for (key, value) in settings {
        let bad = |text: &str| text.contains(['=', '\n', '\r']);
        if key.is_empty() || bad(key) || bad(value) {
            return Err(SettingsError::InvalidEntry {
                key: key.clone(),
                value: value.clone(),
            });
        }

        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }

    Ok(out)
}

/// Immutable typed snapshot of the settings file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preferences {
    pub use_system_tray: bool,
    pub autostart: bool,
    pub skip_confirm: bool,
    extra: BTreeMap<String, String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self::from_map(&BTreeMap::new())
    }
}

impl Preferences {
    /// Build snapshot from raw settings.
    ///
    /// Known keys with missing or invalid values fall back to their default.
    /// Unknown keys are kept as they are.
    pub fn from_map(settings: &BTreeMap<String, String>) -> Self {
        let flag = |key: &str| known_value(settings, key) == "true";

        Self {
            use_system_tray: flag(USE_SYSTEM_TRAY),
            autostart: flag(AUTOSTART),
            skip_confirm: flag(SKIP_CONFIRM),
            extra: settings
                .iter()
                .filter(|(key, _)| option(key).is_none())
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }

    /// Serialize snapshot back into raw settings, field by field.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut settings = self.extra.clone();
        settings.insert(USE_SYSTEM_TRAY.into(), self.use_system_tray.to_string());
        settings.insert(AUTOSTART.into(), self.autostart.to_string());
        settings.insert(SKIP_CONFIRM.into(), self.skip_confirm.to_string());
        settings
    }

    /// Settings not described by [`OPTIONS`].
    pub fn extra(&self) -> &BTreeMap<String, String> {
        &self.extra
    }
}

fn known_value<'a>(settings: &'a BTreeMap<String, String>, key: &str) -> &'a str {
    let Some(option) = option(key) else {
        return "";
    };

    match settings.get(key) {
        Some(value) if (option.validate)(value) => value.as_str(),
        Some(value) => {
            warn!("ignore invalid value {value:?} for setting {key:?}");
            option.default
        }
        None => option.default,
    }
}

/// Settings error types.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Settings file cannot be created when missing.
    #[error("failed to create settings file at {:?}", path.display())]
    Create {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Settings file cannot be read from.
    #[error("failed to read from settings file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Settings file cannot be written to.
    #[error("failed to write to settings file at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Entry cannot be represented as a `key=value` line.
    #[error("setting {key:?}={value:?} must not contain '=' or line breaks")]
    InvalidEntry { key: String, value: String },

    /// Known setting rejects value.
    #[error("invalid value {value:?} for setting {key:?}")]
    InvalidValue { key: String, value: String },
}

/// Friendly result alias :3
pub type Result<T, E = SettingsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::fs::write;
    use tempfile::TempDir;

    fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn open_creates_missing_file() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let settings = SettingsFile::open(root.path().join("nested").join("settings.ini"))?;

        assert!(settings.path().is_file());
        assert_eq!(settings.load()?, BTreeMap::new());

        Ok(())
    }

    #[test]
    fn save_then_load_round_trips() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let settings = SettingsFile::open(root.path().join("settings.ini"))?;
        let expect = map(&[
            ("useSystemTray", "true"),
            ("autostart", "false"),
            ("theme", "dark mode"),
            ("empty", ""),
        ]);

        settings.save(&expect)?;
        assert_eq!(settings.load()?, expect);

        Ok(())
    }

    #[test]
    fn save_then_load_keeps_exact_text() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let settings = SettingsFile::open(root.path().join("settings.ini"))?;
        let cases = [
            map(&[(" padded key ", "  padded value  ")]),
            map(&[("Zeiterfassung", "Überstunden für Käse"), ("言語", "日本語")]),
            map(&[("empty", "")]),
            map(&[("tabs", "\tindented\t")]),
        ];

        for expect in cases {
            settings.save(&expect)?;
            assert_eq!(settings.load()?, expect);
        }

        Ok(())
    }

    #[test]
    fn load_keeps_last_duplicate() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let settings = SettingsFile::open(root.path().join("settings.ini"))?;
        write(
            settings.path(),
            indoc! {"
                theme=light
                autostart=true
                theme=dark
            "},
        )?;

        assert_eq!(
            settings.load()?,
            map(&[("autostart", "true"), ("theme", "dark")])
        );
        assert_eq!(settings.get("theme")?, Some("dark".into()));

        settings.set("autostart", "false")?;
        assert_eq!(
            std::fs::read_to_string(settings.path())?,
            indoc! {"
                autostart=false
                theme=dark
            "}
        );

        Ok(())
    }

    #[test]
    fn parse_skips_malformed_lines() {
        let result = parse(indoc! {"
            useSystemTray=true
            no separator here
            a=b=c

            =orphan
            autostart=false
            useSystemTray=false
        "});

        assert_eq!(
            result,
            map(&[("autostart", "false"), ("useSystemTray", "false")])
        );
    }

    #[test]
    fn render_rejects_separator_in_key() {
        assert!(matches!(
            render(&map(&[("a=b", "c")])),
            Err(SettingsError::InvalidEntry { .. })
        ));
        assert!(matches!(
            render(&map(&[("a", "line\nbreak")])),
            Err(SettingsError::InvalidEntry { .. })
        ));
    }

    #[test]
    fn get_bool_matches_exact_true() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let settings = SettingsFile::open(root.path().join("settings.ini"))?;

        for (value, expect) in [("true", true), ("True", false), ("yes", false), ("", false)] {
            settings.save(&map(&[("flag", value)]))?;
            assert_eq!(settings.get_bool("flag")?, expect, "{value:?}");
        }
        assert!(!settings.get_bool("absent")?);

        Ok(())
    }

    #[test]
    fn preferences_agree_with_get_bool() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let settings = SettingsFile::open(root.path().join("settings.ini"))?;

        for raw in [map(&[]), map(&[(SKIP_CONFIRM, "nonsense"), (AUTOSTART, "")])] {
            settings.save(&raw)?;
            let prefs = Preferences::from_map(&settings.load()?);

            assert_eq!(prefs.use_system_tray, settings.get_bool(USE_SYSTEM_TRAY)?);
            assert_eq!(prefs.autostart, settings.get_bool(AUTOSTART)?);
            assert_eq!(prefs.skip_confirm, settings.get_bool(SKIP_CONFIRM)?);
        }

        for option in OPTIONS {
            assert_eq!(option.default, "false", "{}", option.key);
        }

        Ok(())
    }

    #[test]
    fn set_validates_known_keys() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let settings = SettingsFile::open(root.path().join("settings.ini"))?;

        settings.set(AUTOSTART, "true")?;
        settings.set("custom", "anything goes")?;
        assert!(matches!(
            settings.set(USE_SYSTEM_TRAY, "maybe"),
            Err(SettingsError::InvalidValue { .. })
        ));

        assert_eq!(
            settings.load()?,
            map(&[("autostart", "true"), ("custom", "anything goes")])
        );

        Ok(())
    }

    #[test]
    fn preferences_apply_defaults_and_keep_unknown_keys() {
        let raw = map(&[
            ("useSystemTray", "true"),
            ("skipConfirm", "nonsense"),
            ("windowWidth", "800"),
        ]);

        let prefs = Preferences::from_map(&raw);
        assert!(prefs.use_system_tray);
        assert!(!prefs.autostart);
        assert!(!prefs.skip_confirm);
        assert_eq!(prefs.extra(), &map(&[("windowWidth", "800")]));

        assert_eq!(
            prefs.to_map(),
            map(&[
                ("autostart", "false"),
                ("skipConfirm", "false"),
                ("useSystemTray", "true"),
                ("windowWidth", "800"),
            ])
        );
    }
}
