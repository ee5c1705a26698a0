// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Personal time tracking over plain-text day files.
//!
//! Every finished activity becomes a __record__ holding a project label, a
//! description, and the instants it started and ended. Records are filed into
//! one text file per calendar day beneath an application root, and the whole
//! data directory can be packed into a portable `.tt` backup archive.
//!
//! # Modules
//!
//! - [`record`]: record type and its `;;;` delimited line codec.
//! - [`path`]: application root discovery and date to file mapping.
//! - [`store`]: day file persistence, project list, and running timer slot.
//! - [`settings`]: `settings.ini` persistence and typed preferences.
//! - [`archive`]: backup archive packing and unpacking.
//! - [`tracker`]: service composing all of the above over one root.

pub mod archive;
pub mod path;
pub mod record;
pub mod settings;
pub mod store;
pub mod tracker;

pub use archive::{PackSummary, Packager};
pub use path::DayPath;
pub use record::{Record, TimeOfDay};
pub use settings::{Preferences, SettingsFile};
pub use store::{DayLoad, RecordStore, StoreEvent};
pub use tracker::{RecordEdit, RecordRef, Tracker, TrackerError};
