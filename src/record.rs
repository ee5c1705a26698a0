// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Time-tracking records and their line codec.
//!
//! A __record__ is one timed activity: a project label, a free-text
//! description, and the instants at which the activity started and ended.
//! Records are persisted one per line inside a day file.
//!
//! # Line Format
//!
//! Every record encodes to a single line of four fields joined by the
//! [`DELIMITER`] sequence, followed by one trailing delimiter:
//!
//! ```text
//! project;;;description;;;startMillis;;;endMillis;;;
//! ```
//!
//! Timestamps are base-10 milliseconds since the Unix epoch. An edge that has
//! not been set yet, e.g., the end of a running timer, is written as an empty
//! field. Decoding tolerates both the trailing empty segment and its absence,
//! but fails on anything with fewer than four fields.
//!
//! Decoded timestamps are absolute instants. They are only converted to the
//! local time zone for display and for day bucketing.

use chrono::{DateTime, Local, NaiveDate, TimeZone, Timelike, Utc};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    num::ParseIntError,
    str::FromStr,
};

/// Field separator of the record line format.
pub const DELIMITER: &str = ";;;";

/// One timed activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Short project label.
    pub project: String,

    /// Free-text description of the activity.
    pub description: String,

    /// Instant the activity started.
    pub start: Option<DateTime<Local>>,

    /// Instant the activity ended.
    pub end: Option<DateTime<Local>>,
}

impl Record {
    /// Construct new record without any time edges set.
    pub fn new(project: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            description: description.into(),
            start: None,
            end: None,
        }
    }

    /// Construct new record whose start edge is fixed at `start`.
    ///
    /// The instant is truncated to millisecond precision so that the record
    /// survives an encode/decode cycle unchanged.
    pub fn started_at(
        project: impl Into<String>,
        description: impl Into<String>,
        start: DateTime<Local>,
    ) -> Self {
        Self {
            start: Some(truncate_to_millis(start)),
            ..Self::new(project, description)
        }
    }

    /// Fix end edge of record at `end`, truncated to millisecond precision.
    pub fn finish_at(&mut self, end: DateTime<Local>) {
        self.end = Some(truncate_to_millis(end));
    }

    /// Record has a start but no end yet.
    pub fn is_running(&self) -> bool {
        self.start.is_some() && self.end.is_none()
    }

    /// Elapsed time between both edges, if both are set.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Calendar day this record is filed under.
    ///
    /// Records are bucketed strictly by the local date of their start
    /// instant, even if they end on a later day.
    pub fn bucket_date(&self) -> Option<NaiveDate> {
        self.start.map(|start| start.date_naive())
    }

    /// Validate text fields before the record touches storage.
    ///
    /// # Errors
    ///
    /// - Return [`ValidationError::Empty`] if project or description is blank.
    /// - Return [`ValidationError::Forbidden`] if project or description
    ///   contains the field delimiter or a line break.
    /// - Return [`ValidationError::TrailingSemicolon`] if project or
    ///   description ends with `;`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_text(Field::Project, &self.project)?;
        validate_text(Field::Description, &self.description)?;
        Ok(())
    }

    /// Validate that both time edges are set and correctly ordered.
    ///
    /// # Errors
    ///
    /// - Return [`ValidationError::Empty`] if either edge is missing.
    /// - Return [`ValidationError::Order`] if start comes after end.
    pub fn validate_interval(&self) -> Result<(), ValidationError> {
        let start = self.start.ok_or(ValidationError::Empty(Field::StartTime))?;
        let end = self.end.ok_or(ValidationError::Empty(Field::EndTime))?;
        if start > end {
            return Err(ValidationError::Order {
                start: TimeOfDay::of(start),
                end: TimeOfDay::of(end),
            });
        }

        Ok(())
    }
}

impl Display for Record {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&encode(self))
    }
}

impl FromStr for Record {
    type Err = MalformedRecord;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        decode(line)
    }
}

/// Encode a record into one line, without the line terminator.
pub fn encode(record: &Record) -> String {
    let millis = |edge: Option<DateTime<Local>>| {
        edge.map(|instant| instant.timestamp_millis().to_string())
            .unwrap_or_default()
    };

    let project = &record.project;
    let description = &record.description;
    let start = millis(record.start);
    let end = millis(record.end);

    format!("{project}{DELIMITER}{description}{DELIMITER}{start}{DELIMITER}{end}{DELIMITER}")
}

/// Decode one line back into a record.
///
/// # Errors
///
/// - Return [`MalformedRecord::FieldCount`] if the line has fewer than four
///   delimited fields.
/// - Return [`MalformedRecord::Timestamp`] if a timestamp is not a base-10
///   integer.
/// - Return [`MalformedRecord::OutOfRange`] if a timestamp cannot be
///   represented as an instant.
pub fn decode(line: &str) -> Result<Record, MalformedRecord> {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields = line.split(DELIMITER).collect::<Vec<_>>();
    if fields.len() < 4 {
        return Err(MalformedRecord::FieldCount {
            found: fields.len(),
        });
    }

    Ok(Record {
        project: fields[0].to_string(),
        description: fields[1].to_string(),
        start: decode_instant(Edge::Start, fields[2])?,
        end: decode_instant(Edge::End, fields[3])?,
    })
}

/// Decode one raw line of a day file.
///
/// # Errors
///
/// - Return [`MalformedRecord::Encoding`] if the line is not UTF-8.
/// - Return any error of [`decode`] otherwise.
pub fn decode_bytes(line: &[u8]) -> Result<Record, MalformedRecord> {
    let line = std::str::from_utf8(line).map_err(|err| MalformedRecord::Encoding {
        valid_up_to: err.valid_up_to(),
    })?;

    decode(line)
}

fn decode_instant(edge: Edge, field: &str) -> Result<Option<DateTime<Local>>, MalformedRecord> {
    if field.is_empty() {
        return Ok(None);
    }

    let millis = field
        .parse::<i64>()
        .map_err(|source| MalformedRecord::Timestamp {
            edge,
            value: field.to_string(),
            source,
        })?;

    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|instant| Some(instant.with_timezone(&Local)))
        .ok_or(MalformedRecord::OutOfRange {
            edge,
            value: millis,
        })
}

/// Drop sub-millisecond precision from an instant.
pub fn truncate_to_millis(instant: DateTime<Local>) -> DateTime<Local> {
    Local
        .timestamp_millis_opt(instant.timestamp_millis())
        .single()
        .unwrap_or(instant)
}

fn validate_text(field: Field, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty(field));
    }

    for pattern in [DELIMITER, "\n", "\r"] {
        if value.contains(pattern) {
            return Err(ValidationError::Forbidden { field, pattern });
        }
    }

    // INVARIANT: A trailing ';' would merge into the following delimiter.
    if value.ends_with(';') {
        return Err(ValidationError::TrailingSemicolon(field));
    }

    Ok(())
}

/// Wall-clock time of day used to override record edges.
///
/// Parsed from `hh:mm` text. Hours run from 0 to 23, minutes from 0 to 59.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    /// Construct new time of day.
    ///
    /// # Errors
    ///
    /// - Return [`ValidationError::Time`] if hour or minute is out of range.
    pub fn new(hour: u32, minute: u32) -> Result<Self, ValidationError> {
        if hour > 23 || minute > 59 {
            return Err(ValidationError::Time {
                value: format!("{hour}:{minute}"),
            });
        }

        Ok(Self { hour, minute })
    }

    /// Local time of day of an instant.
    pub fn of(instant: DateTime<Local>) -> Self {
        Self {
            hour: instant.hour(),
            minute: instant.minute(),
        }
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// Place this time of day on a calendar date in the local time zone.
    ///
    /// Seconds are zeroed. Ambiguous local times resolve to the earlier
    /// instant.
    ///
    /// # Errors
    ///
    /// - Return [`ValidationError::NonexistentTime`] if the local time falls
    ///   into a daylight saving gap on that date.
    pub fn on(self, date: NaiveDate) -> Result<DateTime<Local>, ValidationError> {
        date.and_hms_opt(self.hour, self.minute, 0)
            .and_then(|naive| naive.and_local_timezone(Local).earliest())
            .ok_or(ValidationError::NonexistentTime { time: self, date })
    }
}

impl FromStr for TimeOfDay {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::Time {
            value: value.to_string(),
        };

        let (hour, minute) = value.trim().split_once(':').ok_or_else(invalid)?;
        let hour = hour.parse::<u32>().map_err(|_| invalid())?;
        let minute = minute.parse::<u32>().map_err(|_| invalid())?;

        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl Display for TimeOfDay {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Which time edge of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Start,
    End,
}

impl Display for Edge {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Start => fmt.write_str("start"),
            Self::End => fmt.write_str("end"),
        }
    }
}

/// Record field named by validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Project,
    Description,
    StartTime,
    EndTime,
}

impl Display for Field {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Project => fmt.write_str("project"),
            Self::Description => fmt.write_str("description"),
            Self::StartTime => fmt.write_str("start time"),
            Self::EndTime => fmt.write_str("end time"),
        }
    }
}

/// Stored line does not decode into a record.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MalformedRecord {
    /// Not enough delimited fields.
    #[error("expected at least 4 fields separated by \";;;\", found {found}")]
    FieldCount { found: usize },

    /// Timestamp field is not a base-10 integer.
    #[error("invalid {edge} timestamp {value:?}")]
    Timestamp {
        edge: Edge,
        value: String,
        #[source]
        source: ParseIntError,
    },

    /// Timestamp cannot be represented as an instant.
    #[error("{edge} timestamp {value} is out of range")]
    OutOfRange { edge: Edge, value: i64 },

    /// Raw line bytes are not UTF-8.
    #[error("line is not valid UTF-8 after byte {valid_up_to}")]
    Encoding { valid_up_to: usize },
}

/// Caller supplied data that must not reach storage.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Empty(Field),

    #[error("{field} must not contain {pattern:?}")]
    Forbidden { field: Field, pattern: &'static str },

    #[error("{0} must not end with ';'")]
    TrailingSemicolon(Field),

    #[error("invalid time {value:?}, expected hh:mm between 00:00 and 23:59")]
    Time { value: String },

    #[error("time {time} does not exist on {date}")]
    NonexistentTime { time: TimeOfDay, date: NaiveDate },

    #[error("start time {start} is after end time {end}")]
    Order { start: TimeOfDay, end: TimeOfDay },
}
