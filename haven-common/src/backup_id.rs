//! Backup identifiers
//!
//! A backup id names one point-in-time backup of one source directory. The
//! canonical form is `F` followed by a 12-hour clock timestamp and a meridiem
//! suffix, e.g. `F20090709034221PM` for 2009-07-09 15:42:21.
//!
//! Ids are ordered chronologically when both parse as canonical timestamps.
//! Non-canonical ids sort before canonical ones and are ordered lexically among
//! themselves, so a registry that predates the timestamp format still gets a
//! stable ordering.

use crate::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const CANONICAL_LEN: usize = 17;

/// Identifier for one backup instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackupId(String);

impl BackupId {
    /// Validate and wrap a raw id
    ///
    /// Rejects empty ids and ids containing `-`, whitespace or path separators,
    /// since the id is embedded in `backupId-block-supplier-Kind` file names.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(Error::InvalidInput("backup id is empty".to_string()));
        }
        if raw
            .chars()
            .any(|c| c == '-' || c == '/' || c == '\\' || c.is_whitespace())
        {
            return Err(Error::InvalidInput(format!(
                "backup id contains a reserved character: {:?}",
                raw
            )));
        }
        Ok(Self(raw))
    }

    /// Build the canonical id for a backup started at `at`
    pub fn from_datetime(at: NaiveDateTime) -> Self {
        let (pm, hour12) = at.hour12();
        let suffix = if pm { "PM" } else { "AM" };
        Self(format!(
            "F{}{:02}{}{}",
            at.format("%Y%m%d"),
            hour12,
            at.format("%M%S"),
            suffix
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time encoded in a canonical id, `None` for any other form
    pub fn created_at(&self) -> Option<NaiveDateTime> {
        let raw = self.0.as_str();
        if raw.len() != CANONICAL_LEN || !raw.starts_with('F') {
            return None;
        }
        let digits = raw.get(1..15)?;
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let field = |range: std::ops::Range<usize>| digits.get(range)?.parse::<u32>().ok();
        let year = field(0..4)? as i32;
        let month = field(4..6)?;
        let day = field(6..8)?;
        let hour12 = field(8..10)?;
        let minute = field(10..12)?;
        let second = field(12..14)?;
        if !(1..=12).contains(&hour12) {
            return None;
        }
        let hour = match raw.get(15..17)? {
            "AM" => hour12 % 12,
            "PM" => hour12 % 12 + 12,
            _ => return None,
        };
        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
    }
}

impl Ord for BackupId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created_at()
            .cmp(&other.created_at())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for BackupId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BackupId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for BackupId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<BackupId> for String {
    fn from(id: BackupId) -> Self {
        id.0
    }
}

/// Sort ids newest first
pub fn sort_newest_first(ids: &mut [BackupId]) {
    ids.sort_by(|a, b| b.cmp(a));
}
