//! # Reading History and Time Windowing
//!
//! Upstream histories arrive as [`RawReading`]s whose timestamps may or may not
//! carry a zone. This module owns the single timezone policy of the crate:
//!
//! - **Internally everything is UTC.** A [`History`] only ever holds
//!   `DateTime<Utc>` readings.
//! - **Naive timestamps are localized once**, in the configured
//!   [`ReferenceZone`], when the history is built. The zone is a setting, not
//!   a guess: `UTC` is the default, `local` uses the host's zone, and a fixed
//!   offset such as `+05:30` pins it explicitly.
//! - **Display zones are a presentation concern.** Nothing here formats dates.
//!
//! A `History` is also validated on construction: readings must be in
//! chronological order and levels must be finite and non-negative. Windowing a
//! valid history always yields a valid history, so downstream code never
//! re-checks.

use crate::{RawReading, Reading, ReadingDate, SensitError};
use chrono::{DateTime, Duration, FixedOffset, Local, LocalResult, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Zone used to interpret naive upstream timestamps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReferenceZone {
    /// Treat naive timestamps as UTC
    #[default]
    Utc,
    /// Treat naive timestamps as the host's local zone (DST aware)
    Local,
    /// Treat naive timestamps as a fixed offset from UTC
    Fixed(FixedOffset),
}

impl ReferenceZone {
    /// Convert a naive timestamp to UTC.
    ///
    /// A time inside a DST fold resolves to the earlier instant. A time inside
    /// a DST gap cannot exist in this zone and is reported as a configuration
    /// error: the data was most likely produced in a different zone.
    pub fn localize(&self, naive: &NaiveDateTime) -> Result<DateTime<Utc>, SensitError> {
        let resolved = match self {
            ReferenceZone::Utc => return Ok(Utc.from_utc_datetime(naive)),
            ReferenceZone::Local => Local
                .from_local_datetime(naive)
                .map(|dt| dt.with_timezone(&Utc)),
            ReferenceZone::Fixed(offset) => offset
                .from_local_datetime(naive)
                .map(|dt| dt.with_timezone(&Utc)),
        };

        resolve_local(resolved, naive, self)
    }

    /// Convert any upstream timestamp to UTC.
    pub fn normalize(&self, date: &ReadingDate) -> Result<DateTime<Utc>, SensitError> {
        match date {
            ReadingDate::Naive(naive) => self.localize(naive),
            ReadingDate::Aware(aware) => Ok(aware.with_timezone(&Utc)),
        }
    }
}

impl FromStr for ReferenceZone {
    type Err = SensitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "utc" | "z" => return Ok(ReferenceZone::Utc),
            "local" => return Ok(ReferenceZone::Local),
            _ => {}
        }
        parse_offset(s)
            .map(ReferenceZone::Fixed)
            .ok_or_else(|| {
                SensitError::Configuration(format!(
                    "invalid timezone '{s}': expected UTC, local or an offset like +05:30"
                ))
            })
    }
}

impl TryFrom<String> for ReferenceZone {
    type Error = SensitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReferenceZone> for String {
    fn from(value: ReferenceZone) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ReferenceZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceZone::Utc => write!(f, "UTC"),
            ReferenceZone::Local => write!(f, "local"),
            ReferenceZone::Fixed(offset) => write!(f, "{offset}"),
        }
    }
}

/// Pick one instant for a localized time: earliest in a fold, error in a gap.
fn resolve_local(
    resolved: LocalResult<DateTime<Utc>>,
    naive: &NaiveDateTime,
    zone: &ReferenceZone,
) -> Result<DateTime<Utc>, SensitError> {
    match resolved {
        LocalResult::Single(dt) => Ok(dt),
        LocalResult::Ambiguous(earliest, latest) => Ok(earliest.min(latest)),
        LocalResult::None => Err(SensitError::Configuration(format!(
            "{naive} does not exist in zone {zone}"
        ))),
    }
}

/// Parse `+HH:MM`, `-HH:MM`, `+HHMM` or `+HH`.
fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Chronologically ordered, validated level history for one tank.
///
/// Equal timestamps are accepted (the sensor occasionally reports twice in the
/// same second); a reading dated before its predecessor is rejected.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Reading>", into = "Vec<Reading>")]
pub struct History {
    readings: Vec<Reading>,
}

impl History {
    /// Validate already normalized readings.
    pub fn new(readings: Vec<Reading>) -> Result<Self, SensitError> {
        for (index, reading) in readings.iter().enumerate() {
            if !reading.level_litres.is_finite() || reading.level_litres < 0.0 {
                return Err(SensitError::Data(format!(
                    "reading {index} has invalid level {}",
                    reading.level_litres
                )));
            }
        }

        if let Some(index) = readings
            .windows(2)
            .position(|pair| pair[1].reading_date < pair[0].reading_date)
        {
            return Err(SensitError::Data(format!(
                "reading {} at {} is older than the reading before it at {}",
                index + 1,
                readings[index + 1].reading_date,
                readings[index].reading_date
            )));
        }

        Ok(History { readings })
    }

    /// Normalize upstream readings into UTC using `zone`, then validate.
    pub fn from_raw(raw: &[RawReading], zone: &ReferenceZone) -> Result<Self, SensitError> {
        let readings = raw
            .iter()
            .map(|r| {
                Ok(Reading {
                    reading_date: zone.normalize(&r.reading_date)?,
                    level_litres: r.level_litres,
                })
            })
            .collect::<Result<Vec<_>, SensitError>>()?;

        Self::new(readings)
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Most recent reading, if any.
    pub fn last(&self) -> Option<&Reading> {
        self.readings.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Reading> {
        self.readings.iter()
    }
}

impl TryFrom<Vec<Reading>> for History {
    type Error = SensitError;

    fn try_from(readings: Vec<Reading>) -> Result<Self, Self::Error> {
        History::new(readings)
    }
}

impl From<History> for Vec<Reading> {
    fn from(history: History) -> Self {
        history.readings
    }
}

/// Keep only readings taken at or after `reference_time - window_days`.
///
/// The input is left untouched; an empty history yields an empty history.
pub fn window(history: &History, window_days: u32, reference_time: DateTime<Utc>) -> History {
    let cutoff = reference_time
        .checked_sub_signed(Duration::days(i64::from(window_days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    // A filtered subsequence of an ordered history is still ordered
    History {
        readings: history
            .readings
            .iter()
            .filter(|r| r.reading_date >= cutoff)
            .copied()
            .collect(),
    }
}
