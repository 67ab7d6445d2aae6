//! # Tank Tracker Core Library
//!
//! This library turns the raw, irregularly sampled level history of a remote
//! oil tank sensor into the figures a home owner actually wants to see: how
//! much oil is left, how fast it is being burned, and how many days remain
//! before the tank runs dry.
//!
//! ## Design Philosophy
//!
//! ### Pure Core
//! - **No hidden state**: windowing, rate estimation and forecasting are plain
//!   functions over an immutable [`History`]. Every poll starts from scratch.
//! - **Typed timestamps**: upstream data may carry naive (zone-less) or
//!   offset-aware dates. They arrive as [`ReadingDate`] and are normalized to
//!   UTC exactly once, so naive and aware values can never be compared.
//! - **Zero sentinels, not errors**: an empty history or a zero usage rate
//!   yields `0` plus [`TankSnapshot::history_available`], never a panic.
//!
//! ### Data Flow
//! 1. **Fetch**: a [`source::TankSource`] yields one [`TankRecord`] per tank
//! 2. **Normalize**: raw readings → validated UTC [`History`]
//! 3. **Window**: trailing `window_days` of history
//! 4. **Estimate**: mean depletion per transition, refills excluded
//! 5. **Forecast**: whole days until empty at that rate
//! 6. **Snapshot**: one immutable [`TankSnapshot`] per tank per poll
//!
//! ## Core Types
//! - [`Reading`]: a UTC timestamped level sample
//! - [`RawReading`]: a sample as delivered upstream
//! - [`TankRecord`]: one tank as delivered upstream
//! - [`TankSnapshot`]: one tank after processing

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Module declarations
pub mod config;
pub mod consumption;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod renderer;
pub mod snapshot;
pub mod source;
pub mod state;
pub mod usage;

#[cfg(test)]
mod tests;

pub use error::SensitError;
pub use history::{window, History, ReferenceZone};
pub use snapshot::{GaugeLevel, TankSnapshot, UsageSettings};
pub use usage::{forecast_empty_days, usage_rate};

/// A single level sample with a UTC timestamp.
///
/// Readings only exist inside a validated [`History`], so the timestamp has
/// already been through the zone policy of [`ReferenceZone`].
///
/// # Example
/// ```
/// use chrono::{TimeZone, Utc};
/// use tank_tracker_lib::Reading;
///
/// let reading = Reading {
///     reading_date: Utc.with_ymd_and_hms(2024, 3, 20, 0, 30, 0).unwrap(),
///     level_litres: 1000.0,
/// };
/// assert_eq!(reading.level_litres, 1000.0);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// When the sensor took the sample
    pub reading_date: DateTime<Utc>,
    /// Oil in the tank, in litres
    pub level_litres: f64,
}

/// Timestamp as delivered by the cloud service.
///
/// The service has historically returned naive local times, while other
/// exports carry an explicit offset. Keeping the two apart in the type system
/// forces every naive value through [`ReferenceZone::localize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReadingDate {
    /// No zone information, e.g. `2024-03-20T00:30:00`
    Naive(NaiveDateTime),
    /// Explicit offset, e.g. `2024-03-20T00:30:00+01:00`
    Aware(DateTime<FixedOffset>),
}

impl FromStr for ReadingDate {
    type Err = SensitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(aware) = DateTime::parse_from_rfc3339(s) {
            return Ok(ReadingDate::Aware(aware));
        }
        NaiveDateTime::from_str(s)
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
            .map(ReadingDate::Naive)
            .map_err(|e| SensitError::Data(format!("invalid reading date '{s}': {e}")))
    }
}

impl TryFrom<String> for ReadingDate {
    type Error = SensitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReadingDate> for String {
    fn from(value: ReadingDate) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ReadingDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingDate::Naive(naive) => write!(f, "{}", naive.format("%Y-%m-%dT%H:%M:%S%.f")),
            ReadingDate::Aware(aware) => write!(f, "{}", aware.to_rfc3339()),
        }
    }
}

/// A history sample exactly as the upstream service reports it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub reading_date: ReadingDate,
    pub level_litres: f64,
}

/// One tank as returned by a [`source::TankSource`].
///
/// This is the input contract of the core: scalar attributes plus the full
/// reading history in chronological order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TankRecord {
    /// Current level in litres
    pub level: f64,
    pub serial_number: String,
    pub model: String,
    /// Display name chosen by the owner in the vendor app
    pub name: String,
    /// Usable capacity in litres
    pub capacity: f64,
    /// Timestamp of the most recent reading
    pub last_read: ReadingDate,
    /// Chronological level history, oldest first
    #[serde(default)]
    pub history: Vec<RawReading>,
}
