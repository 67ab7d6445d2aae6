//! # Per-Poll Tank Snapshots
//!
//! A [`TankSnapshot`] is everything known about one tank after one poll. It is
//! built in a single step from the upstream [`TankRecord`] and never changed
//! afterwards; the next poll builds a new one. State that has to survive
//! between polls (cumulative consumption, the last good data) lives with the
//! caller, see [`crate::consumption`] and [`crate::coordinator`].

use crate::history::{window, History, ReferenceZone};
use crate::usage::{
    forecast_empty_days, usage_rate, DEFAULT_REFILL_THRESHOLD, DEFAULT_USAGE_WINDOW_DAYS,
};
use crate::{SensitError, TankRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Parameters of the usage computation, supplied on every poll.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSettings {
    /// Trailing window in days (must be positive)
    pub window_days: u32,
    /// Level ratio treated as a refill (must be above 1.0)
    pub refill_threshold: f64,
    /// Zone used for naive upstream timestamps
    pub timezone: ReferenceZone,
}

impl Default for UsageSettings {
    fn default() -> Self {
        UsageSettings {
            window_days: DEFAULT_USAGE_WINDOW_DAYS,
            refill_threshold: DEFAULT_REFILL_THRESHOLD,
            timezone: ReferenceZone::Utc,
        }
    }
}

impl UsageSettings {
    pub fn validate(&self) -> Result<(), SensitError> {
        if self.window_days == 0 {
            return Err(SensitError::Configuration(
                "usage window must be at least one day".to_string(),
            ));
        }
        if !self.refill_threshold.is_finite() || self.refill_threshold <= 1.0 {
            return Err(SensitError::Configuration(format!(
                "refill threshold must be greater than 1.0, got {}",
                self.refill_threshold
            )));
        }
        Ok(())
    }
}

/// Coarse fill state, used to pick a gauge icon or glyph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GaugeLevel {
    /// At least 75% full
    Full,
    /// At least 50% full
    High,
    /// At least 25% full
    Low,
    /// Below 25%, or capacity unknown
    Empty,
}

impl GaugeLevel {
    pub fn from_fraction(fraction: f64) -> Self {
        if fraction >= 0.75 {
            GaugeLevel::Full
        } else if fraction >= 0.5 {
            GaugeLevel::High
        } else if fraction >= 0.25 {
            GaugeLevel::Low
        } else {
            GaugeLevel::Empty
        }
    }

    /// Material Design icon name used by home automation dashboards
    pub fn icon(&self) -> &'static str {
        match self {
            GaugeLevel::Full => "mdi:gauge-full",
            GaugeLevel::High => "mdi:gauge",
            GaugeLevel::Low => "mdi:gauge-low",
            GaugeLevel::Empty => "mdi:gauge-empty",
        }
    }
}

/// One tank after processing, immutable for the lifetime of a poll.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TankSnapshot {
    pub serial_number: String,
    pub model: String,
    /// Display name, suffixed with ` #n` when several tanks share a name
    pub name: String,
    /// Current level in litres
    pub level: f64,
    /// Capacity in litres
    pub capacity: f64,
    pub last_read: DateTime<Utc>,
    /// Full normalized history as delivered this poll
    pub history: History,
    /// Mean litres/day over the usage window, refills excluded
    pub usage_rate: f64,
    /// Whole days until empty, `0` when unknown
    pub forecast_empty_days: u32,
    /// False when the usage window holds no readings at all
    pub history_available: bool,
}

impl TankSnapshot {
    /// Run window, estimate and forecast for one tank.
    ///
    /// Fails only when the record itself is malformed; degenerate histories
    /// produce zero figures with `history_available == false`.
    pub fn from_record(
        record: TankRecord,
        settings: &UsageSettings,
        reference_time: DateTime<Utc>,
    ) -> Result<Self, SensitError> {
        let history = History::from_raw(&record.history, &settings.timezone)?;
        let last_read = settings.timezone.normalize(&record.last_read)?;

        let windowed = window(&history, settings.window_days, reference_time);
        let history_available = !windowed.is_empty();

        let (usage_rate, forecast_empty_days) = if history.is_empty() {
            tracing::warn!(
                serial_number = %record.serial_number,
                "No history: usage and forecast unavailable"
            );
            (0.0, 0)
        } else if !history_available {
            tracing::warn!(
                serial_number = %record.serial_number,
                window_days = settings.window_days,
                "No readings inside usage window: usage and forecast unavailable"
            );
            (0.0, 0)
        } else {
            (
                usage_rate(&windowed, settings.refill_threshold),
                forecast_empty_days(
                    &history,
                    settings.window_days,
                    settings.refill_threshold,
                    reference_time,
                ),
            )
        };

        let snapshot = TankSnapshot {
            serial_number: record.serial_number,
            model: record.model,
            name: record.name,
            level: record.level,
            capacity: record.capacity,
            last_read,
            history,
            usage_rate,
            forecast_empty_days,
            history_available,
        };

        tracing::debug!(
            level = snapshot.level,
            capacity = snapshot.capacity,
            serial_number = %snapshot.serial_number,
            last_read = %snapshot.last_read,
            usage_rate = snapshot.usage_rate,
            forecast_empty = snapshot.forecast_empty_days,
            "Tank data for '{}'",
            snapshot.name
        );

        Ok(snapshot)
    }

    /// Percentage full to one decimal place, `None` for an unknown capacity.
    pub fn percent_full(&self) -> Option<f64> {
        if self.capacity <= 0.0 {
            return None;
        }
        Some((1000.0 * self.level / self.capacity).round() / 10.0)
    }

    pub fn gauge(&self) -> GaugeLevel {
        if self.capacity <= 0.0 {
            return GaugeLevel::Empty;
        }
        GaugeLevel::from_fraction(self.level / self.capacity)
    }

    /// Readings inside the usage window, for charts.
    pub fn windowed_history(&self, window_days: u32, reference_time: DateTime<Utc>) -> History {
        window(&self.history, window_days, reference_time)
    }
}

/// Build snapshots for every tank on the account.
///
/// Any malformed record fails the whole batch so that a poll is either
/// entirely fresh or entirely rejected.
pub fn build_snapshots(
    records: Vec<TankRecord>,
    settings: &UsageSettings,
    reference_time: DateTime<Utc>,
) -> Result<Vec<TankSnapshot>, SensitError> {
    let mut snapshots = records
        .into_iter()
        .map(|record| TankSnapshot::from_record(record, settings, reference_time))
        .collect::<Result<Vec<_>, _>>()?;

    disambiguate_names(&mut snapshots);
    Ok(snapshots)
}

/// Suffix ` #1`, ` #2`, ... onto names shared by more than one tank.
///
/// A suffix that would collide with another tank's own name is skipped.
fn disambiguate_names(snapshots: &mut [TankSnapshot]) {
    let mut totals: HashMap<String, usize> = HashMap::new();
    for snapshot in snapshots.iter() {
        *totals.entry(snapshot.name.clone()).or_default() += 1;
    }

    let mut taken: HashSet<String> = totals.keys().cloned().collect();
    let mut next_index: HashMap<String, usize> = HashMap::new();
    for snapshot in snapshots.iter_mut() {
        if totals[&snapshot.name] < 2 {
            continue;
        }
        let index = next_index.entry(snapshot.name.clone()).or_default();
        let unique = loop {
            *index += 1;
            let candidate = format!("{} #{}", snapshot.name, index);
            if !taken.contains(&candidate) {
                break candidate;
            }
        };
        taken.insert(unique.clone());
        snapshot.name = unique;
    }
}
