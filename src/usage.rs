//! # Usage Rate Estimation and Empty-Date Forecasting
//!
//! Tank sensors report roughly once a day and the readings are noisy: a cold
//! snap, a sloshing float or a missed day all show up in the raw numbers.
//! Fitting a slope through that is fragile at this sampling scale, so the rate
//! is a plain mean of the level drops between consecutive readings.
//!
//! ## Refills
//! A delivery makes the level jump by hundreds of litres overnight. Any
//! transition where the level rises by at least `refill_threshold` (a ratio,
//! `1.1` by default) is treated as a refill and left out of the mean entirely.
//! When the previous level is zero the ratio is undefined; such a transition
//! only counts if the level did not rise.
//!
//! ## Forecast
//! Whole days until empty = `floor(latest level / rate)`. A zero rate gives a
//! zero forecast, which callers pair with
//! [`TankSnapshot::history_available`](crate::TankSnapshot) to tell "unknown"
//! apart from "empty".

use crate::history::{window, History};
use chrono::{DateTime, Utc};

/// Level ratio between consecutive readings treated as a refill
pub const DEFAULT_REFILL_THRESHOLD: f64 = 1.1;

/// Trailing window used for the usage rate, in days
pub const DEFAULT_USAGE_WINDOW_DAYS: u32 = 14;

/// Mean litres consumed per transition over non-refill transitions.
///
/// `history` should already be windowed. Returns `0.0` for fewer than two
/// readings or when every transition is a refill. The result is never
/// negative: a window made only of small top-ups below the refill threshold
/// shows no measurable consumption.
///
/// # Example
/// ```
/// use chrono::{Duration, TimeZone, Utc};
/// use tank_tracker_lib::{usage_rate, History, Reading};
///
/// let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 30, 0).unwrap();
/// let history = History::new(
///     (0..5)
///         .map(|day| Reading {
///             reading_date: start + Duration::days(day),
///             level_litres: 1000.0 - 40.0 * day as f64,
///         })
///         .collect(),
/// )
/// .unwrap();
///
/// assert_eq!(usage_rate(&history, 1.1), 40.0);
/// ```
pub fn usage_rate(history: &History, refill_threshold: f64) -> f64 {
    if history.len() < 2 {
        return 0.0;
    }

    let deltas: Vec<f64> = history
        .readings()
        .windows(2)
        .filter_map(|pair| {
            let (prev, curr) = (pair[0].level_litres, pair[1].level_litres);
            let refill = if prev == 0.0 {
                // Ratio undefined: only a non-increase counts as consumption
                curr > prev
            } else {
                curr / prev >= refill_threshold
            };
            (!refill).then_some(prev - curr)
        })
        .collect();

    if deltas.is_empty() {
        return 0.0;
    }

    let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
    mean.max(0.0)
}

/// Whole days until the tank is empty at the current usage rate.
///
/// Windows `history` itself, so callers pass the full history. Returns `0`
/// when the window is empty or the rate is zero; never divides by zero.
pub fn forecast_empty_days(
    history: &History,
    window_days: u32,
    refill_threshold: f64,
    reference_time: DateTime<Utc>,
) -> u32 {
    let windowed = window(history, window_days, reference_time);
    let Some(latest) = windowed.last() else {
        return 0;
    };

    let rate = usage_rate(&windowed, refill_threshold).abs();
    if rate == 0.0 {
        return 0;
    }

    // Float to int casts truncate toward zero and saturate
    (latest.level_litres / rate).floor() as u32
}
