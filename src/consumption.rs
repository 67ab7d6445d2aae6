//! # Cumulative Oil Consumption
//!
//! Energy dashboards want a monotonically increasing kWh total. The tank
//! itself only reports levels, so the total is accumulated here, one poll at a
//! time, from the usage rate of consecutive snapshots:
//!
//! ```text
//! kWh added = usage_rate (l/day) × time since last poll (days) × energy density (kWh/l)
//! ```
//!
//! The meter is a small explicit state machine owned by the caller. It starts
//! `Unset`, becomes `Counting` on the first accepted snapshot (or when restored
//! from a saved total), and only ever grows.

use crate::TankSnapshot;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Typical energy content of kerosene heating oil, kWh per litre
pub const DEFAULT_OIL_ENERGY_DENSITY: f64 = 9.8;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum MeterState {
    /// Nothing recorded or restored yet
    Unset,
    /// Running total in kWh
    Counting(f64),
}

/// Accumulates kWh burned by one tank across polls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionMeter {
    state: MeterState,
    energy_density: f64,
}

impl ConsumptionMeter {
    pub fn new(energy_density: f64) -> Self {
        ConsumptionMeter {
            state: MeterState::Unset,
            energy_density,
        }
    }

    /// Resume from a previously saved state value.
    ///
    /// Values such as `"unavailable"`, `"unknown"`, negative or unparsable
    /// numbers start a fresh meter instead of failing.
    pub fn restore(energy_density: f64, saved: &str) -> Self {
        let state = match saved.trim().parse::<f64>() {
            Ok(total) if total.is_finite() && total >= 0.0 => MeterState::Counting(total),
            _ => {
                tracing::debug!(saved, "Ignoring unusable saved consumption state");
                MeterState::Unset
            }
        };
        ConsumptionMeter {
            state,
            energy_density,
        }
    }

    pub fn state(&self) -> MeterState {
        self.state
    }

    /// Total kWh, `None` until the first snapshot has been recorded.
    pub fn total_kwh(&self) -> Option<f64> {
        match self.state {
            MeterState::Unset => None,
            MeterState::Counting(total) => Some(total),
        }
    }

    /// Add the energy burned over `interval` and return the increment.
    ///
    /// A snapshot without usable history adds nothing but still starts the
    /// meter, so the total reads `0.0` rather than unknown.
    pub fn record(&mut self, snapshot: &TankSnapshot, interval: Duration) -> f64 {
        let added = if snapshot.history_available {
            let days = interval.as_secs_f64() / SECONDS_PER_DAY;
            snapshot.usage_rate.max(0.0) * days * self.energy_density
        } else {
            0.0
        };

        let total = self.total_kwh().unwrap_or(0.0) + added;
        self.state = MeterState::Counting(total);

        tracing::debug!(
            serial_number = %snapshot.serial_number,
            added_kwh = added,
            total_kwh = total,
            "Oil consumption updated"
        );
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::History;
    use chrono::{TimeZone, Utc};

    fn snapshot(usage_rate: f64, history_available: bool) -> TankSnapshot {
        TankSnapshot {
            serial_number: "20001234".to_string(),
            model: "Acme Tank".to_string(),
            name: "Tank".to_string(),
            level: 1000.0,
            capacity: 2000.0,
            last_read: Utc.with_ymd_and_hms(2024, 3, 20, 0, 30, 0).unwrap(),
            history: History::default(),
            usage_rate,
            forecast_empty_days: 0,
            history_available,
        }
    }

    const EIGHT_HOURS: Duration = Duration::from_secs(8 * 3600);

    #[test]
    fn test_meter_accumulates_per_interval() {
        let mut meter = ConsumptionMeter::new(DEFAULT_OIL_ENERGY_DENSITY);
        assert_eq!(meter.total_kwh(), None);

        // 24 l/day over 8 hours is 8 litres
        let added = meter.record(&snapshot(24.0, true), EIGHT_HOURS);
        assert!((added - 8.0 * 9.8).abs() < 1e-9);

        meter.record(&snapshot(24.0, true), EIGHT_HOURS);
        assert!((meter.total_kwh().unwrap() - 16.0 * 9.8).abs() < 1e-9);
    }

    #[test]
    fn test_meter_restores_saved_total() {
        let mut meter = ConsumptionMeter::restore(DEFAULT_OIL_ENERGY_DENSITY, "1234.5");
        assert_eq!(meter.state(), MeterState::Counting(1234.5));

        meter.record(&snapshot(24.0, true), EIGHT_HOURS);
        assert!((meter.total_kwh().unwrap() - (1234.5 + 78.4)).abs() < 1e-9);
    }

    #[test]
    fn test_meter_ignores_unavailable_state() {
        for saved in ["unavailable", "unknown", "", "-3", "NaN"] {
            let meter = ConsumptionMeter::restore(DEFAULT_OIL_ENERGY_DENSITY, saved);
            assert_eq!(meter.state(), MeterState::Unset, "saved={saved}");
        }
    }

    #[test]
    fn test_no_history_adds_nothing_but_starts_meter() {
        let mut meter = ConsumptionMeter::new(DEFAULT_OIL_ENERGY_DENSITY);
        assert_eq!(meter.record(&snapshot(0.0, false), EIGHT_HOURS), 0.0);
        assert_eq!(meter.total_kwh(), Some(0.0));
    }

    #[test]
    fn test_meter_never_decreases() {
        let mut meter = ConsumptionMeter::restore(DEFAULT_OIL_ENERGY_DENSITY, "10");
        meter.record(&snapshot(-5.0, true), EIGHT_HOURS);
        assert_eq!(meter.total_kwh(), Some(10.0));
    }
}
