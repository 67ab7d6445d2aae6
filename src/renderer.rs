//! # Terminal Report Rendering
//!
//! Renders tank snapshots as a plain-text report: one block of figures per
//! tank followed by an ASCII chart of the levels inside the usage window.
//! The same text is used for the `--once` CLI mode and for the periodic log
//! output of the long-running poller.

use crate::{GaugeLevel, TankSnapshot};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Chart height in text rows
const ROWS: usize = 10;
/// Space for Y-axis labels
const Y_AXIS_WIDTH: usize = 7;

/// What the report needs besides the snapshots themselves.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub window_days: u32,
    pub reference_time: DateTime<Utc>,
    /// Snapshots were retained from an earlier poll
    pub stale: bool,
    /// When the snapshots were built
    pub updated: Option<DateTime<Utc>>,
}

/// Unicode glyph standing in for the dashboard gauge icon
fn gauge_glyph(gauge: GaugeLevel) -> &'static str {
    match gauge {
        GaugeLevel::Full => "████",
        GaugeLevel::High => "███░",
        GaugeLevel::Low => "██░░",
        GaugeLevel::Empty => "█░░░",
    }
}

/// Format a litre figure with no decimals for whole numbers
fn format_litres(litres: f64) -> String {
    if litres.fract() == 0.0 {
        format!("{litres:.0}")
    } else {
        format!("{litres:.1}")
    }
}

/// Render the full report for every tank.
pub fn render_report(
    snapshots: &[TankSnapshot],
    consumption_kwh: &BTreeMap<String, f64>,
    options: &ReportOptions,
) -> String {
    let mut out = String::new();

    if options.stale {
        let since = options
            .updated
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let _ = writeln!(out, "⚠ STALE: showing data from {since}\n");
    }

    if snapshots.is_empty() {
        let _ = writeln!(out, "No tanks on this account");
        return out;
    }

    for snapshot in snapshots {
        render_tank(&mut out, snapshot, consumption_kwh.get(&snapshot.serial_number), options);
        out.push('\n');
    }
    out
}

fn render_tank(
    out: &mut String,
    snapshot: &TankSnapshot,
    consumption_kwh: Option<&f64>,
    options: &ReportOptions,
) {
    let _ = writeln!(
        out,
        "{} ({} {})",
        snapshot.name, snapshot.model, snapshot.serial_number
    );

    let percent = snapshot
        .percent_full()
        .map(|p| format!("{p:.1}%"))
        .unwrap_or_else(|| "?".to_string());
    let _ = writeln!(
        out,
        "  Oil level:      {} {} / {} l ({percent})",
        gauge_glyph(snapshot.gauge()),
        format_litres(snapshot.level),
        format_litres(snapshot.capacity),
    );
    let _ = writeln!(
        out,
        "  Last reading:   {}",
        snapshot.last_read.format("%Y-%m-%d %H:%M UTC")
    );

    if snapshot.history_available {
        let _ = writeln!(out, "  Current usage:  {:.1} l/day", snapshot.usage_rate);
        let _ = writeln!(out, "  Forecast empty: {} days", snapshot.forecast_empty_days);
    } else {
        let _ = writeln!(out, "  Usage and forecast unavailable");
    }

    if let Some(kwh) = consumption_kwh {
        let _ = writeln!(out, "  Consumption:    {kwh:.1} kWh");
    }

    let windowed = snapshot.windowed_history(options.window_days, options.reference_time);
    let levels: Vec<f64> = windowed.iter().map(|r| r.level_litres).collect();
    if levels.len() >= 2 {
        out.push('\n');
        render_chart(out, &levels, snapshot.capacity, options.window_days);
    }
}

/// Plot levels against a 0..capacity axis, latest reading marked with `X`.
fn render_chart(out: &mut String, levels: &[f64], capacity: f64, window_days: u32) {
    let top = levels.iter().copied().fold(capacity, f64::max).max(1.0);

    let level_to_row = |level: f64| {
        let normalized = (level / top).clamp(0.0, 1.0);
        ((1.0 - normalized) * (ROWS as f64 - 1.0)).round() as usize
    };

    let mut grid = vec![vec![' '; levels.len() + Y_AXIS_WIDTH]; ROWS];

    // Y-axis labels at full, half and empty
    for fraction in [1.0, 0.5, 0.0] {
        let row = level_to_row(top * fraction);
        let label = format!("{:>width$}", format_litres(top * fraction), width = Y_AXIS_WIDTH - 2);
        for (i, ch) in label.chars().enumerate().take(Y_AXIS_WIDTH - 2) {
            grid[row][i] = ch;
        }
    }
    for row in grid.iter_mut() {
        row[Y_AXIS_WIDTH - 1] = '│';
    }

    let latest = levels.len() - 1;
    for (column, &level) in levels.iter().enumerate() {
        let glyph = if column == latest { 'X' } else { '•' };
        grid[level_to_row(level)][column + Y_AXIS_WIDTH] = glyph;
    }

    for row in grid {
        let _ = writeln!(out, "{}", row.into_iter().collect::<String>().trim_end());
    }

    let padding = " ".repeat(Y_AXIS_WIDTH);
    let left = format!("-{window_days}d");
    let right = "now";
    let gap = levels.len().saturating_sub(left.len() + right.len());
    let _ = writeln!(out, "{padding}{left}{}{right}", " ".repeat(gap));
}

/// Print the report to stdout.
pub fn draw_ascii(
    snapshots: &[TankSnapshot],
    consumption_kwh: &BTreeMap<String, f64>,
    options: &ReportOptions,
) {
    print!("{}", render_report(snapshots, consumption_kwh, options));
}
