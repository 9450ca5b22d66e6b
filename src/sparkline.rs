//! Token-usage sparkline: time windows, percentile tiers, terminal rendering.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};

use crate::model::SparklinePoint;

/// Time range applied to already-fetched points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    Hour,
    Day,
    Week,
    Month,
    All,
    /// Inclusive range of local calendar dates, `from..to`.
    Custom { from: NaiveDate, to: NaiveDate },
}

impl TimeWindow {
    /// The range name the backend's sparkline endpoint accepts.
    pub fn api_range(&self) -> &'static str {
        match self {
            TimeWindow::Hour => "1h",
            TimeWindow::Day => "24h",
            TimeWindow::Week => "7d",
            TimeWindow::Month => "30d",
            TimeWindow::All | TimeWindow::Custom { .. } => "all",
        }
    }

    /// Whether `ts` falls inside this window as seen at `now`.
    pub fn contains(&self, ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let since = |d: Duration| ts >= now - d && ts <= now;
        match self {
            TimeWindow::Hour => since(Duration::hours(1)),
            TimeWindow::Day => since(Duration::hours(24)),
            TimeWindow::Week => since(Duration::days(7)),
            TimeWindow::Month => since(Duration::days(30)),
            TimeWindow::All => true,
            TimeWindow::Custom { from, to } => {
                let day = ts.with_timezone(&Local).date_naive();
                day >= *from && day <= *to
            }
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeWindow::Custom { from, to } => write!(f, "{from}..{to}"),
            other => f.write_str(other.api_range()),
        }
    }
}

impl FromStr for TimeWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(TimeWindow::Hour),
            "24h" => Ok(TimeWindow::Day),
            "7d" => Ok(TimeWindow::Week),
            "30d" => Ok(TimeWindow::Month),
            "all" => Ok(TimeWindow::All),
            custom => {
                let (from, to) = custom
                    .split_once("..")
                    .ok_or_else(|| {
                        format!("unknown range '{s}' (expected 1h, 24h, 7d, 30d, all or FROM..TO)")
                    })?;
                let parse = |d: &str| {
                    NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d")
                        .map_err(|e| format!("invalid date '{d}': {e}"))
                };
                let (from, to) = (parse(from)?, parse(to)?);
                if from > to {
                    return Err(format!("range start {from} is after end {to}"));
                }
                Ok(TimeWindow::Custom { from, to })
            }
        }
    }
}

/// Points inside `window`, in timestamp order.
pub fn filter(
    points: &[SparklinePoint],
    window: TimeWindow,
    now: DateTime<Utc>,
) -> Vec<SparklinePoint> {
    let mut kept: Vec<SparklinePoint> = points
        .iter()
        .filter(|p| window.contains(p.timestamp, now))
        .cloned()
        .collect();
    kept.sort_by_key(|p| p.timestamp);
    kept
}

/// Percentile tier (1..=4) of each value.
///
/// Thresholds are the sorted values at ranks `n/4`, `n/2` and `3n/4`
/// (rounded down). A value at or above a threshold takes that tier. The
/// smallest value is always tier 1, so a flat series stays at the bottom.
pub fn tiers(values: &[u64]) -> Vec<u8> {
    if values.is_empty() {
        return Vec::new();
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();
    let at = |q: usize| sorted[(n * q / 4).min(n - 1)];
    let (min, p25, p50, p75) = (sorted[0], at(1), at(2), at(3));

    values
        .iter()
        .map(|&v| {
            if v == min {
                1
            } else if v >= p75 {
                4
            } else if v >= p50 {
                3
            } else if v >= p25 {
                2
            } else {
                1
            }
        })
        .collect()
}

const GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
const TIER_COLORS: [&str; 4] = ["\x1b[2;37m", "\x1b[32m", "\x1b[33m", "\x1b[31m"];
const RESET: &str = "\x1b[0m";

/// Height glyph of each value relative to the maximum.
#[allow(clippy::cast_possible_truncation)]
pub fn glyphs(values: &[u64]) -> Vec<char> {
    let max = values.iter().copied().max().unwrap_or(0);
    values
        .iter()
        .map(|&v| {
            if max == 0 {
                GLYPHS[0]
            } else {
                let idx = (u128::from(v) * 7 / u128::from(max)) as usize;
                GLYPHS[idx.min(7)]
            }
        })
        .collect()
}

/// Render a one-line sparkline, coloured by tier when `color` is set.
pub fn render(values: &[u64], color: bool) -> String {
    let glyphs = glyphs(values);
    if !color {
        return glyphs.into_iter().collect();
    }
    let mut out = String::new();
    for (glyph, tier) in glyphs.into_iter().zip(tiers(values)) {
        out.push_str(TIER_COLORS[usize::from(tier.saturating_sub(1)).min(3)]);
        out.push(glyph);
    }
    if !out.is_empty() {
        out.push_str(RESET);
    }
    out
}
