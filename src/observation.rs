//! Raw daily point observations and the request windows used to fetch them.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Days of history fetched ahead of an inference target date.
pub const INFERENCE_LOOKBACK_DAYS: u64 = 10;

/// Reference point used when a request carries no coordinates (Mérida, Yucatán).
pub const DEFAULT_POINT: GeoPoint = GeoPoint {
    lat: 20.9674,
    lon: -89.5926,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// One day of upstream weather at a fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub date: NaiveDate,
    /// Mean air temperature, °C.
    pub t2m_c: f64,
    /// Daily precipitation total, mm.
    pub precip: f64,
    /// Mean wind speed, m/s.
    pub ws: f64,
    /// Relative humidity, percent.
    pub rh: f64,
}

/// Raw observations held in ascending date order.
///
/// Gaps in the calendar are kept as-is; nothing is filled in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    rows: Vec<RawObservation>,
}

impl RawTable {
    pub fn new(mut rows: Vec<RawObservation>) -> Self {
        rows.sort_by_key(|row| row.date);
        Self { rows }
    }

    pub fn rows(&self) -> &[RawObservation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.first().map(|row| row.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.last().map(|row| row.date)
    }

    /// Number of calendar days missing between the first and last row.
    pub fn calendar_gap_days(&self) -> u64 {
        self.rows
            .windows(2)
            .map(|pair| {
                let delta = (pair[1].date - pair[0].date).num_days();
                delta.saturating_sub(1).max(0) as u64
            })
            .sum()
    }
}

impl From<Vec<RawObservation>> for RawTable {
    fn from(rows: Vec<RawObservation>) -> Self {
        Self::new(rows)
    }
}

/// Inclusive calendar range of an upstream fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Window fetched to score `target`: the ten days before it through `target` itself.
pub fn inference_window(target: NaiveDate) -> DateWindow {
    let start = target
        .checked_sub_days(Days::new(INFERENCE_LOOKBACK_DAYS))
        .unwrap_or(NaiveDate::MIN);
    DateWindow::new(start, target)
}
