//! Shared raw-observations-to-features transform.
//!
//! Training and serving both go through [`derive_features`]; the column order in
//! [`FEATURE_COLUMNS`] is the contract a trained bundle is fitted against.

use std::collections::VecDeque;
use std::f64::consts::PI;
use std::fmt;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::observation::{RawObservation, RawTable};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

pub const FEATURE_COLUMNS: [&str; 12] = [
    "t2m_c",
    "precip",
    "ws",
    "rh",
    "t_lag1",
    "t_lag2",
    "precip_3d",
    "precip_7d",
    "ws_lag1",
    "sin_doy",
    "cos_doy",
    "heat_index",
];

pub const PRECIP_SHORT_WINDOW: usize = 3;
pub const PRECIP_LONG_WINDOW: usize = 7;

const TEMP_LAG_DEPTH: usize = 2;
const DAYS_PER_YEAR: f64 = 365.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardLabel {
    VeryHot,
    VeryCold,
    VeryWindy,
    VeryWet,
    VeryUncomfortable,
}

impl HazardLabel {
    pub const ALL: [HazardLabel; 5] = [
        HazardLabel::VeryHot,
        HazardLabel::VeryCold,
        HazardLabel::VeryWindy,
        HazardLabel::VeryWet,
        HazardLabel::VeryUncomfortable,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::VeryHot => "very_hot",
            Self::VeryCold => "very_cold",
            Self::VeryWindy => "very_windy",
            Self::VeryWet => "very_wet",
            Self::VeryUncomfortable => "very_uncomfortable",
        }
    }
}

impl fmt::Display for HazardLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How lag and rolling windows find their neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WindowMode {
    /// Neighbours are the previous rows of the sorted table, whatever their dates.
    /// A missing day silently joins the rows on either side of it.
    #[default]
    Positional,
    /// Neighbours are matched by calendar date; a lag whose day is missing is undefined
    /// and rolling sums only cover rows inside the trailing calendar span.
    CalendarAware,
}

/// Cut-offs turning a derived row into hazard labels. All comparisons are strict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelThresholds {
    pub hot_above_c: f64,
    pub cold_below_c: f64,
    pub windy_above_ms: f64,
    pub wet_precip_3d_above_mm: f64,
    pub uncomfortable_temp_above_c: f64,
    pub uncomfortable_rh_above_pct: f64,
    pub uncomfortable_heat_index_above: f64,
}

impl Default for LabelThresholds {
    fn default() -> Self {
        Self {
            hot_above_c: 35.0,
            cold_below_c: 0.0,
            windy_above_ms: 10.0,
            wet_precip_3d_above_mm: 5.0,
            uncomfortable_temp_above_c: 30.0,
            uncomfortable_rh_above_pct: 80.0,
            uncomfortable_heat_index_above: 40.0,
        }
    }
}

impl LabelThresholds {
    pub fn classify(&self, row: &LabelInputs) -> HazardLabels {
        let muggy = row.t2m_c > self.uncomfortable_temp_above_c
            && row.rh > self.uncomfortable_rh_above_pct;
        HazardLabels {
            very_hot: flag(row.t2m_c > self.hot_above_c),
            very_cold: flag(row.t2m_c < self.cold_below_c),
            very_windy: flag(row.ws > self.windy_above_ms),
            very_wet: flag(row.precip_3d > self.wet_precip_3d_above_mm),
            very_uncomfortable: flag(
                muggy || row.heat_index > self.uncomfortable_heat_index_above,
            ),
        }
    }

    fn as_array(&self) -> [f64; 7] {
        [
            self.hot_above_c,
            self.cold_below_c,
            self.windy_above_ms,
            self.wet_precip_3d_above_mm,
            self.uncomfortable_temp_above_c,
            self.uncomfortable_rh_above_pct,
            self.uncomfortable_heat_index_above,
        ]
    }
}

/// Fields the label thresholds look at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelInputs {
    pub t2m_c: f64,
    pub ws: f64,
    pub rh: f64,
    pub precip_3d: f64,
    pub heat_index: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HazardLabels {
    pub very_hot: u8,
    pub very_cold: u8,
    pub very_windy: u8,
    pub very_wet: u8,
    pub very_uncomfortable: u8,
}

impl HazardLabels {
    pub fn get(&self, label: HazardLabel) -> u8 {
        match label {
            HazardLabel::VeryHot => self.very_hot,
            HazardLabel::VeryCold => self.very_cold,
            HazardLabel::VeryWindy => self.very_windy,
            HazardLabel::VeryWet => self.very_wet,
            HazardLabel::VeryUncomfortable => self.very_uncomfortable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub window_mode: WindowMode,
    pub thresholds: LabelThresholds,
    pub schema_version: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window_mode: WindowMode::Positional,
            thresholds: LabelThresholds::default(),
            schema_version: FEATURE_SCHEMA_VERSION,
        }
    }
}

impl FeatureConfig {
    pub fn with_window_mode(window_mode: WindowMode) -> Self {
        Self {
            window_mode,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), FeatureError> {
        if self.schema_version != FEATURE_SCHEMA_VERSION {
            return Err(FeatureError::InvalidConfig(format!(
                "schema_version must equal FEATURE_SCHEMA_VERSION ({FEATURE_SCHEMA_VERSION})"
            )));
        }
        if self.thresholds.as_array().iter().any(|v| !v.is_finite()) {
            return Err(FeatureError::InvalidConfig(
                "label thresholds must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    F64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
    pub labels: Vec<HazardLabel>,
}

impl FeatureSchema {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|column| column.name == name)
    }
}

/// One derived day. Exists only when every lag and window had enough history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub t2m_c: f64,
    pub precip: f64,
    pub ws: f64,
    pub rh: f64,
    pub t_lag1: f64,
    pub t_lag2: f64,
    pub precip_3d: f64,
    pub precip_7d: f64,
    pub ws_lag1: f64,
    pub sin_doy: f64,
    pub cos_doy: f64,
    pub heat_index: f64,
    pub labels: HazardLabels,
}

impl FeatureRow {
    /// Feature values in [`FEATURE_COLUMNS`] order.
    pub fn feature_values(&self) -> [f64; 12] {
        [
            self.t2m_c,
            self.precip,
            self.ws,
            self.rh,
            self.t_lag1,
            self.t_lag2,
            self.precip_3d,
            self.precip_7d,
            self.ws_lag1,
            self.sin_doy,
            self.cos_doy,
            self.heat_index,
        ]
    }

    pub fn value(&self, column: &str) -> Option<f64> {
        FEATURE_COLUMNS
            .iter()
            .position(|name| *name == column)
            .map(|idx| self.feature_values()[idx])
    }

    /// Lays the row out in the order a scorer was fitted with.
    pub fn project(&self, columns: &[String]) -> Result<Vec<f64>, FeatureError> {
        columns
            .iter()
            .map(|name| {
                self.value(name)
                    .ok_or_else(|| FeatureError::UnknownColumn(name.clone()))
            })
            .collect()
    }

    pub fn label(&self, label: HazardLabel) -> u8 {
        self.labels.get(label)
    }
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("invalid feature config: {0}")]
    InvalidConfig(String),
    #[error("unknown feature column: {0}")]
    UnknownColumn(String),
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

/// Simplified apparent temperature: `T + 0.33 * (RH / 100) * e`, with
/// `e = 6.105 * exp(17.27 * T / (237.7 + T))`. Not the Steadman heat index.
pub fn heat_index(t_c: f64, rh_pct: f64) -> f64 {
    let vapour = 6.105 * (17.27 * t_c / (237.7 + t_c)).exp();
    t_c + 0.33 * (rh_pct / 100.0) * vapour
}

/// `(sin, cos)` of `2π · day_of_year / 365.25`, with day of year in `1..=366`.
pub fn day_of_year_encoding(date: NaiveDate) -> (f64, f64) {
    let angle = 2.0 * PI * date.ordinal() as f64 / DAYS_PER_YEAR;
    (angle.sin(), angle.cos())
}

pub fn build_feature_schema(cfg: &FeatureConfig) -> FeatureSchema {
    let columns: Vec<FeatureColumn> = FEATURE_COLUMNS
        .iter()
        .map(|name| FeatureColumn {
            name: (*name).to_string(),
            dtype: FeatureDType::F64,
        })
        .collect();
    let labels = HazardLabel::ALL.to_vec();
    let fingerprint = schema_fingerprint(cfg, &columns, &labels);

    debug!(
        component = "features",
        event = "features.schema.built",
        version = cfg.schema_version,
        window_mode = ?cfg.window_mode,
        column_count = columns.len(),
        fingerprint = fingerprint
    );

    FeatureSchema {
        version: cfg.schema_version,
        fingerprint,
        columns,
        labels,
    }
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), FeatureError> {
    if expected_version != actual.version {
        return Err(FeatureError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(FeatureError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

/// Turns raw daily rows (any order) into feature rows in ascending date order.
///
/// Rows without two prior temperatures are dropped, so the first two rows of any table
/// never appear in the output and a table shorter than three rows yields nothing. Rows
/// with any NaN feature are dropped as well; rolling sums skip NaN inputs.
pub fn derive_features(raw: &[RawObservation], cfg: &FeatureConfig) -> Vec<FeatureRow> {
    let table = RawTable::new(raw.to_vec());

    let mut rolling = DailyRolling::new(cfg.window_mode, PRECIP_LONG_WINDOW);
    let mut out = Vec::with_capacity(table.len().saturating_sub(TEMP_LAG_DEPTH));

    for obs in table.rows() {
        rolling.push(*obs);
        if let Some(row) = derive_row(&rolling, obs, cfg) {
            out.push(row);
        }
    }

    info!(
        component = "features",
        event = "features.derive.finish",
        window_mode = ?cfg.window_mode,
        input_rows = table.len(),
        output_rows = out.len(),
        dropped_rows = table.len() - out.len(),
        calendar_gap_days = table.calendar_gap_days()
    );

    out
}

fn derive_row(
    rolling: &DailyRolling,
    obs: &RawObservation,
    cfg: &FeatureConfig,
) -> Option<FeatureRow> {
    let t_lag1 = rolling.lag(1, |o| o.t2m_c)?;
    let t_lag2 = rolling.lag(2, |o| o.t2m_c)?;
    let ws_lag1 = rolling.lag(1, |o| o.ws)?;
    let precip_3d = rolling.trailing_sum(PRECIP_SHORT_WINDOW, |o| o.precip);
    let precip_7d = rolling.trailing_sum(PRECIP_LONG_WINDOW, |o| o.precip);
    let (sin_doy, cos_doy) = day_of_year_encoding(obs.date);
    let heat_index = heat_index(obs.t2m_c, obs.rh);

    let labels = cfg.thresholds.classify(&LabelInputs {
        t2m_c: obs.t2m_c,
        ws: obs.ws,
        rh: obs.rh,
        precip_3d,
        heat_index,
    });

    let row = FeatureRow {
        date: obs.date,
        t2m_c: obs.t2m_c,
        precip: obs.precip,
        ws: obs.ws,
        rh: obs.rh,
        t_lag1,
        t_lag2,
        precip_3d,
        precip_7d,
        ws_lag1,
        sin_doy,
        cos_doy,
        heat_index,
        labels,
    };
    // a missing raw value drops its own row and every row that lags off it
    if row.feature_values().iter().any(|v| v.is_nan()) {
        return None;
    }
    Some(row)
}

/// Trailing history of the current row, newest at the back.
#[derive(Debug, Clone)]
struct DailyRolling {
    mode: WindowMode,
    span: usize,
    history: VecDeque<RawObservation>,
}

impl DailyRolling {
    fn new(mode: WindowMode, span: usize) -> Self {
        Self {
            mode,
            span: span.max(TEMP_LAG_DEPTH + 1),
            history: VecDeque::new(),
        }
    }

    fn push(&mut self, obs: RawObservation) {
        self.history.push_back(obs);
        match self.mode {
            WindowMode::Positional => {
                while self.history.len() > self.span {
                    self.history.pop_front();
                }
            }
            WindowMode::CalendarAware => {
                while let Some(front) = self.history.front() {
                    if (obs.date - front.date).num_days() >= self.span as i64 {
                        self.history.pop_front();
                    } else {
                        break;
                    }
                }
            }
        }
    }

    fn lag(&self, depth: usize, field: impl Fn(&RawObservation) -> f64) -> Option<f64> {
        match self.mode {
            WindowMode::Positional => {
                let len = self.history.len();
                if len <= depth {
                    return None;
                }
                Some(field(&self.history[len - 1 - depth]))
            }
            WindowMode::CalendarAware => {
                let current = self.history.back()?;
                let wanted = current.date.checked_sub_days(Days::new(depth as u64))?;
                self.history
                    .iter()
                    .rev()
                    .skip(1)
                    .find(|o| o.date == wanted)
                    .map(field)
            }
        }
    }

    /// Sum over up to `window` trailing rows, current row included. NaN values are
    /// skipped, so the sum is NaN-free even when the current value is missing.
    fn trailing_sum(&self, window: usize, field: impl Fn(&RawObservation) -> f64) -> f64 {
        let field = |o: &RawObservation| {
            let v = field(o);
            if v.is_nan() {
                0.0
            } else {
                v
            }
        };
        match self.mode {
            WindowMode::Positional => self.history.iter().rev().take(window).map(field).sum(),
            WindowMode::CalendarAware => {
                let Some(current) = self.history.back() else {
                    return 0.0;
                };
                let first_day = current
                    .date
                    .checked_sub_days(Days::new(window.saturating_sub(1) as u64))
                    .unwrap_or(NaiveDate::MIN);
                self.history
                    .iter()
                    .rev()
                    .take_while(|o| o.date >= first_day)
                    .map(field)
                    .sum()
            }
        }
    }
}

fn flag(condition: bool) -> u8 {
    u8::from(condition)
}

fn schema_fingerprint(
    cfg: &FeatureConfig,
    columns: &[FeatureColumn],
    labels: &[HazardLabel],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{};", cfg.schema_version));
    hasher.update(format!("window_mode:{:?};", cfg.window_mode));
    hasher.update(format!(
        "precip_windows:{PRECIP_SHORT_WINDOW},{PRECIP_LONG_WINDOW};"
    ));
    hasher.update("thresholds:");
    for threshold in cfg.thresholds.as_array() {
        hasher.update(format!("{threshold},"));
    }
    hasher.update(";columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(":f64;");
    }
    hasher.update("labels:");
    for label in labels {
        hasher.update(label.as_str());
        hasher.update(";");
    }
    hex::encode(hasher.finalize())
}
