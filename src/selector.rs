//! Picks the single feature row used to score a requested date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::features::{derive_features, FeatureConfig, FeatureRow};
use crate::observation::RawObservation;

/// What to do when the requested date has no derived row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionPolicy {
    /// Only the exact date is acceptable.
    ExactMatch,
    /// Fall back to the most recent derived row.
    #[default]
    FallbackToLatest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowMatch {
    Exact,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectedRow {
    pub requested_date: NaiveDate,
    pub matched: RowMatch,
    pub row: FeatureRow,
}

impl SelectedRow {
    pub fn is_substitute(&self) -> bool {
        matches!(self.matched, RowMatch::Fallback)
    }
}

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("insufficient history: {raw_rows} raw rows produced no derivable feature row")]
    InsufficientHistory { raw_rows: usize },
    #[error("no feature row for {requested}; latest derivable date is {latest}")]
    NoExactMatch {
        requested: NaiveDate,
        latest: NaiveDate,
    },
}

/// Derives `raw` and returns the row for `target`, or a substitute per `policy`.
pub fn select_row(
    raw: &[RawObservation],
    target: NaiveDate,
    cfg: &FeatureConfig,
    policy: SelectionPolicy,
) -> Result<SelectedRow, SelectError> {
    let rows = derive_features(raw, cfg);
    select_from_derived(&rows, raw.len(), target, policy)
}

/// Selection over an already derived table, ascending by date.
pub fn select_from_derived(
    rows: &[FeatureRow],
    raw_rows: usize,
    target: NaiveDate,
    policy: SelectionPolicy,
) -> Result<SelectedRow, SelectError> {
    let Some(latest) = rows.last() else {
        warn!(
            component = "selector",
            event = "selector.insufficient_history",
            requested_date = %target,
            raw_rows = raw_rows
        );
        return Err(SelectError::InsufficientHistory { raw_rows });
    };

    // first match wins when a caller hands in duplicate dates
    if let Some(row) = rows.iter().find(|row| row.date == target) {
        info!(
            component = "selector",
            event = "selector.exact",
            requested_date = %target
        );
        return Ok(SelectedRow {
            requested_date: target,
            matched: RowMatch::Exact,
            row: *row,
        });
    }

    match policy {
        SelectionPolicy::ExactMatch => Err(SelectError::NoExactMatch {
            requested: target,
            latest: latest.date,
        }),
        SelectionPolicy::FallbackToLatest => {
            info!(
                component = "selector",
                event = "selector.fallback",
                requested_date = %target,
                feature_date = %latest.date,
                derived_rows = rows.len()
            );
            Ok(SelectedRow {
                requested_date: target,
                matched: RowMatch::Fallback,
                row: *latest,
            })
        }
    }
}
