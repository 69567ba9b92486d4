//! Training-set preparation and evaluation over derived feature rows.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::bundle::{BaseRateScorer, BundleError, ModelBundle, Scorer};
use crate::features::{FeatureError, FeatureRow, FeatureSchema, HazardLabel, FEATURE_COLUMNS};

pub const DEFAULT_TRAIN_FRACTION: f64 = 0.8;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("train fraction must be in (0, 1), got {0}")]
    InvalidFraction(f64),
    #[error("feature projection failed: {0}")]
    Feature(#[from] FeatureError),
    #[error("bundle rejected: {0}")]
    Bundle(#[from] BundleError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Feature matrix and per-label targets over a contiguous date range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub dates: Vec<NaiveDate>,
    pub x: Vec<Vec<f64>>,
    pub y: BTreeMap<HazardLabel, Vec<u8>>,
}

impl Split {
    fn from_rows(rows: &[FeatureRow], features: &[String]) -> Result<Self, FeatureError> {
        let x = rows
            .iter()
            .map(|row| row.project(features))
            .collect::<Result<Vec<_>, _>>()?;
        let y = HazardLabel::ALL
            .into_iter()
            .map(|label| (label, rows.iter().map(|row| row.label(label)).collect()))
            .collect();
        Ok(Self {
            dates: rows.iter().map(|row| row.date).collect(),
            x,
            y,
        })
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn targets(&self, label: HazardLabel) -> &[u8] {
        self.y.get(&label).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSet {
    pub features: Vec<String>,
    pub train: Split,
    pub test: Split,
}

impl TrainingSet {
    /// Time-ordered split: the first `floor(fraction * n)` rows train, the rest test.
    /// `rows` must already be ascending by date, as [`crate::derive_features`] returns them.
    pub fn from_rows(
        rows: &[FeatureRow],
        features: &[String],
        train_fraction: f64,
    ) -> Result<Self, TrainingError> {
        if !(train_fraction > 0.0 && train_fraction < 1.0) {
            return Err(TrainingError::InvalidFraction(train_fraction));
        }
        let cut = (train_fraction * rows.len() as f64).floor() as usize;
        let (train_rows, test_rows) = rows.split_at(cut.min(rows.len()));

        let set = Self {
            features: features.to_vec(),
            train: Split::from_rows(train_rows, features)?,
            test: Split::from_rows(test_rows, features)?,
        };

        info!(
            component = "training",
            event = "training.split.built",
            rows = rows.len(),
            train_rows = set.train.len(),
            test_rows = set.test.len(),
            feature_count = features.len()
        );

        Ok(set)
    }
}

/// Every column the transform produces, in contract order.
pub fn default_feature_list() -> Vec<String> {
    FEATURE_COLUMNS.iter().map(|name| (*name).to_string()).collect()
}

pub fn fit_base_rates(train: &Split) -> BTreeMap<HazardLabel, Box<dyn Scorer>> {
    HazardLabel::ALL
        .into_iter()
        .map(|label| {
            let scorer: Box<dyn Scorer> = Box::new(BaseRateScorer::fit(train.targets(label)));
            (label, scorer)
        })
        .collect()
}

/// Bundle of per-label base rates over `train`, keyed to the split's feature list.
pub fn baseline_bundle(
    train: &Split,
    features: &[String],
    schema: &FeatureSchema,
) -> Result<ModelBundle, TrainingError> {
    let bundle = ModelBundle::new(
        fit_base_rates(train),
        features.to_vec(),
        HazardLabel::ALL.to_vec(),
        schema,
    )?;
    Ok(bundle)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelMetrics {
    pub auc: Option<f64>,
    pub brier: f64,
    pub positives: usize,
    pub rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub labels: BTreeMap<HazardLabel, LabelMetrics>,
}

pub fn evaluate(bundle: &ModelBundle, test: &Split) -> EvaluationReport {
    let mut report = EvaluationReport::default();
    for label in bundle.labels() {
        let targets = test.targets(*label);
        let scores: Vec<f64> = test
            .x
            .iter()
            .map(|x| bundle.score(*label, x).unwrap_or(0.0))
            .collect();
        let metrics = LabelMetrics {
            auc: roc_auc(targets, &scores),
            brier: brier_score(targets, &scores),
            positives: targets.iter().filter(|t| **t > 0).count(),
            rows: targets.len(),
        };
        info!(
            component = "training",
            event = "training.evaluate.label",
            label = %label,
            auc = ?metrics.auc,
            brier = metrics.brier,
            positives = metrics.positives
        );
        report.labels.insert(*label, metrics);
    }
    report
}

/// Area under the ROC curve via the rank-sum statistic; tied scores share their
/// average rank. `None` when only one class is present.
pub fn roc_auc(targets: &[u8], scores: &[f64]) -> Option<f64> {
    let n = targets.len().min(scores.len());
    let positives = targets[..n].iter().filter(|t| **t > 0).count();
    let negatives = n - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|a, b| scores[*a].total_cmp(&scores[*b]));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for idx in &order[i..=j] {
            ranks[*idx] = avg_rank;
        }
        i = j + 1;
    }

    let positive_rank_sum: f64 = (0..n)
        .filter(|idx| targets[*idx] > 0)
        .map(|idx| ranks[idx])
        .sum();
    let p = positives as f64;
    let u = positive_rank_sum - p * (p + 1.0) / 2.0;
    Some(u / (p * negatives as f64))
}

/// Mean squared error between probabilities and 0/1 targets. Empty input scores 0.
pub fn brier_score(targets: &[u8], scores: &[f64]) -> f64 {
    let n = targets.len().min(scores.len());
    if n == 0 {
        return 0.0;
    }
    targets
        .iter()
        .zip(scores)
        .map(|(t, s)| {
            let d = s - f64::from(*t);
            d * d
        })
        .sum::<f64>()
        / n as f64
}

/// Writes the enriched table: `date`, feature columns, then labels.
pub fn write_features_csv(path: &Path, rows: &[FeatureRow]) -> Result<(), TrainingError> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["date".to_string()];
    header.extend(FEATURE_COLUMNS.iter().map(|c| (*c).to_string()));
    header.extend(HazardLabel::ALL.iter().map(|l| l.as_str().to_string()));
    writer.write_record(&header)?;

    for row in rows {
        let mut record = vec![row.date.format("%Y-%m-%d").to_string()];
        record.extend(row.feature_values().iter().map(|v| v.to_string()));
        record.extend(HazardLabel::ALL.iter().map(|l| row.label(*l).to_string()));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    info!(
        component = "training",
        event = "training.features_csv.written",
        path = %path.display(),
        rows = rows.len()
    );
    Ok(())
}
