//! Trained per-label scorers plus the ordered feature list they were fitted on.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::features::{FeatureSchema, HazardLabel};

/// A fitted binary classifier for one hazard label.
pub trait Scorer: Send + Sync {
    /// Probability of the positive class for a vector laid out in bundle feature order.
    fn predict(&self, features: &[f64]) -> f64;
}

impl<F> Scorer for F
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn predict(&self, features: &[f64]) -> f64 {
        self(features)
    }
}

/// Always answers with the positive-label rate seen in training.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaseRateScorer {
    pub rate: f64,
}

impl BaseRateScorer {
    pub fn fit(targets: &[u8]) -> Self {
        if targets.is_empty() {
            return Self { rate: 0.0 };
        }
        let positives = targets.iter().filter(|t| **t > 0).count();
        Self {
            rate: positives as f64 / targets.len() as f64,
        }
    }
}

impl Scorer for BaseRateScorer {
    fn predict(&self, _features: &[f64]) -> f64 {
        self.rate
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticScorer {
    pub intercept: f64,
    pub weights: Vec<f64>,
}

impl Scorer for LogisticScorer {
    fn predict(&self, features: &[f64]) -> f64 {
        let z = self.intercept
            + self
                .weights
                .iter()
                .zip(features)
                .map(|(w, x)| w * x)
                .sum::<f64>();
        1.0 / (1.0 + (-z).exp())
    }
}

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("bundle has no scorer for label {0}")]
    MissingScorer(HazardLabel),
    #[error("bundle label list is missing {0}")]
    MissingLabel(HazardLabel),
    #[error("bundle label {0} listed more than once")]
    DuplicateLabel(HazardLabel),
    #[error("bundle feature list is empty")]
    EmptyFeatures,
    #[error("bundle feature {0} listed more than once")]
    DuplicateFeature(String),
    #[error("bundle feature {0} is not produced by the feature transform")]
    UnknownFeature(String),
}

/// Immutable after construction; share it as `Arc<ModelBundle>`.
pub struct ModelBundle {
    models: BTreeMap<HazardLabel, Box<dyn Scorer>>,
    features: Vec<String>,
    labels: Vec<HazardLabel>,
    schema_version: u32,
    schema_fingerprint: String,
}

impl fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBundle")
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .field("features", &self.features)
            .field("labels", &self.labels)
            .field("schema_version", &self.schema_version)
            .field("schema_fingerprint", &self.schema_fingerprint)
            .finish()
    }
}

impl ModelBundle {
    /// Checks labels and scorers against the closed label set and every feature name
    /// against the columns `schema` produces. The schema version and fingerprint are
    /// kept so serving can refuse a different feature configuration.
    pub fn new(
        models: BTreeMap<HazardLabel, Box<dyn Scorer>>,
        features: Vec<String>,
        labels: Vec<HazardLabel>,
        schema: &FeatureSchema,
    ) -> Result<Self, BundleError> {
        let mut seen_labels = HashSet::new();
        for label in &labels {
            if !seen_labels.insert(*label) {
                return Err(BundleError::DuplicateLabel(*label));
            }
        }
        for label in HazardLabel::ALL {
            if !seen_labels.contains(&label) {
                return Err(BundleError::MissingLabel(label));
            }
            if !models.contains_key(&label) {
                return Err(BundleError::MissingScorer(label));
            }
        }

        if features.is_empty() {
            return Err(BundleError::EmptyFeatures);
        }
        let mut seen_features = HashSet::new();
        for feature in &features {
            if !seen_features.insert(feature.as_str()) {
                return Err(BundleError::DuplicateFeature(feature.clone()));
            }
            if !schema.has_column(feature) {
                return Err(BundleError::UnknownFeature(feature.clone()));
            }
        }

        info!(
            component = "bundle",
            event = "bundle.loaded",
            feature_count = features.len(),
            label_count = labels.len(),
            schema_fingerprint = %schema.fingerprint
        );

        Ok(Self {
            models,
            features,
            labels,
            schema_version: schema.version,
            schema_fingerprint: schema.fingerprint.clone(),
        })
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn schema_fingerprint(&self) -> &str {
        &self.schema_fingerprint
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn labels(&self) -> &[HazardLabel] {
        &self.labels
    }

    /// Probability for `label`, clamped to `[0, 1]`. Labels are validated at
    /// construction, so every label in [`HazardLabel::ALL`] has a scorer.
    pub fn score(&self, label: HazardLabel, features: &[f64]) -> Option<f64> {
        self.models
            .get(&label)
            .map(|scorer| clamp_probability(scorer.predict(features)))
    }

    /// Scores every bundle label in bundle label order.
    pub fn score_all(&self, features: &[f64]) -> Vec<(HazardLabel, f64)> {
        self.labels
            .iter()
            .filter_map(|label| self.score(*label, features).map(|p| (*label, p)))
            .collect()
    }
}

fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{build_feature_schema, FeatureConfig, FEATURE_COLUMNS};

    fn all_features() -> Vec<String> {
        FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    fn constant_models(p: f64) -> BTreeMap<HazardLabel, Box<dyn Scorer>> {
        HazardLabel::ALL
            .into_iter()
            .map(|label| {
                let scorer: Box<dyn Scorer> = Box::new(BaseRateScorer { rate: p });
                (label, scorer)
            })
            .collect()
    }

    #[test]
    fn valid_bundle_scores_every_label_in_order() {
        let schema = build_feature_schema(&FeatureConfig::default());
        let bundle = ModelBundle::new(
            constant_models(0.25),
            all_features(),
            HazardLabel::ALL.to_vec(),
            &schema,
        )
        .unwrap();

        assert_eq!(bundle.schema_version(), schema.version);
        assert_eq!(bundle.schema_fingerprint(), schema.fingerprint);

        let scores = bundle.score_all(&[0.0; 12]);
        assert_eq!(scores.len(), 5);
        assert_eq!(scores[0], (HazardLabel::VeryHot, 0.25));
        assert_eq!(scores[4].0, HazardLabel::VeryUncomfortable);
    }

    #[test]
    fn missing_scorer_is_rejected() {
        let schema = build_feature_schema(&FeatureConfig::default());
        let mut models = constant_models(0.1);
        models.remove(&HazardLabel::VeryWet);

        let err = ModelBundle::new(models, all_features(), HazardLabel::ALL.to_vec(), &schema)
            .unwrap_err();
        assert!(matches!(err, BundleError::MissingScorer(HazardLabel::VeryWet)));
    }

    #[test]
    fn label_list_must_be_complete_and_unique() {
        let schema = build_feature_schema(&FeatureConfig::default());
        let err = ModelBundle::new(
            constant_models(0.1),
            all_features(),
            vec![HazardLabel::VeryHot, HazardLabel::VeryHot],
            &schema,
        )
        .unwrap_err();
        assert!(matches!(err, BundleError::DuplicateLabel(HazardLabel::VeryHot)));

        let err = ModelBundle::new(
            constant_models(0.1),
            all_features(),
            vec![HazardLabel::VeryHot],
            &schema,
        )
        .unwrap_err();
        assert!(matches!(err, BundleError::MissingLabel(HazardLabel::VeryCold)));
    }

    #[test]
    fn feature_list_must_match_transform_columns() {
        let schema = build_feature_schema(&FeatureConfig::default());
        let mut features = all_features();
        features.push("dew_point".to_string());
        let err = ModelBundle::new(
            constant_models(0.1),
            features,
            HazardLabel::ALL.to_vec(),
            &schema,
        )
        .unwrap_err();
        assert!(matches!(err, BundleError::UnknownFeature(name) if name == "dew_point"));

        let err = ModelBundle::new(
            constant_models(0.1),
            vec!["t2m_c".to_string(), "t2m_c".to_string()],
            HazardLabel::ALL.to_vec(),
            &schema,
        )
        .unwrap_err();
        assert!(matches!(err, BundleError::DuplicateFeature(_)));

        let err = ModelBundle::new(
            constant_models(0.1),
            Vec::new(),
            HazardLabel::ALL.to_vec(),
            &schema,
        )
        .unwrap_err();
        assert!(matches!(err, BundleError::EmptyFeatures));
    }

    #[test]
    fn scores_are_clamped_into_unit_interval() {
        let schema = build_feature_schema(&FeatureConfig::default());
        let mut models = constant_models(0.5);
        models.insert(HazardLabel::VeryHot, Box::new(|_: &[f64]| 1.7));
        models.insert(HazardLabel::VeryCold, Box::new(|_: &[f64]| f64::NAN));
        let bundle =
            ModelBundle::new(models, all_features(), HazardLabel::ALL.to_vec(), &schema).unwrap();

        assert_eq!(bundle.score(HazardLabel::VeryHot, &[0.0; 12]), Some(1.0));
        assert_eq!(bundle.score(HazardLabel::VeryCold, &[0.0; 12]), Some(0.0));
    }

    #[test]
    fn base_rate_and_logistic_scorers() {
        let base = BaseRateScorer::fit(&[0, 1, 0, 1, 1]);
        assert!((base.predict(&[]) - 0.6).abs() < 1e-12);
        assert_eq!(BaseRateScorer::fit(&[]).rate, 0.0);

        let logistic = LogisticScorer {
            intercept: 0.0,
            weights: vec![1.0, -1.0],
        };
        assert!((logistic.predict(&[2.0, 2.0]) - 0.5).abs() < 1e-12);
        assert!(logistic.predict(&[5.0, 0.0]) > 0.99);
    }
}
