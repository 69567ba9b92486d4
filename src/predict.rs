//! Request-scoped prediction: fetch a short window, select a row, score it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::bundle::ModelBundle;
use crate::features::{
    assert_schema_compatible, build_feature_schema, FeatureConfig, FeatureError, HazardLabel,
};
use crate::observation::{inference_window, GeoPoint, DEFAULT_POINT};
use crate::power::{FetchError, ObservationSource};
use crate::selector::{select_row, RowMatch, SelectError, SelectionPolicy};

const PROBABILITY_DECIMALS: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PredictRequest {
    pub date: Option<NaiveDate>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl PredictRequest {
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..Self::default()
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat.unwrap_or(DEFAULT_POINT.lat),
            lon: self.lon.unwrap_or(DEFAULT_POINT.lon),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub predictions: BTreeMap<HazardLabel, f64>,
    pub requested_date: NaiveDate,
    pub feature_date: NaiveDate,
    pub matched: RowMatch,
}

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("upstream fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("feature row unavailable: {0}")]
    Selection(#[from] SelectError),
    #[error("feature projection failed: {0}")]
    Projection(#[from] FeatureError),
    #[error("bundle does not match serving features: {0}")]
    Schema(FeatureError),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ServeConfig {
    pub features: FeatureConfig,
    pub policy: SelectionPolicy,
}

/// Holds the bundle and upstream source; both are fixed at startup.
pub struct PredictionService {
    bundle: Arc<ModelBundle>,
    source: Arc<dyn ObservationSource>,
    cfg: ServeConfig,
}

impl PredictionService {
    pub fn new(
        bundle: Arc<ModelBundle>,
        source: Arc<dyn ObservationSource>,
        cfg: ServeConfig,
    ) -> Result<Self, PredictError> {
        cfg.features.validate().map_err(PredictError::Schema)?;
        assert_schema_compatible(
            bundle.schema_version(),
            bundle.schema_fingerprint(),
            &build_feature_schema(&cfg.features),
        )
        .map_err(PredictError::Schema)?;
        Ok(Self {
            bundle,
            source,
            cfg,
        })
    }

    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }

    pub fn predict(&self, req: &PredictRequest) -> Result<PredictionResponse, PredictError> {
        self.predict_at(req, Utc::now().date_naive())
    }

    /// Like [`Self::predict`], with `today` standing in for a missing request date.
    pub fn predict_at(
        &self,
        req: &PredictRequest,
        today: NaiveDate,
    ) -> Result<PredictionResponse, PredictError> {
        let target = req.date.unwrap_or(today);
        let point = req.point();

        let raw = self.source.fetch(point, inference_window(target))?;
        let selected = select_row(raw.rows(), target, &self.cfg.features, self.cfg.policy)?;
        let x = selected.row.project(self.bundle.features())?;

        let predictions: BTreeMap<HazardLabel, f64> = self
            .bundle
            .score_all(&x)
            .into_iter()
            .map(|(label, p)| (label, round_probability(p)))
            .collect();

        info!(
            component = "predict",
            event = "predict.finish",
            requested_date = %target,
            feature_date = %selected.row.date,
            matched = ?selected.matched,
            lat = point.lat,
            lon = point.lon
        );

        Ok(PredictionResponse {
            predictions,
            requested_date: target,
            feature_date: selected.row.date,
            matched: selected.matched,
        })
    }
}

pub fn round_probability(p: f64) -> f64 {
    let scale = 10f64.powi(PROBABILITY_DECIMALS);
    (p * scale).round() / scale
}
