//! Hazardcast core crate.
//!
//! Current implemented scope:
//! - daily observations to lag/rolling/cyclical features and hazard labels
//! - prediction row selection with an explicit fallback policy
//! - NASA POWER daily point fetch
//! - validated scorer bundles, training-set preparation and evaluation
//! - `/predict` HTTP route

mod bundle;
mod features;
mod observability;
mod observation;
mod power;
mod predict;
mod selector;
mod server;
mod training;

pub use bundle::{BaseRateScorer, BundleError, LogisticScorer, ModelBundle, Scorer};
pub use features::{
    assert_schema_compatible, build_feature_schema, day_of_year_encoding, derive_features,
    heat_index, FeatureColumn, FeatureConfig, FeatureDType, FeatureError, FeatureRow,
    FeatureSchema, HazardLabel, HazardLabels, LabelInputs, LabelThresholds, WindowMode,
    FEATURE_COLUMNS, FEATURE_SCHEMA_VERSION, PRECIP_LONG_WINDOW, PRECIP_SHORT_WINDOW,
};
pub use observability::{
    env_flag, init_logging, log_app_bind, log_app_start, log_bundle_ready,
    logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError, LOG_FORMAT_ENV,
    LOG_LEVEL_ENV, LOG_TARGET_ENV,
};
pub use observation::{
    inference_window, DateWindow, GeoPoint, RawObservation, RawTable, DEFAULT_POINT,
    INFERENCE_LOOKBACK_DAYS,
};
pub use power::{
    parse_power_payload, power_request_url, FetchError, ObservationSource, PowerClient,
    PowerConfig, DEFAULT_POWER_PARAMETERS, POWER_DAILY_POINT_URL, POWER_FILL_VALUE,
};
pub use predict::{
    round_probability, PredictError, PredictRequest, PredictionResponse, PredictionService,
    ServeConfig,
};
pub use selector::{
    select_from_derived, select_row, RowMatch, SelectError, SelectedRow, SelectionPolicy,
};
pub use server::{parse_request_date, prediction_router, ErrorBody, PredictQuery};
pub use training::{
    baseline_bundle, brier_score, default_feature_list, evaluate, fit_base_rates, roc_auc,
    write_features_csv, EvaluationReport, LabelMetrics, Split, TrainingError, TrainingSet,
    DEFAULT_TRAIN_FRACTION,
};
