use std::fs;
use std::path::PathBuf;

use chrono::{Days, NaiveDate, Utc};
use hazardcast::{
    baseline_bundle, build_feature_schema, default_feature_list, derive_features, env_flag,
    evaluate, init_logging, log_app_start, logging_config_from_env, write_features_csv,
    DateWindow, FeatureConfig, GeoPoint, LoggingConfig, ObservationSource, PowerClient,
    PowerConfig, TrainingSet, WindowMode, DEFAULT_POINT, DEFAULT_TRAIN_FRACTION,
};
use serde_json::json;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env(LoggingConfig::batch());
    init_logging(&logging_cfg)?;
    log_app_start("train_baseline", &logging_cfg);

    let start = match std::env::var("HAZARD_TRAIN_START") {
        Ok(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")?,
        Err(_) => NaiveDate::from_ymd_opt(2022, 1, 1).ok_or("invalid default start date")?,
    };
    let end = Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(1))
        .ok_or("invalid end date")?;
    if end < start {
        return Err(format!("invalid training range: start={start} end={end}").into());
    }

    let point = GeoPoint {
        lat: env_f64("HAZARD_LAT").unwrap_or(DEFAULT_POINT.lat),
        lon: env_f64("HAZARD_LON").unwrap_or(DEFAULT_POINT.lon),
    };
    let output_dir = PathBuf::from(
        std::env::var("HAZARD_OUTPUT_DIR").unwrap_or_else(|_| "models".to_string()),
    );
    fs::create_dir_all(&output_dir)?;

    let feature_cfg = if env_flag("HAZARD_CALENDAR_AWARE", false) {
        FeatureConfig::with_window_mode(WindowMode::CalendarAware)
    } else {
        FeatureConfig::default()
    };
    feature_cfg.validate()?;

    let client = PowerClient::new(PowerConfig::default())?;
    let raw = client.fetch(point, DateWindow::new(start, end))?;
    let rows = derive_features(raw.rows(), &feature_cfg);
    write_features_csv(&output_dir.join("features.csv"), &rows)?;

    let schema = build_feature_schema(&feature_cfg);
    let features = default_feature_list();
    let set = TrainingSet::from_rows(&rows, &features, DEFAULT_TRAIN_FRACTION)?;
    let bundle = baseline_bundle(&set.train, &features, &schema)?;
    let report = evaluate(&bundle, &set.test);

    fs::write(
        output_dir.join("metrics.json"),
        serde_json::to_string_pretty(&report)?,
    )?;
    fs::write(
        output_dir.join("schema.json"),
        serde_json::to_string_pretty(&json!({
            "schema": schema,
            "features": features,
            "labels": bundle.labels(),
        }))?,
    )?;

    info!(
        component = "train_baseline",
        event = "train.finish",
        raw_rows = raw.len(),
        derived_rows = rows.len(),
        train_rows = set.train.len(),
        test_rows = set.test.len(),
        output_dir = %output_dir.display()
    );

    Ok(())
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok()?.trim().parse().ok()
}
