use std::{net::SocketAddr, sync::Arc};

use chrono::{Days, NaiveDate, Utc};
use hazardcast::{
    baseline_bundle, build_feature_schema, default_feature_list, derive_features, env_flag,
    init_logging, log_app_bind, log_app_start, log_bundle_ready, logging_config_from_env,
    prediction_router, DateWindow, FeatureConfig, LoggingConfig, ModelBundle, ObservationSource,
    PowerClient, PowerConfig, PredictionService, ServeConfig, TrainingSet, WindowMode,
    DEFAULT_POINT, DEFAULT_TRAIN_FRACTION,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let logging_cfg = logging_config_from_env(LoggingConfig::default());
    init_logging(&logging_cfg)?;
    log_app_start("predict_server", &logging_cfg);

    let addr: SocketAddr = std::env::var("HAZARD_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8000".to_string())
        .parse()?;

    let features = if env_flag("HAZARD_CALENDAR_AWARE", false) {
        FeatureConfig::with_window_mode(WindowMode::CalendarAware)
    } else {
        FeatureConfig::default()
    };
    // reqwest blocking client must stay off the async workers.
    let (source, bundle) = tokio::task::spawn_blocking(move || {
        let source = Arc::new(PowerClient::new(PowerConfig::default())?);
        let bundle = train_startup_bundle(&*source, features)?;
        Ok::<_, Box<dyn std::error::Error + Send + Sync>>((source, bundle))
    })
    .await??;

    let service = PredictionService::new(
        Arc::new(bundle),
        source,
        ServeConfig {
            features,
            ..ServeConfig::default()
        },
    )?;
    let app = prediction_router(Arc::new(service));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Fits base-rate scorers over the reference point's history once at startup.
fn train_startup_bundle(
    source: &dyn ObservationSource,
    cfg: FeatureConfig,
) -> Result<ModelBundle, Box<dyn std::error::Error + Send + Sync>> {
    let start = match std::env::var("HAZARD_TRAIN_START") {
        Ok(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")?,
        Err(_) => NaiveDate::from_ymd_opt(2022, 1, 1).ok_or("invalid default start date")?,
    };
    let end = Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(1))
        .ok_or("invalid end date")?;

    let raw = source.fetch(DEFAULT_POINT, DateWindow::new(start, end))?;
    let rows = derive_features(raw.rows(), &cfg);
    let schema = build_feature_schema(&cfg);
    let features = default_feature_list();
    let set = TrainingSet::from_rows(&rows, &features, DEFAULT_TRAIN_FRACTION)?;
    let bundle = baseline_bundle(&set.train, &features, &schema)?;

    log_bundle_ready(
        "base_rate_startup_fit",
        bundle.features().len(),
        Some(schema.fingerprint.as_str()),
    );
    Ok(bundle)
}
