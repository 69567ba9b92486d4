//! Logging setup shared by the server and the training CLI.

use std::env;
use std::net::SocketAddr;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub const LOG_LEVEL_ENV: &str = "HAZARD_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "HAZARD_LOG_FORMAT";
pub const LOG_TARGET_ENV: &str = "HAZARD_LOG_TARGET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    /// Single-line human output, used by batch tools.
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    pub fn batch() -> Self {
        Self {
            format: LogFormat::Compact,
            include_target: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Applies `HAZARD_LOG_*` overrides on top of `base`. Unparseable values are ignored.
pub fn logging_config_from_env(base: LoggingConfig) -> LoggingConfig {
    let mut config = base;

    if let Ok(level) = env::var(LOG_LEVEL_ENV) {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }

    if let Some(format) = env::var(LOG_FORMAT_ENV).ok().and_then(|raw| parse_log_format(&raw)) {
        config.format = format;
    }

    if let Some(include_target) = env::var(LOG_TARGET_ENV).ok().and_then(|raw| parse_bool(&raw)) {
        config.include_target = include_target;
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(!matches!(config.format, LogFormat::Json));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
        LogFormat::Compact => {
            tracing::subscriber::set_global_default(builder.compact().finish())?
        }
    }

    Ok(())
}

pub fn log_app_start(app: &str, config: &LoggingConfig) {
    info!(
        component = app,
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_app_bind(bound_addr: SocketAddr) {
    info!(
        component = "predict_server",
        event = "app.bind",
        bind_addr = %bound_addr,
        route = "/predict"
    );
}

pub fn log_bundle_ready(source: &str, feature_count: usize, schema_fingerprint: Option<&str>) {
    match schema_fingerprint {
        Some(schema_fingerprint) => info!(
            component = "predict_server",
            event = "bundle.ready",
            source,
            feature_count,
            schema_fingerprint
        ),
        None => info!(
            component = "predict_server",
            event = "bundle.ready",
            source,
            feature_count
        ),
    }
}

/// Reads a boolean flag from the environment; missing or unparseable yields `default`.
pub fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|raw| parse_bool(&raw))
        .unwrap_or(default)
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        "compact" => Some(LogFormat::Compact),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_env_vars<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let _guard = env_lock().lock().expect("env lock should not be poisoned");
        let previous: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(key, _)| ((*key).to_string(), env::var(key).ok()))
            .collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        let output = f();

        for (key, value) in previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        output
    }

    #[test]
    fn base_config_survives_when_env_is_empty() {
        let cfg = with_env_vars(
            &[
                (LOG_LEVEL_ENV, None),
                (LOG_FORMAT_ENV, None),
                (LOG_TARGET_ENV, None),
            ],
            || logging_config_from_env(LoggingConfig::batch()),
        );

        assert_eq!(cfg, LoggingConfig::batch());
    }

    #[test]
    fn env_overrides_level_format_and_target() {
        let cfg = with_env_vars(
            &[
                (LOG_LEVEL_ENV, Some("hazardcast=debug")),
                (LOG_FORMAT_ENV, Some("JSON")),
                (LOG_TARGET_ENV, Some("off")),
            ],
            || logging_config_from_env(LoggingConfig::default()),
        );

        assert_eq!(cfg.level, "hazardcast=debug");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(!cfg.include_target);
    }

    #[test]
    fn unparseable_values_keep_the_base() {
        let cfg = with_env_vars(
            &[
                (LOG_LEVEL_ENV, Some("   ")),
                (LOG_FORMAT_ENV, Some("yaml")),
                (LOG_TARGET_ENV, Some("maybe")),
            ],
            || logging_config_from_env(LoggingConfig::default()),
        );

        assert_eq!(cfg, LoggingConfig::default());
    }

    #[test]
    fn env_flag_falls_back_to_default() {
        let key = "HAZARD_TEST_FLAG";
        assert!(with_env_vars(&[(key, Some("yes"))], || env_flag(key, false)));
        assert!(!with_env_vars(&[(key, Some("nope"))], || env_flag(key, false)));
        assert!(with_env_vars(&[(key, None)], || env_flag(key, true)));
    }
}
