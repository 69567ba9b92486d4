//! NASA POWER daily point fetch, normalised into [`RawTable`]s.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::observation::{DateWindow, GeoPoint, RawObservation, RawTable};

pub const POWER_DAILY_POINT_URL: &str = "https://power.larc.nasa.gov/api/temporal/daily/point";
pub const DEFAULT_POWER_PARAMETERS: &str = "T2M,PRECTOTCORR,WS2M,RH2M";

/// POWER marks days it has not published yet with this value.
pub const POWER_FILL_VALUE: f64 = -999.0;

const REQUIRED_COLUMNS: [&str; 4] = ["t2m_c", "precip", "ws", "rh"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerConfig {
    pub base_url: String,
    pub parameters: String,
    pub community: String,
    pub http_timeout_ms: u64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            base_url: POWER_DAILY_POINT_URL.to_string(),
            parameters: DEFAULT_POWER_PARAMETERS.to_string(),
            community: "ag".to_string(),
            http_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    HttpRequest { url: String, message: String },
    #[error("invalid POWER payload: {0}")]
    InvalidPayload(String),
    #[error("POWER payload has no {parameter} value for {date}")]
    MissingParameter { date: NaiveDate, parameter: String },
    #[error("invalid POWER date key '{0}'")]
    InvalidDate(String),
    #[error("invalid fetch window: start {start} is after end {end}")]
    InvalidWindow { start: NaiveDate, end: NaiveDate },
}

/// Upstream source of raw daily observations for one point.
pub trait ObservationSource: Send + Sync {
    fn fetch(&self, point: GeoPoint, window: DateWindow) -> Result<RawTable, FetchError>;
}

pub struct PowerClient {
    cfg: PowerConfig,
    fetcher: Box<dyn HttpFetcher>,
}

impl PowerClient {
    pub fn new(cfg: PowerConfig) -> Result<Self, FetchError> {
        let fetcher = ReqwestBlockingFetcher::new(cfg.http_timeout_ms)?;
        Ok(Self {
            cfg,
            fetcher: Box::new(fetcher),
        })
    }

    pub fn config(&self) -> &PowerConfig {
        &self.cfg
    }

    #[cfg(test)]
    fn with_fetcher(cfg: PowerConfig, fetcher: Box<dyn HttpFetcher>) -> Self {
        Self { cfg, fetcher }
    }
}

impl ObservationSource for PowerClient {
    fn fetch(&self, point: GeoPoint, window: DateWindow) -> Result<RawTable, FetchError> {
        if window.start > window.end {
            return Err(FetchError::InvalidWindow {
                start: window.start,
                end: window.end,
            });
        }

        let url = power_request_url(&self.cfg, point, window);
        info!(
            component = "power",
            event = "power.fetch.start",
            lat = point.lat,
            lon = point.lon,
            start = %window.start,
            end = %window.end
        );
        debug!(component = "power", event = "power.fetch.url", url = %url);

        let payload = match self.fetcher.get_bytes(&url) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(
                    component = "power",
                    event = "power.fetch.error",
                    error = %err
                );
                return Err(err);
            }
        };
        let table = parse_power_payload(&payload)?;

        info!(
            component = "power",
            event = "power.fetch.finish",
            rows = table.len(),
            first_date = ?table.first_date(),
            last_date = ?table.last_date()
        );
        Ok(table)
    }
}

pub fn power_request_url(cfg: &PowerConfig, point: GeoPoint, window: DateWindow) -> String {
    format!(
        "{}?start={}&end={}&latitude={}&longitude={}&parameters={}&community={}&format=JSON",
        cfg.base_url,
        window.start.format("%Y%m%d"),
        window.end.format("%Y%m%d"),
        point.lat,
        point.lon,
        cfg.parameters,
        cfg.community
    )
}

#[derive(Debug, Deserialize)]
struct PowerResponse {
    properties: PowerProperties,
}

#[derive(Debug, Deserialize)]
struct PowerProperties {
    parameter: BTreeMap<String, BTreeMap<String, Option<f64>>>,
}

/// Parses a POWER JSON body. Unpublished days (fill value) are left out.
pub fn parse_power_payload(payload: &[u8]) -> Result<RawTable, FetchError> {
    let response: PowerResponse = serde_json::from_slice(payload)
        .map_err(|err| FetchError::InvalidPayload(err.to_string()))?;

    let mut by_date: BTreeMap<NaiveDate, [Option<f64>; 4]> = BTreeMap::new();
    for (parameter, series) in &response.properties.parameter {
        let Some(slot) = column_slot(parameter) else {
            debug!(
                component = "power",
                event = "power.parse.ignored_parameter",
                parameter = %parameter
            );
            continue;
        };
        for (raw_date, value) in series {
            let date = parse_power_date(raw_date)?;
            by_date.entry(date).or_default()[slot] = *value;
        }
    }

    let mut rows = Vec::with_capacity(by_date.len());
    let mut unpublished = 0usize;
    for (date, values) in by_date {
        let mut resolved = [0.0; 4];
        for (idx, value) in values.iter().enumerate() {
            resolved[idx] = value.ok_or_else(|| FetchError::MissingParameter {
                date,
                parameter: REQUIRED_COLUMNS[idx].to_string(),
            })?;
        }
        if resolved.iter().any(|v| is_fill_value(*v)) {
            unpublished += 1;
            continue;
        }
        rows.push(RawObservation {
            date,
            t2m_c: resolved[0],
            precip: resolved[1],
            ws: resolved[2],
            rh: resolved[3],
        });
    }

    if unpublished > 0 {
        debug!(
            component = "power",
            event = "power.parse.unpublished_days",
            days = unpublished
        );
    }

    Ok(RawTable::new(rows))
}

fn column_slot(parameter: &str) -> Option<usize> {
    match parameter.to_ascii_lowercase().as_str() {
        "t2m" | "t2m_c" => Some(0),
        "prectot" | "prectotcorr" | "precip" => Some(1),
        "ws2m" | "ws" => Some(2),
        "rh2m" | "rh" => Some(3),
        _ => None,
    }
}

fn parse_power_date(raw: &str) -> Result<NaiveDate, FetchError> {
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|_| FetchError::InvalidDate(raw.to_string()))
}

fn is_fill_value(value: f64) -> bool {
    (value - POWER_FILL_VALUE).abs() < 1e-6
}

trait HttpFetcher: Send + Sync {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

struct ReqwestBlockingFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingFetcher {
    fn new(timeout_ms: u64) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| FetchError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpFetcher for ReqwestBlockingFetcher {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| FetchError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpRequest {
                url: url.to_string(),
                message: format!("unexpected HTTP status {status}"),
            });
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| FetchError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })
    }
}
