use crate::error::ConfigError;
use crate::linear_reference::MeasureConvention;
use std::str::FromStr;
use std::time::Duration;

/// NHDPlus HR network flowlines on the USGS National Map.
pub const DEFAULT_SERVICE_URL: &str =
    "https://hydro.nationalmap.gov/arcgis/rest/services/NHDPlus_HR/MapServer/3/query";

pub const DEFAULT_SEARCH_DISTANCE_M: f64 = 100.0;
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct SnapConfig {
    pub service_url: String,
    pub search_distance_m: f64,
    /// Maximum number of rows queried at once.
    pub concurrency: usize,
    pub request_timeout: Duration,
    pub measure: MeasureConvention,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_SERVICE_URL.to_string(),
            search_distance_m: DEFAULT_SEARCH_DISTANCE_M,
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            measure: MeasureConvention::default(),
        }
    }
}

impl SnapConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the
    /// `HYDROLINK_*` keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = SnapConfig::default();

        if let Some(url) = lookup("HYDROLINK_SERVICE_URL") {
            config.service_url = url;
        }
        if let Some(d) = parsed::<f64, _>(&lookup, "HYDROLINK_SEARCH_DISTANCE_M")? {
            if !(d.is_finite() && d > 0.0) {
                return Err(invalid(
                    "HYDROLINK_SEARCH_DISTANCE_M",
                    &d.to_string(),
                    "must be a positive number of meters",
                ));
            }
            config.search_distance_m = d;
        }
        if let Some(n) = parsed::<usize, _>(&lookup, "HYDROLINK_CONCURRENCY")? {
            if n == 0 {
                return Err(invalid("HYDROLINK_CONCURRENCY", "0", "must be at least 1"));
            }
            config.concurrency = n;
        }
        if let Some(secs) = parsed::<u64, _>(&lookup, "HYDROLINK_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(field) = lookup("HYDROLINK_FROM_MEASURE_FIELD") {
            config.measure.from_field = field;
        }
        if let Some(field) = lookup("HYDROLINK_TO_MEASURE_FIELD") {
            config.measure.to_field = field;
        }
        if let Some(flag) = parsed::<bool, _>(&lookup, "HYDROLINK_MEASURE_INCREASES_ALONG_GEOMETRY")?
        {
            config.measure.increases_along_geometry = flag;
        }

        Ok(config)
    }
}

fn parsed<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(var, &raw, &e.to_string())),
    }
}

fn invalid(var: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError {
        var: var.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
