// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Session configuration.
//!
//! Options come from two places: the per-session `--log-opt` map handed over by
//! the runtime ([`LogInfo::config`]) and process-wide defaults read once from
//! the environment ([`DriverDefaults`]). [`BulkWriterConfig::resolve`] merges
//! them, per-session values winning, and validates the result. Nothing below
//! this module reads the environment.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};

use crate::errors::ConfigError;

/// Per-session option keys (`--log-opt key=value`).
pub const OPT_HOST: &str = "host";
pub const OPT_INDEX: &str = "index";
pub const OPT_TYPE: &str = "type";
pub const OPT_BULK_SIZE: &str = "bulksize";
pub const OPT_DATE_SUFFIX: &str = "datesuffix";
pub const OPT_USER: &str = "USER";
pub const OPT_PASSWORD: &str = "PASSWORD";
pub const OPT_TIMEOUT: &str = "timeout";
pub const OPT_FLUSH_ON_STOP: &str = "flushonstop";
pub const OPT_MAX_IN_FLIGHT: &str = "maxinflight";

/// Process-wide environment fallbacks.
const ENV_HOST: &str = "HOST";
const ENV_BULK_SIZE: &str = "bulksize";
const ENV_DATE_SUFFIX: &str = "DATESUFFIX";
const ENV_GC_TIMER: &str = "GCTIMER";
const ENV_USER: &str = "USER";
const ENV_PASSWORD: &str = "PASSWORD";
const ENV_TIMEOUT: &str = "TIMEOUT";
const ENV_FLUSH_ON_STOP: &str = "FLUSHONSTOP";
const ENV_MAX_IN_FLIGHT: &str = "MAXINFLIGHT";

pub const DEFAULT_DOC_TYPE: &str = "log";
pub const DEFAULT_BULK_SIZE: usize = 10;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;
const DEFAULT_FLUSH_ON_STOP: bool = true;

/// What the runtime tells us about the container behind a stream.
#[derive(Debug, Clone, Default)]
pub struct LogInfo {
    /// Only used as log context.
    pub container_id: String,
    /// Only used as log context.
    pub container_name: String,
    /// Per-session options.
    pub config: HashMap<String, String>,
}

impl LogInfo {
    pub fn new(container_id: impl Into<String>, container_name: impl Into<String>) -> Self {
        LogInfo {
            container_id: container_id.into(),
            container_name: container_name.into(),
            config: HashMap::new(),
        }
    }

    /// Builder-style helper to set one option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    fn option(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| non_empty(v))
    }
}

/// Process-wide defaults applied when a session does not set an option itself.
///
/// Values are kept raw and validated in [`BulkWriterConfig::resolve`], so a bad
/// environment fails session creation rather than process startup.
#[derive(Debug, Clone, Default)]
pub struct DriverDefaults {
    pub host: Option<String>,
    pub bulk_size: Option<String>,
    pub date_suffix: Option<String>,
    pub flush_interval: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout: Option<String>,
    pub flush_on_stop: Option<String>,
    pub max_in_flight: Option<String>,
}

impl DriverDefaults {
    /// Reads the defaults from the current process environment.
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Reads the defaults from key/value pairs (typically for tests).
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |key: &str| map.get(key).and_then(|v| non_empty(v)).map(str::to_string);

        DriverDefaults {
            host: get(ENV_HOST),
            bulk_size: get(ENV_BULK_SIZE),
            date_suffix: get(ENV_DATE_SUFFIX),
            flush_interval: get(ENV_GC_TIMER),
            user: get(ENV_USER),
            password: get(ENV_PASSWORD),
            timeout: get(ENV_TIMEOUT),
            flush_on_stop: get(ENV_FLUSH_ON_STOP),
            max_in_flight: get(ENV_MAX_IN_FLIGHT),
        }
    }
}

/// Fully resolved settings for one session's bulk writer.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWriterConfig {
    /// Backend base URL reduced to `scheme://host[:port]`.
    pub host: String,
    /// Index name prefix.
    pub index: String,
    /// Document type written in each bulk action header.
    pub doc_type: String,
    /// Number of lines that triggers a flush.
    pub bulk_size: usize,
    /// strftime format appended to the index name at send time.
    pub date_suffix: Option<String>,
    /// Period of the background flush.
    pub flush_interval: Duration,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout for bulk POSTs.
    pub timeout: Option<Duration>,
    /// Dispatch whatever is still buffered when the session stops.
    pub flush_on_stop: bool,
    /// Upper bound on concurrent bulk requests for this session.
    pub max_in_flight: usize,
    pub container_id: String,
    pub container_name: String,
}

impl BulkWriterConfig {
    /// Minimal valid configuration, mostly for tests and embedders.
    pub fn new(host: impl Into<String>, index: impl Into<String>) -> Self {
        BulkWriterConfig {
            host: host.into(),
            index: index.into(),
            doc_type: DEFAULT_DOC_TYPE.to_string(),
            bulk_size: DEFAULT_BULK_SIZE,
            date_suffix: None,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            user: None,
            password: None,
            timeout: None,
            flush_on_stop: DEFAULT_FLUSH_ON_STOP,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            container_id: String::new(),
            container_name: String::new(),
        }
    }

    /// Merges per-session options over the process-wide defaults.
    pub fn resolve(info: &LogInfo, defaults: &DriverDefaults) -> Result<Self, ConfigError> {
        let raw_host = info
            .option(OPT_HOST)
            .or(defaults.host.as_deref())
            .ok_or(ConfigError::MissingHost)?;
        let host = normalize_host(raw_host)?;

        let index = info
            .option(OPT_INDEX)
            .ok_or(ConfigError::MissingIndex)?
            .to_string();

        let doc_type = info
            .option(OPT_TYPE)
            .unwrap_or(DEFAULT_DOC_TYPE)
            .to_string();

        let bulk_size = match info.option(OPT_BULK_SIZE).or(defaults.bulk_size.as_deref()) {
            Some(raw) => parse_bulk_size(raw)?,
            None => DEFAULT_BULK_SIZE,
        };

        let date_suffix = info
            .option(OPT_DATE_SUFFIX)
            .or(defaults.date_suffix.as_deref())
            .map(str::to_string);
        if let Some(format) = date_suffix.as_deref() {
            validate_date_format(format)?;
        }

        let flush_interval = match defaults.flush_interval.as_deref() {
            Some(raw) => parse_duration(raw).ok_or_else(|| ConfigError::InvalidDuration {
                key: ENV_GC_TIMER,
                value: raw.to_string(),
            })?,
            None => DEFAULT_FLUSH_INTERVAL,
        };
        if flush_interval.is_zero() {
            return Err(ConfigError::InvalidDuration {
                key: ENV_GC_TIMER,
                value: "0".to_string(),
            });
        }

        let timeout = match info.option(OPT_TIMEOUT).or(defaults.timeout.as_deref()) {
            Some(raw) => match parse_duration(raw) {
                // a zero timeout would fail every request
                Some(timeout) if !timeout.is_zero() => Some(timeout),
                _ => {
                    return Err(ConfigError::InvalidDuration {
                        key: OPT_TIMEOUT,
                        value: raw.to_string(),
                    })
                }
            },
            None => None,
        };

        let flush_on_stop = match info
            .option(OPT_FLUSH_ON_STOP)
            .or(defaults.flush_on_stop.as_deref())
        {
            Some(raw) => parse_bool(raw).ok_or_else(|| ConfigError::InvalidBool {
                key: OPT_FLUSH_ON_STOP,
                value: raw.to_string(),
            })?,
            None => DEFAULT_FLUSH_ON_STOP,
        };

        let max_in_flight = match info
            .option(OPT_MAX_IN_FLIGHT)
            .or(defaults.max_in_flight.as_deref())
        {
            Some(raw) => parse_bulk_size(raw)?,
            None => DEFAULT_MAX_IN_FLIGHT,
        };

        Ok(BulkWriterConfig {
            host,
            index,
            doc_type,
            bulk_size,
            date_suffix,
            flush_interval,
            user: info
                .option(OPT_USER)
                .or(defaults.user.as_deref())
                .map(str::to_string),
            password: info
                .option(OPT_PASSWORD)
                .or(defaults.password.as_deref())
                .map(str::to_string),
            timeout,
            flush_on_stop,
            max_in_flight,
            container_id: info.container_id.clone(),
            container_name: info.container_name.clone(),
        })
    }

    /// Credentials for basic auth, only when both halves are set.
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        match (self.user.as_deref(), self.password.as_deref()) {
            (Some(user), Some(password)) => Some((user, password)),
            _ => None,
        }
    }
}

/// Validates `raw` as an absolute URL and keeps only `scheme://host[:port]`.
pub fn normalize_host(raw: &str) -> Result<String, ConfigError> {
    let url = match reqwest::Url::parse(raw) {
        Ok(url) => url,
        Err(_) if !raw.contains("://") => return Err(ConfigError::MissingScheme(raw.to_string())),
        Err(_) => return Err(ConfigError::InvalidHost(raw.to_string())),
    };
    // "localhost:9200" parses with "localhost" as the scheme and no host
    let Some(host) = url.host_str() else {
        return Err(ConfigError::MissingScheme(raw.to_string()));
    };
    match url.port() {
        Some(port) => Ok(format!("{}://{}:{}", url.scheme(), host, port)),
        None => Ok(format!("{}://{}", url.scheme(), host)),
    }
}

/// Rejects strftime strings chrono cannot render, so index names never fail at send time.
fn validate_date_format(format: &str) -> Result<(), ConfigError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ConfigError::InvalidDateSuffix(format.to_string()));
    }
    Ok(())
}

fn parse_bulk_size(raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(size) if size > 0 => Ok(size),
        _ => Err(ConfigError::InvalidBulkSize(raw.to_string())),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parses Go-style durations: a sequence of decimal numbers with a unit
/// (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`), e.g. `300ms`, `1m`, `1h30m`, `1.5s`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let mut rest = raw.trim();
    if rest.is_empty() {
        return None;
    }
    if rest == "0" {
        return Some(Duration::ZERO);
    }

    let mut total_nanos: f64 = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let value: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total_nanos += value * nanos_per_unit;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(total_nanos as u64))
}

fn non_empty(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
