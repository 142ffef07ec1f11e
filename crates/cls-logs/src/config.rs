// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline configuration.
//!
//! Settings can be built in code, deserialized with any `serde` format, or read from `CLS_*`
//! environment variables with [`Config::from_env`]. The flush interval and flush threshold are
//! clamped into their supported ranges whichever way they are set.

use crate::compression::CompressionType;
use crate::errors::ConfigError;
use crate::region::endpoint_host;
use crate::uploader::UPLOAD_PATH;
use chrono::FixedOffset;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Deserializer};
use std::env;
use std::time::Duration;

pub const MIN_FLUSH_INTERVAL_SECS: u64 = 1;
pub const MAX_FLUSH_INTERVAL_SECS: u64 = 5;
pub const MIN_FLUSH_THRESHOLD: usize = 3_000;
pub const MAX_FLUSH_THRESHOLD: usize = 8_000;
pub const DEFAULT_MAX_PENDING: usize = 20_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_SIGNATURE_TTL_SECS: u64 = 300;
pub const MAX_SIGNATURE_TTL_SECS: u64 = 86_400;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M%z";

const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub region: String,
    pub secret_id: String,
    pub secret_key: String,
    pub topic_id: String,
    pub max_retries: u32,
    /// Enables verbose diagnostics and disables TLS certificate verification.
    pub debug: bool,
    /// Use the in-cloud endpoint domain.
    pub internal: bool,
    /// Timer period in seconds; read through [`Config::flush_interval`], which clamps it.
    #[serde(rename = "flush_interval", deserialize_with = "deserialize_flush_interval")]
    pub flush_interval_secs: u64,
    /// Pending-count trigger and per-flush cap; read through [`Config::flush_threshold`].
    #[serde(deserialize_with = "deserialize_flush_threshold")]
    pub flush_threshold: usize,
    /// Soft ceiling on queued records; records arriving above it are dropped.
    pub max_pending: usize,
    #[serde(deserialize_with = "deserialize_field_list")]
    pub context_fields: Vec<String>,
    pub source: Option<String>,
    pub hostname: Option<String>,
    pub ip: Option<String>,
    pub compression: CompressionType,
    pub signature_ttl_secs: u64,
    pub request_timeout_secs: u64,
    /// Replaces the derived `https://<region host>` base URL.
    pub endpoint: Option<String>,
    pub https_proxy: Option<String>,
    pub time_format: String,
    pub time_zone: String,
    /// Keep flushing while a full batch is still queued instead of waiting for the next tick.
    pub drain_backlog: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: String::new(),
            secret_id: String::new(),
            secret_key: String::new(),
            topic_id: String::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            debug: false,
            internal: false,
            flush_interval_secs: MIN_FLUSH_INTERVAL_SECS,
            flush_threshold: MIN_FLUSH_THRESHOLD,
            max_pending: DEFAULT_MAX_PENDING,
            context_fields: Vec::new(),
            source: None,
            hostname: None,
            ip: None,
            compression: CompressionType::default(),
            signature_ttl_secs: DEFAULT_SIGNATURE_TTL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            endpoint: None,
            https_proxy: None,
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            time_zone: "UTC".to_string(),
            drain_backlog: false,
        }
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self {
            region: env_string("CLS_REGION").unwrap_or_default(),
            secret_id: env_string("CLS_SECRET_ID").unwrap_or_default(),
            secret_key: env_string("CLS_SECRET_KEY").unwrap_or_default(),
            topic_id: env_string("CLS_TOPIC_ID").unwrap_or_default(),
            debug: env_flag("CLS_DEBUG"),
            internal: env_flag("CLS_INTERNAL"),
            drain_backlog: env_flag("CLS_DRAIN_BACKLOG"),
            context_fields: env_string("CLS_CONTEXT_FIELDS")
                .map(|fields| parse_field_list(&fields))
                .unwrap_or_default(),
            source: env_string("CLS_SOURCE"),
            hostname: env_string("CLS_HOSTNAME"),
            ip: env_string("CLS_IP"),
            endpoint: env_string("CLS_ENDPOINT"),
            https_proxy: env_string("CLS_PROXY_HTTPS").or_else(|| env_string("HTTPS_PROXY")),
            ..Self::default()
        };

        if let Some(retries) = env_parsed::<u32>("CLS_MAX_RETRIES")? {
            config.max_retries = retries;
        }
        if let Some(interval) = env_parsed::<u64>("CLS_FLUSH_INTERVAL")? {
            config.set_flush_interval(interval);
        }
        if let Some(threshold) = env_parsed::<usize>("CLS_FLUSH_THRESHOLD")? {
            config.set_flush_threshold(threshold);
        }
        if let Some(max_pending) = env_parsed::<usize>("CLS_MAX_PENDING")? {
            config.max_pending = max_pending;
        }
        if let Some(timeout) = env_parsed::<u64>("CLS_REQUEST_TIMEOUT")? {
            config.request_timeout_secs = timeout;
        }
        if let Some(compression) = env_parsed::<CompressionType>("CLS_COMPRESS_TYPE")? {
            config.compression = compression;
        }
        if let Some(format) = env_string("CLS_TIME_FORMAT") {
            config.time_format = format;
        }
        if let Some(zone) = env_string("CLS_TIME_ZONE") {
            config.time_zone = zone;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("region", &self.region),
            ("secret_id", &self.secret_id),
            ("secret_key", &self.secret_key),
            ("topic_id", &self.topic_id),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(field));
            }
        }

        if self.max_pending == 0 {
            return Err(ConfigError::Invalid {
                field: "max_pending",
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_secs",
                reason: "must be greater than 0".to_string(),
            });
        }

        if !(1..=MAX_SIGNATURE_TTL_SECS).contains(&self.signature_ttl_secs) {
            return Err(ConfigError::Invalid {
                field: "signature_ttl_secs",
                reason: format!("must be between 1 and {MAX_SIGNATURE_TTL_SECS}"),
            });
        }

        parse_time_zone(&self.time_zone)?;

        if let Some(endpoint) = &self.endpoint {
            let url = reqwest::Url::parse(endpoint).map_err(|e| ConfigError::Invalid {
                field: "endpoint",
                reason: e.to_string(),
            })?;
            if url.host_str().is_none() {
                return Err(ConfigError::Invalid {
                    field: "endpoint",
                    reason: "missing host".to_string(),
                });
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(clamp_flush_interval(self.flush_interval_secs))
    }

    /// Sets the timer period in seconds, clamped to the supported range.
    pub fn set_flush_interval(&mut self, secs: u64) {
        self.flush_interval_secs = clamp_flush_interval(secs);
    }

    /// Pending-count trigger and per-flush batch cap.
    #[must_use]
    pub fn flush_threshold(&self) -> usize {
        clamp_flush_threshold(self.flush_threshold)
    }

    /// Sets the flush threshold, clamped to the supported range.
    pub fn set_flush_threshold(&mut self, threshold: usize) {
        self.flush_threshold = clamp_flush_threshold(threshold);
    }

    #[must_use]
    pub fn with_flush_interval(mut self, secs: u64) -> Self {
        self.set_flush_interval(secs);
        self
    }

    #[must_use]
    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.set_flush_threshold(threshold);
        self
    }

    #[must_use]
    pub fn signature_ttl(&self) -> Duration {
        Duration::from_secs(self.signature_ttl_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Host the requests are addressed to and signed for.
    ///
    /// With an endpoint override this is the override's authority (`host[:port]`).
    #[must_use]
    pub fn host(&self) -> String {
        match self.endpoint_url() {
            Some(url) => match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{host}:{port}"),
                (Some(host), None) => host.to_string(),
                (None, _) => endpoint_host(&self.region, self.internal),
            },
            None => endpoint_host(&self.region, self.internal),
        }
    }

    #[must_use]
    pub fn upload_url(&self, topic_id: &str) -> String {
        let base = match &self.endpoint {
            Some(endpoint) if self.endpoint_url().is_some() => {
                endpoint.trim_end_matches('/').to_string()
            }
            _ => format!("https://{}", endpoint_host(&self.region, self.internal)),
        };
        format!(
            "{base}{UPLOAD_PATH}?topic_id={}",
            utf8_percent_encode(topic_id, QUERY_ENCODE_SET)
        )
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        parse_time_zone(&self.time_zone)
    }

    fn endpoint_url(&self) -> Option<reqwest::Url> {
        self.endpoint
            .as_deref()
            .and_then(|endpoint| reqwest::Url::parse(endpoint).ok())
    }
}

#[must_use]
pub fn clamp_flush_interval(secs: u64) -> u64 {
    secs.clamp(MIN_FLUSH_INTERVAL_SECS, MAX_FLUSH_INTERVAL_SECS)
}

#[must_use]
pub fn clamp_flush_threshold(threshold: usize) -> usize {
    threshold.clamp(MIN_FLUSH_THRESHOLD, MAX_FLUSH_THRESHOLD)
}

/// Splits a comma-separated allow-list, dropping blanks.
#[must_use]
pub fn parse_field_list(fields: &str) -> Vec<String> {
    fields
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .collect()
}

/// Accepts `UTC`, `Z`, or a fixed offset written as `+HH:MM`, `-HH:MM` or `+HHMM`.
pub fn parse_time_zone(zone: &str) -> Result<FixedOffset, ConfigError> {
    let invalid = || ConfigError::Invalid {
        field: "time_zone",
        reason: format!("expected UTC or +HH:MM, got '{zone}'"),
    };

    let zone = zone.trim();
    if zone.is_empty() || zone.eq_ignore_ascii_case("utc") || zone.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match zone.as_bytes().first() {
        Some(b'+') => (1, &zone[1..]),
        Some(b'-') => (-1, &zone[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    if minutes >= 60 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn env_parsed<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_string(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                field: key,
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn deserialize_flush_interval<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(clamp_flush_interval)
}

fn deserialize_flush_threshold<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    usize::deserialize(deserializer).map(clamp_flush_threshold)
}

fn deserialize_field_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(|fields| parse_field_list(&fields))
}
