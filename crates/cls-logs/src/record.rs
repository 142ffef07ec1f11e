// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log records and the append path that creates them.

use crate::host::HostIdentity;
use chrono::{DateTime, FixedOffset, Utc};
use std::collections::{BTreeMap, HashSet};

pub const FIELD_TIME: &str = "time";
pub const FIELD_DATETIME: &str = "datetime";
pub const FIELD_LEVEL: &str = "level";
pub const FIELD_LOGGER_NAME: &str = "loggerName";
pub const FIELD_THREAD_NAME: &str = "threadName";
pub const FIELD_IP: &str = "ip";
pub const FIELD_HOSTNAME: &str = "hostname";
pub const FIELD_FORMATTED_MESSAGE: &str = "formattedMessage";
pub const FIELD_THROWABLE: &str = "throwable";

/// One captured log event, ready to be queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Milliseconds since the Unix epoch.
    pub time: i64,
    pub datetime: String,
    pub level: String,
    /// Logger name with the call-site line appended, e.g. `app::db(42)`.
    pub logger_name: String,
    pub thread_name: String,
    pub message: String,
    pub formatted_message: String,
    pub throwable: Option<String>,
    pub ip: String,
    pub hostname: String,
    /// Allow-listed contextual fields.
    pub extra: BTreeMap<String, String>,
}

/// An event as seen by a host integration, before enrichment and filtering.
#[derive(Debug, Clone, Default)]
pub struct RawEvent {
    pub time: i64,
    pub level: String,
    pub logger: String,
    pub line: Option<u32>,
    pub thread_name: String,
    pub message: String,
    pub formatted_message: Option<String>,
    pub throwable: Option<String>,
    /// Every contextual field available at the call site; filtered by the allow-list.
    pub context: BTreeMap<String, String>,
}

/// Allow-list of contextual field names copied onto records.
#[derive(Debug, Clone, Default)]
pub struct FieldAllowList {
    names: HashSet<String>,
}

impl FieldAllowList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn allows(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    #[must_use]
    pub fn filter(&self, context: BTreeMap<String, String>) -> BTreeMap<String, String> {
        if self.names.is_empty() {
            return BTreeMap::new();
        }
        context
            .into_iter()
            .filter(|(key, _)| self.names.contains(key))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct TimeFormatter {
    format: String,
    offset: FixedOffset,
}

impl TimeFormatter {
    #[must_use]
    pub fn new(format: impl Into<String>, offset: FixedOffset) -> Self {
        Self {
            format: format.into(),
            offset,
        }
    }

    /// Formats epoch milliseconds; out-of-range timestamps render as an empty string.
    #[must_use]
    pub fn format(&self, millis: i64) -> String {
        DateTime::<Utc>::from_timestamp_millis(millis)
            .map(|utc| utc.with_timezone(&self.offset).format(&self.format).to_string())
            .unwrap_or_default()
    }
}

/// Turns [`RawEvent`]s into [`LogRecord`]s stamped with this host's identity.
#[derive(Debug, Clone)]
pub struct RecordFactory {
    identity: HostIdentity,
    formatter: TimeFormatter,
    allow_list: FieldAllowList,
}

impl RecordFactory {
    #[must_use]
    pub fn new(identity: HostIdentity, formatter: TimeFormatter, allow_list: FieldAllowList) -> Self {
        Self {
            identity,
            formatter,
            allow_list,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &HostIdentity {
        &self.identity
    }

    #[must_use]
    pub fn allow_list(&self) -> &FieldAllowList {
        &self.allow_list
    }

    #[must_use]
    pub fn build(&self, event: RawEvent) -> LogRecord {
        let logger_name = match event.line {
            Some(line) => format!("{}({line})", event.logger),
            None => event.logger,
        };
        let formatted_message = event
            .formatted_message
            .unwrap_or_else(|| event.message.clone());

        LogRecord {
            time: event.time,
            datetime: self.formatter.format(event.time),
            level: event.level,
            logger_name,
            thread_name: event.thread_name,
            message: event.message,
            formatted_message,
            throwable: event.throwable,
            ip: self.identity.ip.clone(),
            hostname: self.identity.hostname.clone(),
            extra: self.allow_list.filter(event.context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory(fields: &[&str]) -> RecordFactory {
        RecordFactory::new(
            HostIdentity {
                hostname: "web-1".to_string(),
                ip: "10.0.0.7".to_string(),
                source: "web-1(10.0.0.7)".to_string(),
            },
            TimeFormatter::new(
                crate::config::DEFAULT_TIME_FORMAT,
                FixedOffset::east_opt(0).unwrap(),
            ),
            FieldAllowList::new(fields.iter().copied()),
        )
    }

    #[test]
    fn test_build_appends_line_and_identity() {
        let record = factory(&[]).build(RawEvent {
            time: 0,
            level: "WARN".to_string(),
            logger: "app::db".to_string(),
            line: Some(42),
            thread_name: "main".to_string(),
            message: "slow query".to_string(),
            ..Default::default()
        });

        assert_eq!(record.logger_name, "app::db(42)");
        assert_eq!(record.formatted_message, "slow query");
        assert_eq!(record.datetime, "1970-01-01T00:00+0000");
        assert_eq!(record.ip, "10.0.0.7");
        assert_eq!(record.hostname, "web-1");
        assert!(record.extra.is_empty());
    }

    #[test]
    fn test_build_filters_context() {
        let context = BTreeMap::from([
            ("traceId".to_string(), "abc".to_string()),
            ("password".to_string(), "hunter2".to_string()),
        ]);
        let record = factory(&["traceId"]).build(RawEvent {
            logger: "app".to_string(),
            context,
            ..Default::default()
        });

        assert_eq!(record.logger_name, "app");
        assert_eq!(
            record.extra,
            BTreeMap::from([("traceId".to_string(), "abc".to_string())])
        );
    }

    #[test]
    fn test_time_formatter_applies_offset() {
        let formatter = TimeFormatter::new("%Y-%m-%dT%H:%M%z", FixedOffset::east_opt(8 * 3600).unwrap());
        assert_eq!(formatter.format(1_700_000_000_000), "2023-11-15T06:13+0800");
    }

    #[test]
    fn test_empty_allow_list_drops_everything() {
        let allow = FieldAllowList::default();
        assert!(allow.is_empty());
        let context = BTreeMap::from([("a".to_string(), "1".to_string())]);
        assert!(allow.filter(context).is_empty());
    }
}
