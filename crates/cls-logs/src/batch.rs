// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Drains the pending queue into wire-format log groups.

use crate::errors::ShipError;
use crate::proto::{Content, Log, LogGroup, LogGroupList};
use crate::queue::{FlowCounter, PendingQueue};
use crate::record::{
    LogRecord, FIELD_DATETIME, FIELD_FORMATTED_MESSAGE, FIELD_HOSTNAME, FIELD_IP, FIELD_LEVEL,
    FIELD_LOGGER_NAME, FIELD_THREAD_NAME, FIELD_THROWABLE, FIELD_TIME,
};
use prost::Message;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct BatchAssembler {
    source: String,
    max_records: usize,
}

impl BatchAssembler {
    #[must_use]
    pub fn new(source: impl Into<String>, max_records: usize) -> Self {
        Self {
            source: source.into(),
            max_records: max_records.max(1),
        }
    }

    #[must_use]
    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// Pops up to the per-flush cap from `queue` into a new log group.
    ///
    /// Returns `None` without touching the flow counter when there is nothing to pop, including
    /// when a concurrent flush emptied the queue first. Records beyond the cap stay queued.
    pub fn assemble(&self, queue: &PendingQueue, flow: &FlowCounter) -> Option<LogGroup> {
        let Some(first) = queue.pop() else {
            trace!("CLS | Queue empty, nothing to assemble");
            return None;
        };

        let mut logs = Vec::with_capacity(self.max_records.min(queue.len() + 1));
        logs.push(encode_record(first));
        while logs.len() < self.max_records {
            match queue.pop() {
                Some(record) => logs.push(encode_record(record)),
                None => break,
            }
        }
        queue.release(logs.len());

        Some(LogGroup {
            logs,
            context_flow: Some(flow.next_id()),
            source: Some(self.source.clone()),
            ..Default::default()
        })
    }
}

/// Encodes one record as an ordered list of contents: the fixed fields, the throwable if any,
/// then the contextual fields.
#[must_use]
pub fn encode_record(record: LogRecord) -> Log {
    let mut contents = Vec::with_capacity(9 + record.extra.len());
    contents.push(Content::new(FIELD_TIME, record.time.to_string()));
    contents.push(Content::new(FIELD_DATETIME, record.datetime));
    contents.push(Content::new(FIELD_LEVEL, record.level));
    contents.push(Content::new(FIELD_LOGGER_NAME, record.logger_name));
    contents.push(Content::new(FIELD_THREAD_NAME, record.thread_name));
    contents.push(Content::new(FIELD_IP, record.ip));
    contents.push(Content::new(FIELD_HOSTNAME, record.hostname));
    contents.push(Content::new(
        FIELD_FORMATTED_MESSAGE,
        record.formatted_message,
    ));
    if let Some(throwable) = record.throwable {
        contents.push(Content::new(FIELD_THROWABLE, throwable));
    }
    contents.extend(
        record
            .extra
            .into_iter()
            .map(|(key, value)| Content::new(key, value)),
    );

    Log {
        time: record.time,
        contents,
    }
}

/// Serializes a single group as the `LogGroupList` body CLS expects.
pub fn serialize(group: LogGroup) -> Result<Vec<u8>, ShipError> {
    let list = LogGroupList {
        log_group_list: vec![group],
    };
    let mut buf = Vec::with_capacity(list.encoded_len());
    list.encode(&mut buf)?;
    Ok(buf)
}
