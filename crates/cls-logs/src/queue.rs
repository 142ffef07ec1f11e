// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The pending-record buffer and the batch sequence counter.
//!
//! Producers and flushers never take a lock: records live in a lock-free MPMC queue and the
//! pending count is a single atomic. A slot is reserved on the counter before the record is
//! pushed and released only after it has been popped, so the counter never under-reports what
//! is queued or being flushed.

use crate::record::LogRecord;
use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use uuid::Uuid;

/// Multi-producer, multi-consumer record buffer with a drop-newest capacity guard.
#[derive(Debug)]
pub struct PendingQueue {
    records: SegQueue<LogRecord>,
    pending: AtomicUsize,
    capacity: usize,
}

impl PendingQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: SegQueue::new(),
            pending: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Queues `record` unless the buffer is saturated.
    ///
    /// Returns `false` when the record was dropped. Records already queued are never evicted.
    pub fn enqueue(&self, record: LogRecord) -> bool {
        let reserved = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                (pending < self.capacity).then_some(pending + 1)
            })
            .is_ok();
        if reserved {
            self.records.push(record);
        }
        reserved
    }

    /// Removes the oldest record without releasing its slot; pair with [`PendingQueue::release`].
    pub fn pop(&self) -> Option<LogRecord> {
        self.records.pop()
    }

    /// Gives back `count` slots taken by popped records.
    pub fn release(&self, count: usize) {
        if count > 0 {
            self.pending.fetch_sub(count, Ordering::AcqRel);
        }
    }

    /// Removes up to `max` records in FIFO order and releases their slots.
    pub fn drain(&self, max: usize) -> Vec<LogRecord> {
        let mut drained = Vec::with_capacity(max.min(self.records.len()));
        while drained.len() < max {
            match self.records.pop() {
                Some(record) => drained.push(record),
                None => break,
            }
        }
        self.release(drained.len());
        drained
    }

    /// Records queued or still held by an in-progress flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Generates context-flow ids: a random per-run prefix and a monotonically increasing sequence.
#[derive(Debug)]
pub struct FlowCounter {
    prefix: String,
    sequence: AtomicU64,
}

impl Default for FlowCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefix(Uuid::new_v4().simple().to_string())
    }

    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Allocates the next id, e.g. `3f2a...c1-7`.
    pub fn next_id(&self) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        format!("{}-{sequence}", self.prefix)
    }

    /// Number of ids handed out so far.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}
