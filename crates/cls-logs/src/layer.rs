// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A `tracing_subscriber` layer that ships events through a [`LogShipper`].
//!
//! ```rust,ignore
//! let shipper = LogShipper::start(Config::from_env()?)?;
//! tracing_subscriber::registry()
//!     .with(tracing_subscriber::fmt::layer())
//!     .with(ClsLayer::new(Arc::clone(&shipper)))
//!     .init();
//! ```
//!
//! Span fields are collected as contextual fields and filtered by the configured allow-list;
//! an `error` field on the event becomes the record's throwable. Events from this crate and its
//! HTTP stack are never shipped.

use crate::errors::error_chain;
use crate::pipeline::LogShipper;
use crate::record::RawEvent;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const MESSAGE_FIELD: &str = "message";
const ERROR_FIELD: &str = "error";

/// Targets whose events would feed back into the pipeline.
const INTERNAL_TARGETS: &[&str] = &[
    "cls_logs",
    "reqwest",
    "hyper",
    "hyper_util",
    "h2",
    "rustls",
    "tokio",
    "tokio_util",
];

#[derive(Debug, Clone)]
pub struct ClsLayer {
    shipper: Arc<LogShipper>,
}

impl ClsLayer {
    #[must_use]
    pub fn new(shipper: Arc<LogShipper>) -> Self {
        Self { shipper }
    }

    #[must_use]
    pub fn shipper(&self) -> &Arc<LogShipper> {
        &self.shipper
    }

    fn collects_span_fields(&self) -> bool {
        !self.shipper.record_factory().allow_list().is_empty()
    }
}

fn is_internal(target: &str) -> bool {
    INTERNAL_TARGETS.iter().any(|internal| {
        target == *internal
            || target
                .strip_prefix(internal)
                .is_some_and(|rest| rest.starts_with("::"))
    })
}

/// Span fields stored in the span's extensions.
#[derive(Debug, Default)]
struct SpanFields(BTreeMap<String, String>);

impl<S> Layer<S> for ClsLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if !self.collects_span_fields() {
            return;
        }

        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);

        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanFields(visitor.fields));
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        if !self.collects_span_fields() {
            return;
        }

        let mut visitor = FieldVisitor::default();
        values.record(&mut visitor);

        if let Some(span) = ctx.span(id) {
            let mut extensions = span.extensions_mut();
            match extensions.get_mut::<SpanFields>() {
                Some(stored) => stored.0.extend(visitor.fields),
                None => extensions.insert(SpanFields(visitor.fields)),
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_internal(metadata.target()) || !self.shipper.is_running() {
            return;
        }

        let mut context = BTreeMap::new();
        if let Some(scope) = ctx.event_scope(event) {
            // Root first, so inner spans override outer ones.
            for span in scope.from_root() {
                if let Some(stored) = span.extensions().get::<SpanFields>() {
                    context.extend(stored.0.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        let mut fields = visitor.fields;
        let message = fields.remove(MESSAGE_FIELD).unwrap_or_default();
        let throwable = fields.remove(ERROR_FIELD);
        context.extend(fields);

        let thread = std::thread::current();
        let thread_name = thread
            .name()
            .map_or_else(|| format!("{:?}", thread.id()), str::to_string);

        self.shipper.ingest_event(RawEvent {
            time: chrono::Utc::now().timestamp_millis(),
            level: metadata.level().to_string(),
            logger: metadata.target().to_string(),
            line: metadata.line(),
            thread_name,
            message,
            formatted_message: None,
            throwable,
            context,
        });
    }
}

/// Collects field values as strings.
#[derive(Debug, Default)]
struct FieldVisitor {
    fields: BTreeMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.fields
            .insert(field.name().to_string(), error_chain(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), format!("{value:?}"));
    }
}
