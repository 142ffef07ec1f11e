// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process log shipping to Tencent Cloud Log Service (CLS).
//!
//! Records are buffered in a bounded lock-free queue and flushed on a timer or as soon as the
//! pending count reaches the flush threshold. Each flush packs up to one threshold's worth of
//! records into a `LogGroupList`, compresses it, signs the request and uploads it in the
//! background.
//!
//! ```rust,ignore
//! let shipper = LogShipper::start(Config::from_env()?)?;
//! shipper.ingest_event(RawEvent { message: "hello".into(), ..Default::default() });
//! shipper.shutdown();
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch;
pub mod compression;
pub mod config;
pub mod errors;
pub mod host;
pub mod http;
pub mod layer;
pub mod pipeline;
pub mod proto;
pub mod queue;
pub mod record;
pub mod region;
pub mod scheduler;
pub mod signature;
pub mod uploader;

pub use config::Config;
pub use errors::{ConfigError, ShipError, StartError, TransportError};
pub use layer::ClsLayer;
pub use pipeline::{FlushReport, LogShipper};
pub use record::{LogRecord, RawEvent};
pub use uploader::{Transport, UploadOutcome};
