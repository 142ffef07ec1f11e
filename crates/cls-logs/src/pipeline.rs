// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The shipper lifecycle: `start`, `ingest`, `flush` and `shutdown`.
//!
//! A [`LogShipper`] owns every piece of mutable state (queue, counters, timer, runtime), so
//! independent shippers can run side by side in one process.

use crate::batch::BatchAssembler;
use crate::config::Config;
use crate::errors::{ShipError, StartError};
use crate::host::HostIdentity;
use crate::http::build_client;
use crate::queue::{FlowCounter, PendingQueue};
use crate::record::{FieldAllowList, LogRecord, RawEvent, RecordFactory, TimeFormatter};
use crate::region::Region;
use crate::scheduler::{spawn_timer, threshold_reached};
use crate::uploader::{ReqwestTransport, Transport, UploadOutcome, Uploader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Worker threads of the runtime a shipper creates when started outside of one.
pub const RUNTIME_WORKER_THREADS: usize = 4;

/// The result of one flush that produced a batch.
#[derive(Debug)]
pub struct FlushReport {
    pub context_flow: String,
    pub records: usize,
    /// The detached upload; dropping it does not cancel delivery.
    pub upload: JoinHandle<UploadOutcome>,
}

pub struct LogShipper {
    config: Arc<Config>,
    queue: PendingQueue,
    flow: FlowCounter,
    assembler: BatchAssembler,
    uploader: Uploader,
    factory: RecordFactory,
    running: AtomicBool,
    timer_token: CancellationToken,
    runtime: Mutex<Option<Runtime>>,
}

impl std::fmt::Debug for LogShipper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogShipper")
            .field("topic_id", &self.config.topic_id)
            .field("pending", &self.queue.pending())
            .field("running", &self.is_running())
            .field("uploader", &self.uploader)
            .finish_non_exhaustive()
    }
}

impl LogShipper {
    /// Validates `config`, builds the HTTP client and starts the flush timer.
    pub fn start(config: Config) -> Result<Arc<Self>, StartError> {
        config.validate()?;
        let client = build_client(&config)?;
        Self::start_with_transport(config, Arc::new(ReqwestTransport::new(client)))
    }

    /// Like [`LogShipper::start`], sending through `transport` instead of HTTP.
    pub fn start_with_transport(
        config: Config,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>, StartError> {
        config.validate()?;
        let offset = config.utc_offset()?;
        if config.endpoint.is_none() {
            if let Err(e) = config.region.parse::<Region>() {
                warn!("CLS | {}, deriving the endpoint from it anyway", e);
            }
        }

        let (owned_runtime, handle) = match Handle::try_current() {
            Ok(handle) => (None, handle),
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(RUNTIME_WORKER_THREADS)
                    .thread_name("cls-shipper-worker")
                    .enable_all()
                    .build()
                    .map_err(StartError::Runtime)?;
                let handle = runtime.handle().clone();
                (Some(runtime), handle)
            }
        };

        let identity = HostIdentity::resolve(&config);
        let factory = RecordFactory::new(
            identity.clone(),
            TimeFormatter::new(config.time_format.clone(), offset),
            FieldAllowList::new(config.context_fields.iter().cloned()),
        );
        let config = Arc::new(config);

        let shipper = Arc::new(Self {
            queue: PendingQueue::new(config.max_pending),
            flow: FlowCounter::new(),
            assembler: BatchAssembler::new(identity.source, config.flush_threshold()),
            uploader: Uploader::new(Arc::clone(&config), transport, handle.clone()),
            factory,
            running: AtomicBool::new(true),
            timer_token: CancellationToken::new(),
            runtime: Mutex::new(owned_runtime),
            config,
        });

        let weak = Arc::downgrade(&shipper);
        spawn_timer(
            &handle,
            shipper.config.flush_interval(),
            shipper.timer_token.clone(),
            move || {
                if let Some(shipper) = weak.upgrade() {
                    shipper.flush_triggered();
                }
            },
        );

        info!(
            "CLS | Log shipper started for topic {} via {} (flush every {:?} or at {} records)",
            shipper.config.topic_id,
            shipper.uploader.host(),
            shipper.config.flush_interval(),
            shipper.config.flush_threshold()
        );
        Ok(shipper)
    }

    /// Queues `record`, flushing right away if the threshold is reached.
    ///
    /// Never blocks on the network and never fails: records arriving while the queue is full or
    /// after shutdown are dropped.
    pub fn ingest(&self, record: LogRecord) {
        if !self.is_running() {
            trace!("CLS | Shipper stopped, dropping record");
            return;
        }
        if !self.queue.enqueue(record) {
            trace!("CLS | Queue full, dropping record");
            return;
        }
        if threshold_reached(self.queue.pending(), self.config.flush_threshold()) {
            self.flush_triggered();
        }
    }

    /// Builds a record from `event` and ingests it.
    pub fn ingest_event(&self, event: RawEvent) {
        if !self.is_running() {
            return;
        }
        self.ingest(self.factory.build(event));
    }

    /// Assembles one batch and hands it to the uploader.
    ///
    /// Returns `Ok(None)` when there was nothing to send. Safe to call from any number of
    /// threads at once.
    pub fn flush(&self) -> Result<Option<FlushReport>, ShipError> {
        let Some(group) = self.assembler.assemble(&self.queue, &self.flow) else {
            return Ok(None);
        };
        let context_flow = group.context_flow.clone().unwrap_or_default();
        let records = group.logs.len();

        let upload = self.uploader.submit(&self.config.topic_id, group)?;
        debug!(
            "CLS | Dispatched batch {} with {} records, {} still pending",
            context_flow,
            records,
            self.queue.pending()
        );
        Ok(Some(FlushReport {
            context_flow,
            records,
            upload,
        }))
    }

    /// Flush run by the timer and the threshold trigger; errors are logged, not returned.
    fn flush_triggered(&self) {
        loop {
            match self.flush() {
                Ok(Some(_)) => {}
                Ok(None) => return,
                Err(e) => {
                    error!("CLS | Flush failed: {}", e);
                    return;
                }
            }
            if !(self.config.drain_backlog
                && threshold_reached(self.queue.pending(), self.config.flush_threshold()))
            {
                return;
            }
        }
    }

    /// Stops the timer and flushes until the queue is empty.
    ///
    /// Blocks the caller for the final drain. In-flight uploads are not cancelled; when the
    /// shipper runs its own runtime, they are allowed to finish before it is torn down.
    /// Calling this more than once is a no-op.
    pub fn shutdown(&self) -> Vec<JoinHandle<UploadOutcome>> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Vec::new();
        }
        self.timer_token.cancel();

        let mut uploads = Vec::new();
        loop {
            match self.flush() {
                Ok(Some(report)) => uploads.push(report.upload),
                Ok(None) => break,
                Err(e) => error!("CLS | Flush failed during shutdown: {}", e),
            }
        }
        info!(
            "CLS | Log shipper stopped after dispatching {} final batches",
            uploads.len()
        );

        if let Some(runtime) = self.take_runtime() {
            if Handle::try_current().is_ok() {
                warn!("CLS | Shutdown called from an async context, not waiting for uploads");
                runtime.shutdown_background();
            } else {
                runtime.block_on(self.uploader.wait_idle());
                runtime.shutdown_background();
            }
        }
        uploads
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Records queued or being flushed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn identity(&self) -> &HostIdentity {
        self.factory.identity()
    }

    #[must_use]
    pub fn record_factory(&self) -> &RecordFactory {
        &self.factory
    }

    /// Resolves once every upload dispatched so far has finished.
    pub async fn wait_for_uploads(&self) {
        self.uploader.wait_idle().await;
    }

    fn take_runtime(&self) -> Option<Runtime> {
        match self.runtime.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl Drop for LogShipper {
    fn drop(&mut self) {
        self.timer_token.cancel();
        if let Some(runtime) = self.take_runtime() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Compressor;
    use crate::errors::TransportError;
    use crate::proto::LogGroupList;
    use crate::uploader::SignedRequest;
    use async_trait::async_trait;
    use prost::Message;
    use std::collections::BTreeMap;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct CapturingTransport {
        requests: Mutex<Vec<SignedRequest>>,
    }

    impl CapturingTransport {
        fn groups(&self) -> Vec<crate::proto::LogGroup> {
            let compressor = Compressor::new(Default::default());
            self.requests
                .lock()
                .unwrap()
                .iter()
                .flat_map(|request| {
                    let payload = compressor.decompress(&request.body).unwrap();
                    LogGroupList::decode(payload.as_slice())
                        .unwrap()
                        .log_group_list
                })
                .collect()
        }

        fn records(&self) -> usize {
            self.groups().iter().map(|group| group.logs.len()).sum()
        }
    }

    #[async_trait]
    impl Transport for CapturingTransport {
        async fn send(&self, request: &SignedRequest) -> Result<u16, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(200)
        }
    }

    fn config() -> Config {
        Config {
            region: "ap-guangzhou".to_string(),
            secret_id: "AKIDexample".to_string(),
            secret_key: "secret".to_string(),
            topic_id: "topic-1".to_string(),
            hostname: Some("web-1".to_string()),
            ip: Some("10.0.0.7".to_string()),
            ..Default::default()
        }
        .with_flush_interval(5)
    }

    fn record(time: i64) -> LogRecord {
        LogRecord {
            time,
            datetime: String::new(),
            level: "INFO".to_string(),
            logger_name: "app".to_string(),
            thread_name: "main".to_string(),
            message: format!("m{time}"),
            formatted_message: format!("m{time}"),
            throwable: None,
            ip: "10.0.0.7".to_string(),
            hostname: "web-1".to_string(),
            extra: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_invalid_config_does_not_start() {
        let result = LogShipper::start_with_transport(
            Config::default(),
            Arc::new(CapturingTransport::default()),
        );
        assert!(matches!(result, Err(StartError::Config(_))));
    }

    #[tokio::test]
    async fn test_oversized_signature_ttl_does_not_start() {
        let result = LogShipper::start_with_transport(
            Config {
                signature_ttl_secs: u64::MAX,
                ..config()
            },
            Arc::new(CapturingTransport::default()),
        );
        assert!(matches!(result, Err(StartError::Config(_))));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unknown_region_is_reported_not_rejected() {
        let shipper = LogShipper::start_with_transport(
            Config {
                region: "mars-north-1".to_string(),
                ..config()
            },
            Arc::new(CapturingTransport::default()),
        )
        .unwrap();

        assert!(logs_contain("unknown region: mars-north-1"));
        assert_eq!(shipper.uploader.host(), "mars-north-1.cls.tencentcs.com");
        shipper.shutdown();
    }

    #[tokio::test]
    async fn test_flush_empty_queue_is_noop() {
        let transport = Arc::new(CapturingTransport::default());
        let shipper = LogShipper::start_with_transport(config(), transport.clone()).unwrap();

        assert!(shipper.flush().unwrap().is_none());
        assert!(shipper.flush().unwrap().is_none());
        shipper.wait_for_uploads().await;
        assert!(transport.requests.lock().unwrap().is_empty());
        shipper.shutdown();
    }

    #[tokio::test]
    async fn test_flush_tags_batch_with_source_and_flow() {
        let transport = Arc::new(CapturingTransport::default());
        let shipper = LogShipper::start_with_transport(config(), transport.clone()).unwrap();

        shipper.ingest(record(1));
        shipper.ingest(record(2));
        let report = shipper.flush().unwrap().unwrap();
        assert_eq!(report.records, 2);
        assert!(report.context_flow.ends_with("-1"));
        assert!(report.upload.await.unwrap().is_delivered());

        let groups = transport.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].source.as_deref(), Some("web-1(10.0.0.7)"));
        assert_eq!(groups[0].context_flow.as_deref(), Some(report.context_flow.as_str()));
        shipper.shutdown();
    }

    #[tokio::test]
    async fn test_threshold_triggers_flush_from_producer() {
        let transport = Arc::new(CapturingTransport::default());
        let shipper = LogShipper::start_with_transport(config(), transport.clone()).unwrap();
        let threshold = shipper.config().flush_threshold();

        for i in 0..threshold - 1 {
            shipper.ingest(record(i as i64));
        }
        assert_eq!(shipper.pending(), threshold - 1);

        shipper.ingest(record(threshold as i64));
        assert_eq!(shipper.pending(), 0);
        shipper.wait_for_uploads().await;
        assert_eq!(transport.records(), threshold);
        shipper.shutdown();
    }

    #[tokio::test]
    async fn test_capacity_drops_newest() {
        let transport = Arc::new(CapturingTransport::default());
        let shipper = LogShipper::start_with_transport(
            Config {
                max_pending: 5,
                ..config()
            },
            transport,
        )
        .unwrap();

        for i in 0..8 {
            shipper.ingest(record(i));
        }
        assert_eq!(shipper.pending(), 5);
        let report = shipper.flush().unwrap().unwrap();
        assert_eq!(report.records, 5);
        shipper.shutdown();
    }

    #[tokio::test]
    async fn test_backlog_waits_for_next_tick_by_default() {
        let transport = Arc::new(CapturingTransport::default());
        let shipper = LogShipper::start_with_transport(config(), transport).unwrap();
        for i in 0..7_000 {
            shipper.queue.enqueue(record(i));
        }

        shipper.flush_triggered();
        assert_eq!(shipper.pending(), 4_000);
        shipper.shutdown();
    }

    #[tokio::test]
    async fn test_drain_backlog_flushes_full_batches() {
        let transport = Arc::new(CapturingTransport::default());
        let shipper = LogShipper::start_with_transport(
            Config {
                drain_backlog: true,
                ..config()
            },
            transport,
        )
        .unwrap();
        for i in 0..7_000 {
            shipper.queue.enqueue(record(i));
        }

        shipper.flush_triggered();
        assert_eq!(shipper.pending(), 1_000);
        shipper.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue_and_is_idempotent() {
        let transport = Arc::new(CapturingTransport::default());
        let shipper = LogShipper::start_with_transport(config(), transport.clone()).unwrap();
        for i in 0..7_000 {
            shipper.queue.enqueue(record(i));
        }

        let uploads = shipper.shutdown();
        assert_eq!(uploads.len(), 3);
        for upload in uploads {
            assert!(upload.await.unwrap().is_delivered());
        }
        assert_eq!(transport.records(), 7_000);
        assert!(!shipper.is_running());
        assert!(shipper.shutdown().is_empty());

        shipper.ingest(record(1));
        assert_eq!(shipper.pending(), 0);
    }

    #[test]
    fn test_concurrent_ingest_and_flush_lose_nothing() {
        const PRODUCERS: i64 = 4;
        const PER_PRODUCER: i64 = 2_500;

        let transport = Arc::new(CapturingTransport::default());
        let shipper = LogShipper::start_with_transport(config(), transport.clone()).unwrap();
        let producing = Arc::new(AtomicBool::new(true));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let shipper = Arc::clone(&shipper);
                std::thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        shipper.ingest(record(p * PER_PRODUCER + i));
                    }
                })
            })
            .collect();
        let flushers: Vec<_> = (0..3)
            .map(|_| {
                let shipper = Arc::clone(&shipper);
                let producing = Arc::clone(&producing);
                std::thread::spawn(move || {
                    while producing.load(Ordering::Acquire) {
                        shipper.flush().unwrap();
                        std::thread::yield_now();
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        producing.store(false, Ordering::Release);
        for flusher in flushers {
            flusher.join().unwrap();
        }
        shipper.shutdown();

        assert_eq!(shipper.pending(), 0);
        let mut times: Vec<i64> = transport
            .groups()
            .iter()
            .flat_map(|group| group.logs.iter().map(|log| log.time))
            .collect();
        times.sort_unstable();
        let expected: Vec<i64> = (0..PRODUCERS * PER_PRODUCER).collect();
        assert_eq!(times, expected);
    }

    #[test]
    fn test_owned_runtime_finishes_uploads_on_shutdown() {
        let transport = Arc::new(CapturingTransport::default());
        let shipper = LogShipper::start_with_transport(config(), transport.clone()).unwrap();

        shipper.ingest_event(RawEvent {
            time: 1_700_000_000_000,
            level: "INFO".to_string(),
            logger: "app".to_string(),
            message: "from a plain thread".to_string(),
            ..Default::default()
        });
        let uploads = shipper.shutdown();
        assert_eq!(uploads.len(), 1);

        let groups = transport.groups();
        assert_eq!(groups.len(), 1);
        let message = groups[0].logs[0]
            .contents
            .iter()
            .find(|content| content.key == "formattedMessage")
            .map(|content| content.value.clone());
        assert_eq!(message.as_deref(), Some("from a plain thread"));
    }
}
