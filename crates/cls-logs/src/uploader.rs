// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Signed, compressed delivery of log groups to the CLS upload API.
//!
//! ```text
//!   LogGroup
//!       │
//!       v
//!   ┌─────────────┐
//!   │  Serialize  │ (LogGroupList protobuf)
//!   └──────┬──────┘
//!          v
//!   ┌─────────────┐
//!   │  Compress   │ (lz4 / zstd)
//!   └──────┬──────┘
//!          v
//!   ┌─────────────┐
//!   │    Sign     │ (Authorization)
//!   └──────┬──────┘
//!          v
//!   ┌─────────────┐
//!   │ HTTP POST   │ (spawned, caller never waits)
//!   └──────┬──────┘
//!          v
//!   ┌─────────────┐
//!   │   Retry?    │ (host resolution failures only)
//!   └─────────────┘
//! ```
//!
//! Any HTTP response, whatever its status, counts as delivered. Failures other than host
//! resolution are logged and dropped.

use crate::batch::serialize;
use crate::compression::Compressor;
use crate::config::Config;
use crate::errors::{error_chain, ShipError, TransportError};
use crate::proto::LogGroup;
use crate::signature::Signer;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::error::Error;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

pub const UPLOAD_PATH: &str = "/structuredlog";
pub const COMPRESS_TYPE_HEADER: &str = "x-cls-compress-type";
pub const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";
const UPLOAD_METHOD: &str = "POST";

/// A fully built upload: re-sent byte for byte on every retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl SignedRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Sends one request and reports the HTTP status it was answered with.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &SignedRequest) -> Result<u16, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &SignedRequest) -> Result<u16, TransportError> {
        let mut builder = self.client.post(&request.url).body(request.body.clone());
        for (name, value) in &request.headers {
            // reqwest derives Host from the URL, which carries the same authority.
            if name.eq_ignore_ascii_case("host") {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }

        match builder.send().await {
            Ok(response) => Ok(response.status().as_u16()),
            Err(e) => Err(classify(&e)),
        }
    }
}

/// Maps a reqwest failure onto the retry policy.
#[must_use]
pub fn classify(error: &reqwest::Error) -> TransportError {
    let detail = error_chain(error);
    if is_host_resolution(error) {
        TransportError::HostResolution(detail)
    } else {
        TransportError::Other(detail)
    }
}

fn is_host_resolution(error: &(dyn Error + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable
            ) {
                return true;
            }
        }
        let text = err.to_string();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return true;
        }
        current = err.source();
    }
    false
}

/// One request plus the retries it has used so far.
#[derive(Debug, Clone)]
pub struct RetryTask {
    request: Arc<SignedRequest>,
    retries: u32,
    max_retries: u32,
}

impl RetryTask {
    #[must_use]
    pub fn new(request: Arc<SignedRequest>, max_retries: u32) -> Self {
        Self {
            request,
            retries: 0,
            max_retries,
        }
    }

    #[must_use]
    pub fn request(&self) -> &SignedRequest {
        &self.request
    }

    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Sends made so far, counting the one in flight.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// The next attempt, or `None` once the retry budget is spent.
    #[must_use]
    pub fn retry(self) -> Option<Self> {
        let retries = self.retries + 1;
        (retries <= self.max_retries).then_some(Self { retries, ..self })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The endpoint answered; the status is informational only.
    Delivered { status: u16, attempts: u32 },
    Abandoned {
        attempts: u32,
        error: TransportError,
    },
}

impl UploadOutcome {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts, .. } | Self::Abandoned { attempts, .. } => *attempts,
        }
    }

    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

pub struct Uploader {
    transport: Arc<dyn Transport>,
    runtime: Handle,
    config: Arc<Config>,
    host: String,
    signer: Signer,
    compressor: Compressor,
    in_flight: TaskTracker,
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("host", &self.host)
            .field("compressor", &self.compressor)
            .field("max_retries", &self.config.max_retries)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl Uploader {
    #[must_use]
    pub fn new(config: Arc<Config>, transport: Arc<dyn Transport>, runtime: Handle) -> Self {
        let signer = Signer::new(
            config.secret_id.clone(),
            config.secret_key.clone(),
            config.signature_ttl(),
        );
        Self {
            transport,
            runtime,
            host: config.host(),
            signer,
            compressor: Compressor::new(config.compression),
            config,
            in_flight: TaskTracker::new(),
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Serializes, compresses and signs `group` for `topic_id`.
    pub fn prepare(&self, topic_id: &str, group: LogGroup) -> Result<SignedRequest, ShipError> {
        let payload = serialize(group)?;
        let body = self.compressor.compress(&payload)?;

        let mut signed_headers = BTreeMap::from([("Host".to_string(), self.host.clone())]);
        if let Some(scheme) = self.compressor.kind().header_value() {
            signed_headers.insert(COMPRESS_TYPE_HEADER.to_string(), scheme.to_string());
        }
        let params = BTreeMap::from([("topic_id".to_string(), topic_id.to_string())]);
        let authorization = self
            .signer
            .sign(UPLOAD_METHOD, UPLOAD_PATH, &params, &signed_headers)?;

        let mut headers = vec![
            ("Authorization".to_string(), authorization),
            ("Content-Type".to_string(), CONTENT_TYPE_PROTOBUF.to_string()),
        ];
        headers.extend(signed_headers);

        Ok(SignedRequest {
            url: self.config.upload_url(topic_id),
            headers,
            body: Bytes::from(body),
        })
    }

    /// Spawns the send loop for `request` and returns without waiting on the network.
    pub fn dispatch(&self, request: SignedRequest) -> JoinHandle<UploadOutcome> {
        let task = RetryTask::new(Arc::new(request), self.config.max_retries);
        self.in_flight
            .spawn_on(run_upload(Arc::clone(&self.transport), task), &self.runtime)
    }

    pub fn submit(
        &self,
        topic_id: &str,
        group: LogGroup,
    ) -> Result<JoinHandle<UploadOutcome>, ShipError> {
        let request = self.prepare(topic_id, group)?;
        Ok(self.dispatch(request))
    }

    /// Uploads spawned and not yet finished, retries included.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Resolves once every upload dispatched so far has finished.
    pub async fn wait_idle(&self) {
        self.in_flight.close();
        self.in_flight.wait().await;
        self.in_flight.reopen();
    }
}

async fn run_upload(transport: Arc<dyn Transport>, mut task: RetryTask) -> UploadOutcome {
    loop {
        let result = transport.send(task.request()).await;
        match result {
            Ok(status) => {
                if !(200..300).contains(&status) {
                    warn!("CLS | Upload answered with HTTP {}", status);
                }
                return UploadOutcome::Delivered {
                    status,
                    attempts: task.attempts(),
                };
            }
            Err(error) if error.is_retryable() => {
                let attempts = task.attempts();
                match task.retry() {
                    Some(next) => {
                        debug!(
                            "CLS | Upload attempt {} failed, retrying ({}/{}): {}",
                            attempts,
                            next.retries(),
                            next.max_retries(),
                            error
                        );
                        task = next;
                    }
                    None => {
                        debug!(
                            "CLS | Upload failed after {} attempts, dropping batch: {}",
                            attempts, error
                        );
                        return UploadOutcome::Abandoned { attempts, error };
                    }
                }
            }
            Err(error) => {
                debug!("CLS | Upload failed, dropping batch: {}", error);
                return UploadOutcome::Abandoned {
                    attempts: task.attempts(),
                    error,
                };
            }
        }
    }
}
