// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for configuration, startup and the flush path.

/// Problems found while loading or validating a [`crate::config::Config`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failures raised synchronously by a flush.
///
/// Transport failures are never reported here: once a request has been handed to the
/// uploader its fate is only visible through the returned join handle.
#[derive(Debug, thiserror::Error)]
pub enum ShipError {
    #[error("failed to encode log group: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("failed to compress payload: {0}")]
    Compress(#[source] std::io::Error),

    #[error("failed to decompress payload: {0}")]
    Decompress(String),

    #[error("failed to sign request: {0}")]
    Sign(String),
}

/// How a single send attempt failed, as far as the retry policy cares.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The endpoint host could not be resolved or reached; worth another attempt.
    #[error("host resolution failed: {0}")]
    HostResolution(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::HostResolution(_))
    }
}

/// Reasons the pipeline refused to start.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Renders `error` and every source below it, joined with `": "`.
#[must_use]
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut current = error.source();
    while let Some(err) = current {
        parts.push(err.to_string());
        current = err.source();
    }
    parts.join(": ")
}
