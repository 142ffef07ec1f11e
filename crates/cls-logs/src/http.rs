// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client construction for the uploader.
//!
//! The client uses rustls, the configured request timeout, pooled keep-alive connections and,
//! when set, an HTTPS proxy. An unusable proxy setting falls back to a direct connection rather
//! than failing startup. In debug mode certificate verification is disabled; that decision is
//! made once, when the pipeline builds its client.

use crate::config::Config;
use core::time::Duration;
use tracing::{error, warn};

/// Builds the client for `config`, dropping the proxy if it cannot be applied.
pub fn build_client(config: &Config) -> Result<reqwest::Client, reqwest::Error> {
    match build_client_inner(config, true) {
        Ok(client) => Ok(client),
        Err(e) => {
            error!(
                "CLS | Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            build_client_inner(config, false)
        }
    }
}

fn build_client_inner(
    config: &Config,
    allow_proxy: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut client = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(config.request_timeout())
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if config.debug {
        warn!("CLS | Debug mode enabled, TLS certificate verification is disabled");
        client = client.danger_accept_invalid_certs(true);
    }

    if allow_proxy {
        if let Some(https_uri) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(https_uri.as_str())?;
            client = client.proxy(proxy);
        }
    }

    client.build()
}
