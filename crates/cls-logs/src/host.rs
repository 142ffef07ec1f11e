// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hostname and address detection for the record source.

use crate::config::Config;
use std::env;
use std::net::{IpAddr, ToSocketAddrs};
use tracing::warn;

/// How this process identifies itself on every record and batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub hostname: String,
    pub ip: String,
    /// Batch source label, `hostname(ip)` unless configured.
    pub source: String,
}

impl HostIdentity {
    /// Uses configured values where present and detects the rest.
    #[must_use]
    pub fn resolve(config: &Config) -> Self {
        let hostname = config.hostname.clone().unwrap_or_else(get_hostname);
        let ip = config.ip.clone().unwrap_or_else(|| get_ip(&hostname));
        let source = config
            .source
            .clone()
            .unwrap_or_else(|| format!("{hostname}({ip})"));
        Self {
            hostname,
            ip,
            source,
        }
    }
}

/// Get the system hostname
///
/// Tries the `HOSTNAME` environment variable, then `gethostname(2)`, then falls back to
/// `"unknown"`.
#[must_use]
pub fn get_hostname() -> String {
    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }

    match nix::unistd::gethostname() {
        Ok(hostname) => {
            if let Some(hostname) = hostname.to_str() {
                if !hostname.is_empty() {
                    return hostname.to_string();
                }
            }
        }
        Err(e) => {
            warn!("CLS | Failed to get system hostname: {}", e);
        }
    }

    warn!("CLS | Could not determine hostname, using 'unknown'");
    "unknown".to_string()
}

/// First address `hostname` resolves to, preferring IPv4. Empty when resolution fails.
#[must_use]
pub fn get_ip(hostname: &str) -> String {
    let addrs: Vec<IpAddr> = match (hostname, 0).to_socket_addrs() {
        Ok(addrs) => addrs.map(|addr| addr.ip()).collect(),
        Err(e) => {
            warn!("CLS | Failed to resolve local address for {}: {}", hostname, e);
            return String::new();
        }
    };

    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .map(ToString::to_string)
        .unwrap_or_default()
}
