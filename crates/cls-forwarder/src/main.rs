// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use cls_logs::{Config, LogShipper, RawEvent};
use futures::future::join_all;
use std::env;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const STDIN_LOGGER: &str = "stdin";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("CLS_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let record_level = env::var("CLS_FORWARDER_LEVEL")
        .map(|val| val.to_uppercase())
        .unwrap_or("INFO".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading CLS configuration: {e}");
            return;
        }
    };

    let shipper = match LogShipper::start(config) {
        Ok(shipper) => shipper,
        Err(e) => {
            error!("Error starting CLS log shipper: {e}");
            return;
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    shipper.ingest_event(stdin_event(line, &record_level));
                }
                Ok(None) => {
                    debug!("stdin closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read stdin: {e}");
                    break;
                }
            },
            _ = &mut interrupt => {
                info!("Interrupted, draining pending records");
                break;
            }
        }
    }

    let results = join_all(shipper.shutdown()).await;
    let total = results.len();
    let mut delivered = 0;
    for result in results {
        match result {
            Ok(outcome) if outcome.is_delivered() => delivered += 1,
            Ok(outcome) => debug!("Final batch not delivered: {outcome:?}"),
            Err(e) => error!("Upload task failed: {e}"),
        }
    }
    shipper.wait_for_uploads().await;
    info!("Final batches delivered: {delivered}/{total}");
}

fn stdin_event(line: String, level: &str) -> RawEvent {
    RawEvent {
        time: chrono::Utc::now().timestamp_millis(),
        level: level.to_string(),
        logger: STDIN_LOGGER.to_string(),
        thread_name: STDIN_LOGGER.to_string(),
        message: line,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdin_event() {
        let event = stdin_event("GET /health 200".to_string(), "WARN");
        assert_eq!(event.logger, "stdin");
        assert_eq!(event.level, "WARN");
        assert_eq!(event.message, "GET /health 200");
        assert!(event.formatted_message.is_none());
        assert!(event.time > 0);
    }
}
