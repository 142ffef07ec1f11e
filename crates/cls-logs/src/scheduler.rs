// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The two flush triggers: a periodic timer and the pending-count threshold.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// True once `pending` has reached the flush threshold.
#[must_use]
pub fn threshold_reached(pending: usize, threshold: usize) -> bool {
    pending >= threshold
}

/// Calls `flush` every `period` until `cancel_token` fires.
///
/// The first tick is one full period after the call. A tick that falls behind a slow flush is
/// delayed rather than bunched up.
pub fn spawn_timer<F>(
    runtime: &Handle,
    period: Duration,
    cancel_token: CancellationToken,
    flush: F,
) -> JoinHandle<()>
where
    F: Fn() + Send + 'static,
{
    runtime.spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // discard first tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    trace!("CLS | Timer tick");
                    flush();
                }
                () = cancel_token.cancelled() => {
                    debug!("CLS | Flush timer stopped");
                    break;
                }
            }
        }
    })
}
