// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic ping/pong sweep over a connection set.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::connection::{CloseReason, PingOutcome};
use crate::room::ConnectionSet;

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: usize,
    pub evicted: usize,
    /// Already-closed members dropped from the set.
    pub pruned: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Run one sweep: expire connections whose last ping went unanswered, ping
/// the rest.
pub fn sweep(set: &ConnectionSet) -> SweepReport {
    let mut report = SweepReport::default();

    for conn in set.snapshot() {
        if !conn.is_open() {
            let reason = conn.close_reason().unwrap_or(CloseReason::Peer);
            if set.remove(conn.id(), reason) {
                report.pruned += 1;
            }
            continue;
        }

        match conn.ping() {
            PingOutcome::Pinged => report.pinged += 1,
            PingOutcome::PingDropped => {
                tracing::debug!(
                    set = %set.label(),
                    conn_id = %conn.id(),
                    "liveness ping dropped, outbound queue full"
                );
                report.pinged += 1;
            }
            PingOutcome::Expired => {
                tracing::warn!(
                    set = %set.label(),
                    conn_id = %conn.id(),
                    actor_id = %conn.actor_id(),
                    "terminating connection after unanswered liveness ping"
                );
                conn.close(CloseReason::Timeout);
                set.remove(conn.id(), CloseReason::Timeout);
                report.evicted += 1;
            }
        }
    }

    report
}

/// Spawn the monitor for one connection set. The first sweep runs one full
/// interval after start.
pub fn spawn_liveness_monitor(
    set: Arc<ConnectionSet>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval_at(Instant::now() + interval, interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let report = sweep(&set);
            if !report.is_empty() {
                tracing::debug!(
                    set = %set.label(),
                    pinged = report.pinged,
                    evicted = report.evicted,
                    pruned = report.pruned,
                    "liveness sweep"
                );
            }
        }

        tracing::debug!(set = %set.label(), "liveness monitor stopped");
    })
}

#[cfg(test)]
#[path = "liveness_tests.rs"]
mod tests;
