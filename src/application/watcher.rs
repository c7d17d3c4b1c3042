//! Periodic resolution of stale pending orders.
//!
//! The `RefundWatcher` runs as a background task owned by the service. On
//! every tick it re-reads the live settings and refunds any order that has
//! been pending for longer than the configured timeout.

use super::lifecycle::{LifecycleEngine, Transition};
use crate::config::{DEFAULT_POLL_INTERVAL, SettingsHandle};
use crate::domain::ports::{ClockRef, RecordRepository};
use crate::domain::record::RecordFilter;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a single sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pending orders inspected.
    pub scanned: usize,
    pub refunded: usize,
    /// Orders resolved by someone else between listing and refunding.
    pub skipped: usize,
    pub failed: usize,
}

pub struct RefundWatcher {
    engine: Arc<LifecycleEngine>,
    settings: SettingsHandle,
    clock: ClockRef,
    interval: Duration,
    shutdown: CancellationToken,
}

impl RefundWatcher {
    pub fn new(engine: Arc<LifecycleEngine>, settings: SettingsHandle, clock: ClockRef) -> Self {
        Self {
            engine,
            settings,
            clock,
            interval: DEFAULT_POLL_INTERVAL,
            shutdown: CancellationToken::new(),
        }
    }

    /// Set custom poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Token that stops the spawned loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawns the polling loop. It runs until the shutdown token is cancelled.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms = self.interval.as_millis() as u64, "refund watcher started");

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match self.tick().await {
                    Ok(report) if report.refunded > 0 || report.failed > 0 => {
                        info!(
                            scanned = report.scanned,
                            refunded = report.refunded,
                            skipped = report.skipped,
                            failed = report.failed,
                            "refund sweep finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "refund sweep failed"),
                }
            }
            info!("refund watcher stopped");
        })
    }

    /// Runs one sweep over all pending orders.
    ///
    /// Per-order failures are logged and counted; only a failure to list the
    /// pending orders is returned as an error.
    pub async fn tick(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        if !self.settings.current().auto_refund_enabled {
            debug!("auto-refund disabled, skipping sweep");
            return Ok(report);
        }

        let pending = self
            .engine
            .stores()
            .orders
            .list(&RecordFilter::pending())
            .await?;

        for order in pending {
            report.scanned += 1;

            // Settings may change while the sweep is running.
            let settings = self.settings.current();
            if !settings.auto_refund_enabled {
                debug!("auto-refund disabled mid-sweep, stopping");
                break;
            }
            let age_ms = (self.clock.now() - order.created_at).num_milliseconds();
            if age_ms < settings.auto_refund_timeout_ms() {
                continue;
            }

            match self
                .engine
                .expire_order(
                    &order.owner,
                    &order.storage_key,
                    settings.auto_refund_timeout_minutes,
                )
                .await
            {
                Ok(Transition::Applied) => report.refunded += 1,
                Ok(outcome) => {
                    debug!(key = %order.storage_key, ?outcome, "order resolved before refund");
                    report.skipped += 1;
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        account = %order.owner,
                        key = %order.storage_key,
                        order_id = %order.id,
                        error = %e,
                        "auto-refund contended, will retry next tick"
                    );
                    report.failed += 1;
                }
                Err(e) => {
                    error!(
                        account = %order.owner,
                        key = %order.storage_key,
                        order_id = %order.id,
                        error = %e,
                        "auto-refund failed"
                    );
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}
