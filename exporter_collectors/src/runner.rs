use crate::updater::{CycleReport, DynUpdater, UpdaterRegistry};
use exporter_core::{CancellationToken, CycleContext, Result, TtlCache};
use exporter_metrics::{CycleStatus, MetricsRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Drives one updater: a cycle on every tick or trigger, one at a time.
pub struct UpdateRunner {
    updater: DynUpdater,
    metrics: Arc<MetricsRegistry>,
    cache: Arc<TtlCache>,
    interval: Duration,
    trigger: Arc<Notify>,
}

impl UpdateRunner {
    pub fn new(
        updater: DynUpdater,
        metrics: Arc<MetricsRegistry>,
        cache: Arc<TtlCache>,
        interval: Duration,
    ) -> Self {
        Self {
            updater,
            metrics,
            cache,
            interval,
            trigger: Arc::new(Notify::new()),
        }
    }

    pub fn name(&self) -> &str {
        self.updater.name()
    }

    /// Notifying this handle starts a cycle without waiting for the timer.
    pub fn trigger(&self) -> Arc<Notify> {
        self.trigger.clone()
    }

    /// One full cycle under a fresh cycle scope derived from `root`.
    pub async fn run_once(&self, root: &CancellationToken) -> Result<CycleReport> {
        let cycle = CycleContext::new(self.updater.name(), root);
        let started = Instant::now();

        debug!(
            cycle_id = cycle.id(),
            updater = cycle.updater(),
            "Starting update cycle"
        );

        let outcome = self.updater.update(&cycle).await;
        let elapsed = started.elapsed();

        match &outcome {
            Ok(report) => {
                self.metrics
                    .cycles()
                    .record(self.updater.name(), CycleStatus::Success, elapsed);
                info!(
                    cycle_id = cycle.id(),
                    updater = cycle.updater(),
                    entities = report.entities,
                    skipped = report.skipped,
                    failed_branches = report.failed_branches,
                    series = report.series,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Update cycle published"
                );
            }
            Err(e) if e.is_cancellation() => {
                info!(
                    cycle_id = cycle.id(),
                    updater = cycle.updater(),
                    "Update cycle cancelled, previous snapshot kept"
                );
            }
            Err(e) => {
                self.metrics
                    .cycles()
                    .record(self.updater.name(), CycleStatus::Failed, elapsed);
                error!(
                    cycle_id = cycle.id(),
                    updater = cycle.updater(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Update cycle failed, previous snapshot kept: {}",
                    e
                );
            }
        }

        let purged = self.cache.purge_expired().await;
        if purged > 0 {
            debug!(
                cycle_id = cycle.id(),
                updater = cycle.updater(),
                purged,
                "Purged expired cache entries"
            );
        }

        outcome
    }

    /// Runs cycles until `root` is cancelled. The first cycle starts
    /// immediately.
    pub async fn run(self, root: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            updater = self.updater.name(),
            interval = ?self.interval,
            "Starting updater"
        );

        loop {
            tokio::select! {
                biased;
                _ = root.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => {
                    ticker.reset();
                }
            }

            // Errors are logged and counted in run_once; the loop keeps going.
            let _ = self.run_once(&root).await;
        }

        info!(updater = self.updater.name(), "Updater stopped");
    }
}

/// Spawns one runner per updater.
pub fn spawn_runners(
    updaters: &UpdaterRegistry,
    metrics: Arc<MetricsRegistry>,
    cache: Arc<TtlCache>,
    interval: Duration,
    root: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    if updaters.is_empty() {
        warn!("No updaters enabled, nothing will be collected");
    }

    updaters
        .updaters()
        .map(|updater| {
            let runner = UpdateRunner::new(
                updater.clone(),
                metrics.clone(),
                cache.clone(),
                interval,
            );
            tokio::spawn(runner.run(root.clone()))
        })
        .collect()
}
