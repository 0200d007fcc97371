use crate::registry::{ApiCallMetrics, ApiSurface};
use exporter_core::{CycleContext, ExporterError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Runs remote calls inside a timeout and cancellation scope and accounts
/// for them per API surface.
#[derive(Clone)]
pub struct InstrumentedCaller {
    metrics: ApiCallMetrics,
    timeout: Duration,
}

impl InstrumentedCaller {
    pub fn new(metrics: ApiCallMetrics, timeout: Duration) -> Self {
        Self { metrics, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn metrics(&self) -> &ApiCallMetrics {
        &self.metrics
    }

    pub async fn execute<T, F>(
        &self,
        cycle: &CycleContext,
        api: ApiSurface,
        operation: &str,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.execute_with_timeout(cycle, api, operation, self.timeout, call)
            .await
    }

    /// Success counts the call and records its latency. Failure bumps the
    /// failed counter, except when the cycle itself was cancelled.
    pub async fn execute_with_timeout<T, F>(
        &self,
        cycle: &CycleContext,
        api: ApiSurface,
        operation: &str,
        timeout: Duration,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = cycle.token().cancelled() => Err(ExporterError::Cancelled),
            res = tokio::time::timeout(timeout, call) => match res {
                Ok(result) => result,
                Err(_) => Err(ExporterError::Timeout(timeout)),
            },
        };

        let elapsed = started.elapsed();
        match &outcome {
            Ok(_) => {
                self.metrics.observe_success(api, elapsed);
                debug!(
                    cycle_id = cycle.id(),
                    updater = cycle.updater(),
                    api = %api,
                    operation,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Remote call succeeded"
                );
            }
            Err(e) if e.is_cancellation() || cycle.is_cancelled() => {
                debug!(
                    cycle_id = cycle.id(),
                    updater = cycle.updater(),
                    api = %api,
                    operation,
                    "Remote call cancelled"
                );
            }
            Err(e) => {
                self.metrics.observe_failure(api);
                warn!(
                    cycle_id = cycle.id(),
                    updater = cycle.updater(),
                    api = %api,
                    operation,
                    elapsed_ms = elapsed.as_millis() as u64,
                    transient = e.is_transient(),
                    "Remote call failed: {}",
                    e
                );
            }
        }

        outcome
    }
}
