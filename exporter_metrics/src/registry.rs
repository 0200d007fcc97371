use crate::family::FamilySpec;
use crate::snapshot::{SnapshotCollector, SnapshotPublisher};
use crate::summary::WindowedSummary;
use exporter_core::Result;
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Histogram buckets for remote call latency, in seconds.
pub const API_LATENCY_BUCKETS: &[f64] = &[
    0.01, 0.02, 0.03, 0.04, 0.05, 0.06, 0.07, 0.08, 0.09, 0.10, 0.15, 0.20, 0.30, 0.40, 0.50,
    1.0, 2.0,
];

/// Logical remote API a call goes to; the `api` label value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiSurface {
    Subscription,
    Batch,
    Storage,
}

impl ApiSurface {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiSurface::Subscription => "subscription",
            ApiSurface::Batch => "batch",
            ApiSurface::Storage => "storage",
        }
    }
}

impl fmt::Display for ApiSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-surface call accounting.
#[derive(Clone)]
pub struct ApiCallMetrics {
    pub calls_total: IntCounterVec,
    pub calls_failed_total: IntCounterVec,
    pub duration_summary: WindowedSummary,
    pub duration_histogram: HistogramVec,
}

impl ApiCallMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            calls_total: IntCounterVec::new(
                Opts::new("azure_api_calls_total", "Total number of remote API calls"),
                &["api"],
            )?,
            calls_failed_total: IntCounterVec::new(
                Opts::new(
                    "azure_api_calls_failed_total",
                    "Total number of failed remote API calls",
                ),
                &["api"],
            )?,
            duration_summary: WindowedSummary::new(
                "azure_api_calls_duration_seconds",
                "Remote API call latency",
                "api",
            )?,
            duration_histogram: HistogramVec::new(
                HistogramOpts::new(
                    "azure_api_calls_duration_seconds_hist",
                    "Remote API call latency histogram",
                )
                .buckets(API_LATENCY_BUCKETS.to_vec()),
                &["api"],
            )?,
        })
    }

    fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.calls_total.clone()))?;
        registry.register(Box::new(self.calls_failed_total.clone()))?;
        registry.register(Box::new(self.duration_summary.clone()))?;
        registry.register(Box::new(self.duration_histogram.clone()))?;
        Ok(())
    }

    pub fn observe_success(&self, api: ApiSurface, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        self.calls_total.with_label_values(&[api.as_str()]).inc();
        self.duration_summary.observe(api.as_str(), secs);
        self.duration_histogram
            .with_label_values(&[api.as_str()])
            .observe(secs);
    }

    pub fn observe_failure(&self, api: ApiSurface) {
        self.calls_failed_total
            .with_label_values(&[api.as_str()])
            .inc();
    }

    pub fn calls(&self, api: ApiSurface) -> u64 {
        self.calls_total.with_label_values(&[api.as_str()]).get()
    }

    pub fn failures(&self, api: ApiSurface) -> u64 {
        self.calls_failed_total
            .with_label_values(&[api.as_str()])
            .get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    Success,
    Failed,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Success => "success",
            CycleStatus::Failed => "failed",
        }
    }
}

/// Outcome and timing of update cycles, per updater.
#[derive(Clone)]
pub struct CycleMetrics {
    pub cycles_total: IntCounterVec,
    pub duration_seconds: GaugeVec,
    pub last_update_timestamp: GaugeVec,
}

impl CycleMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            cycles_total: IntCounterVec::new(
                Opts::new(
                    "azure_exporter_update_cycles_total",
                    "Completed update cycles by outcome",
                ),
                &["updater", "status"],
            )?,
            duration_seconds: GaugeVec::new(
                Opts::new(
                    "azure_exporter_update_duration_seconds",
                    "Duration of the last update cycle",
                ),
                &["updater"],
            )?,
            last_update_timestamp: GaugeVec::new(
                Opts::new(
                    "azure_exporter_last_update_timestamp_seconds",
                    "Unix time of the last published snapshot",
                ),
                &["updater"],
            )?,
        })
    }

    fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.cycles_total.clone()))?;
        registry.register(Box::new(self.duration_seconds.clone()))?;
        registry.register(Box::new(self.last_update_timestamp.clone()))?;
        Ok(())
    }

    pub fn record(&self, updater: &str, status: CycleStatus, elapsed: Duration) {
        self.cycles_total
            .with_label_values(&[updater, status.as_str()])
            .inc();
        self.duration_seconds
            .with_label_values(&[updater])
            .set(elapsed.as_secs_f64());
        if status == CycleStatus::Success {
            self.last_update_timestamp
                .with_label_values(&[updater])
                .set(chrono::Utc::now().timestamp_millis() as f64 / 1000.0);
        }
    }

    pub fn count(&self, updater: &str, status: CycleStatus) -> u64 {
        self.cycles_total
            .with_label_values(&[updater, status.as_str()])
            .get()
    }
}

/// Every metric the process exposes. Built once at startup and handed to
/// the components that record into it.
pub struct MetricsRegistry {
    registry: Registry,
    api_calls: ApiCallMetrics,
    cycles: CycleMetrics,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let api_calls = ApiCallMetrics::new()?;
        api_calls.register(&registry)?;
        let cycles = CycleMetrics::new()?;
        cycles.register(&registry)?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            api_calls,
            cycles,
        })
    }

    pub fn api_calls(&self) -> &ApiCallMetrics {
        &self.api_calls
    }

    pub fn cycles(&self) -> &CycleMetrics {
        &self.cycles
    }

    /// Creates a publisher for `families` and exposes its snapshots.
    /// Fails if any family is already registered.
    pub fn publisher(
        &self,
        name: &str,
        families: &[&'static FamilySpec],
    ) -> Result<Arc<SnapshotPublisher>> {
        let publisher = Arc::new(SnapshotPublisher::new(name, families));
        let collector = SnapshotCollector::new(publisher.clone())?;
        self.registry.register(Box::new(collector))?;
        Ok(publisher)
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotBuilder;

    static ACCOUNT_QUOTA: FamilySpec =
        FamilySpec::gauge("test_account_quota", "Quota", &["account"]);

    fn names(registry: &MetricsRegistry) -> Vec<String> {
        registry
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect()
    }

    #[test]
    fn test_api_metrics_are_labelled_by_surface() {
        let registry = MetricsRegistry::new().unwrap();
        let api = registry.api_calls();
        api.observe_success(ApiSurface::Batch, Duration::from_millis(30));
        api.observe_failure(ApiSurface::Storage);

        assert_eq!(api.calls(ApiSurface::Batch), 1);
        assert_eq!(api.failures(ApiSurface::Storage), 1);
        assert_eq!(api.failures(ApiSurface::Batch), 0);
        assert_eq!(
            api.duration_histogram
                .with_label_values(&["batch"])
                .get_sample_count(),
            1
        );

        let names = names(&registry);
        assert!(names.contains(&"azure_api_calls_total".to_string()));
        assert!(names.contains(&"azure_api_calls_duration_seconds".to_string()));
        assert!(names.contains(&"azure_api_calls_duration_seconds_hist".to_string()));
    }

    #[test]
    fn test_cycle_metrics() {
        let registry = MetricsRegistry::new().unwrap();
        let cycles = registry.cycles();
        cycles.record("batch", CycleStatus::Success, Duration::from_secs(2));
        cycles.record("batch", CycleStatus::Failed, Duration::from_secs(1));

        assert_eq!(cycles.count("batch", CycleStatus::Success), 1);
        assert_eq!(cycles.count("batch", CycleStatus::Failed), 1);
        assert_eq!(
            cycles.duration_seconds.with_label_values(&["batch"]).get(),
            1.0
        );
        assert!(
            cycles
                .last_update_timestamp
                .with_label_values(&["batch"])
                .get()
                > 0.0
        );
    }

    #[test]
    fn test_publisher_snapshots_are_gathered() {
        let registry = MetricsRegistry::new().unwrap();
        let publisher = registry.publisher("test", &[&ACCOUNT_QUOTA]).unwrap();
        assert!(!names(&registry).contains(&"test_account_quota".to_string()));

        let builder = SnapshotBuilder::new(&[&ACCOUNT_QUOTA]);
        builder.set(&ACCOUNT_QUOTA, &["a1"], 3.0).unwrap();
        publisher.publish(builder.finish());
        assert!(names(&registry).contains(&"test_account_quota".to_string()));
    }

    #[test]
    fn test_family_cannot_be_published_twice() {
        let registry = MetricsRegistry::new().unwrap();
        registry.publisher("one", &[&ACCOUNT_QUOTA]).unwrap();
        assert!(registry.publisher("two", &[&ACCOUNT_QUOTA]).is_err());
    }
}
