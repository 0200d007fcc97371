use crate::config::ExporterConfig;
use crate::discovery::InclusionPredicate;
use crate::lister::ResourceLister;
use crate::{batch::BatchUpdater, storage::StorageUpdater};
use async_trait::async_trait;
use exporter_core::{CycleContext, DynResourceApi, ExporterError, ResourceId, Result, TtlCache};
use exporter_metrics::{FamilySpec, InstrumentedCaller, MetricsRegistry, SnapshotPublisher};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Resource kinds the exporter knows how to collect.
pub const KNOWN_UPDATERS: &[&str] = &["batch", "storage"];

/// Collects one resource kind and publishes it as a whole snapshot.
#[async_trait]
pub trait Updater: Send + Sync {
    fn name(&self) -> &str;

    fn families(&self) -> &'static [&'static FamilySpec];

    fn publisher(&self) -> &Arc<SnapshotPublisher>;

    /// Runs one cycle. `Ok` means a new snapshot was published. On `Err`
    /// the previously published snapshot stays exposed.
    async fn update(&self, cycle: &CycleContext) -> Result<CycleReport>;
}

pub type DynUpdater = Arc<dyn Updater>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Top-level resources that passed the inclusion predicate.
    pub entities: usize,
    pub skipped: usize,
    pub branches: usize,
    pub failed_branches: usize,
    pub panicked_branches: usize,
    pub series: usize,
    pub generation: u64,
}

/// Everything an updater needs from the rest of the process.
pub struct CollectorContext {
    pub subscription_id: String,
    pub lister: Arc<ResourceLister>,
    pub predicate: InclusionPredicate,
    pub metrics: Arc<MetricsRegistry>,
}

impl CollectorContext {
    pub fn new(
        config: &ExporterConfig,
        api: DynResourceApi,
        cache: Arc<TtlCache>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let caller = InstrumentedCaller::new(metrics.api_calls().clone(), config.call_timeout);
        Self {
            subscription_id: config.subscription_id.clone(),
            lister: Arc::new(ResourceLister::new(api, cache, caller, config.cache_ttl)),
            predicate: InclusionPredicate::from_config(&config.discovery),
            metrics,
        }
    }
}

/// Label values shared by every family of one top-level account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountLabels {
    pub subscription: String,
    pub resource_group: String,
    pub account: String,
}

impl AccountLabels {
    /// Labels for the account whose ARM id is `resource_id`.
    pub fn for_resource(subscription: &str, resource_id: &str, account: &str) -> Result<Self> {
        let id = ResourceId::parse(resource_id)?;
        Ok(Self {
            subscription: subscription.to_string(),
            resource_group: id.resource_group,
            account: account.to_string(),
        })
    }

    pub fn values(&self) -> [&str; 3] {
        [
            self.subscription.as_str(),
            self.resource_group.as_str(),
            self.account.as_str(),
        ]
    }

    /// Account labels followed by `extra`.
    pub fn with<'a>(&'a self, extra: &[&'a str]) -> Vec<&'a str> {
        let mut labels = self.values().to_vec();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Failure bookkeeping for the fan-out branches of one cycle.
#[derive(Debug, Default)]
pub struct BranchFailures(AtomicUsize);

impl BranchFailures {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs one fan-out branch. Errors stay inside the branch: they are logged
/// and counted, never returned.
pub async fn run_branch<F>(
    cycle: CycleContext,
    branch: &'static str,
    account: String,
    failures: Arc<BranchFailures>,
    work: F,
) where
    F: Future<Output = Result<()>>,
{
    match work.await {
        Ok(()) => debug!(
            cycle_id = cycle.id(),
            updater = cycle.updater(),
            branch,
            account = %account,
            "Branch completed"
        ),
        Err(e) if e.is_cancellation() => debug!(
            cycle_id = cycle.id(),
            updater = cycle.updater(),
            branch,
            account = %account,
            "Branch cancelled"
        ),
        Err(e) => {
            failures.0.fetch_add(1, Ordering::SeqCst);
            warn!(
                cycle_id = cycle.id(),
                updater = cycle.updater(),
                branch,
                account = %account,
                "Branch failed, it contributes no series this cycle: {}",
                e
            );
        }
    }
}

#[derive(Default)]
pub struct UpdaterRegistry {
    updaters: HashMap<String, DynUpdater>,
}

impl UpdaterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, updater: DynUpdater) {
        self.updaters.insert(updater.name().to_string(), updater);
    }

    pub fn get(&self, name: &str) -> Option<&DynUpdater> {
        self.updaters.get(name)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.updaters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn updaters(&self) -> impl Iterator<Item = &DynUpdater> {
        self.updaters.values()
    }

    pub fn len(&self) -> usize {
        self.updaters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updaters.is_empty()
    }

    /// Builds the named updaters. Each one registers its families with the
    /// metrics registry, so enabling a name twice fails.
    pub fn from_names<S: AsRef<str>>(names: &[S], context: Arc<CollectorContext>) -> Result<Self> {
        let mut registry = Self::new();

        for name in names {
            let updater: DynUpdater = match name.as_ref() {
                "batch" => Arc::new(BatchUpdater::new(context.clone())?),
                "storage" => Arc::new(StorageUpdater::new(context.clone())?),
                other => {
                    return Err(ExporterError::InvalidConfig(format!(
                        "Updater '{}' not found",
                        other
                    )))
                }
            };
            registry.register(updater);
        }

        Ok(registry)
    }
}
