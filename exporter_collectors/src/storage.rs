//! Storage accounts and their blob containers.

use crate::lister::ResourceLister;
use crate::updater::{
    run_branch, AccountLabels, BranchFailures, CollectorContext, CycleReport, Updater,
};
use async_trait::async_trait;
use exporter_core::api::StorageAccount;
use exporter_core::{CycleContext, CyclePhase, ExporterError, Result, TaskGroup};
use exporter_metrics::{FamilySpec, SnapshotBuilder, SnapshotPublisher};
use std::sync::Arc;
use tracing::{debug, error};

pub const LEASE_STATES: &[&str] = &["available", "leased", "expired", "breaking", "broken"];

pub static ACCOUNT_CONTAINERS: FamilySpec = FamilySpec::gauge(
    "azure_storage_account_containers",
    "Number of blob containers in the storage account",
    &["subscription", "resource_group", "account"],
);

pub static CONTAINER_LEASE_STATE: FamilySpec = FamilySpec::gauge(
    "azure_storage_container_lease_state",
    "Lease state of the blob container",
    &["subscription", "resource_group", "account", "container", "state"],
)
.with_states(LEASE_STATES);

pub static FAMILIES: &[&FamilySpec] = &[&ACCOUNT_CONTAINERS, &CONTAINER_LEASE_STATE];

pub struct StorageUpdater {
    context: Arc<CollectorContext>,
    publisher: Arc<SnapshotPublisher>,
}

impl StorageUpdater {
    pub fn new(context: Arc<CollectorContext>) -> Result<Self> {
        let publisher = context.metrics.publisher("storage", FAMILIES)?;
        Ok(Self { context, publisher })
    }
}

#[async_trait]
impl Updater for StorageUpdater {
    fn name(&self) -> &str {
        "storage"
    }

    fn families(&self) -> &'static [&'static FamilySpec] {
        FAMILIES
    }

    fn publisher(&self) -> &Arc<SnapshotPublisher> {
        &self.publisher
    }

    async fn update(&self, cycle: &CycleContext) -> Result<CycleReport> {
        let context = &self.context;
        let subscription_id = context.subscription_id.as_str();

        debug!(
            cycle_id = cycle.id(),
            updater = cycle.updater(),
            phase = %CyclePhase::Listing,
            "Listing storage accounts"
        );
        let subscription = context.lister.subscription(cycle, subscription_id).await?;
        let accounts = context
            .lister
            .storage_accounts(cycle, subscription_id)
            .await?;

        let builder = Arc::new(self.publisher.builder(cycle));
        let failures = Arc::new(BranchFailures::default());
        let group = TaskGroup::with_default_capacity(cycle.token());
        let mut report = CycleReport::default();

        for account in accounts.iter() {
            if !context.predicate.matches(account) {
                debug!(
                    cycle_id = cycle.id(),
                    updater = cycle.updater(),
                    account = %account.name,
                    "Account skipped by autodiscovery"
                );
                report.skipped += 1;
                continue;
            }

            let labels = match AccountLabels::for_resource(
                subscription.label(),
                &account.id,
                &account.name,
            ) {
                Ok(labels) => labels,
                Err(e) => {
                    error!(
                        cycle_id = cycle.id(),
                        updater = cycle.updater(),
                        account = %account.name,
                        "Skipping account: {}",
                        e
                    );
                    report.skipped += 1;
                    continue;
                }
            };
            report.entities += 1;

            group
                .add(run_branch(
                    cycle.clone(),
                    "containers",
                    labels.account.clone(),
                    failures.clone(),
                    collect_containers(
                        context.lister.clone(),
                        cycle.clone(),
                        subscription_id.to_string(),
                        Arc::new(account.clone()),
                        labels,
                        builder.clone(),
                    ),
                ))
                .await?;
            report.branches += 1;
        }

        debug!(
            cycle_id = cycle.id(),
            updater = cycle.updater(),
            phase = %CyclePhase::Joining,
            branches = report.branches,
            "Waiting for storage branches"
        );
        let joined = group.wait().await;
        report.panicked_branches = joined.panicked;
        report.failed_branches = failures.count();

        if cycle.is_cancelled() {
            debug!(
                cycle_id = cycle.id(),
                updater = cycle.updater(),
                "Cycle cancelled, discarding partial snapshot"
            );
            return Err(ExporterError::Cancelled);
        }

        let snapshot = builder.finish();
        report.series = snapshot.len();
        report.generation = self.publisher.publish(snapshot);

        debug!(
            cycle_id = cycle.id(),
            updater = cycle.updater(),
            phase = %CyclePhase::Published,
            series = report.series,
            "Published storage snapshot"
        );

        Ok(report)
    }
}

async fn collect_containers(
    lister: Arc<ResourceLister>,
    cycle: CycleContext,
    subscription_id: String,
    account: Arc<StorageAccount>,
    labels: AccountLabels,
    builder: Arc<SnapshotBuilder>,
) -> Result<()> {
    let containers = lister
        .containers(&cycle, &subscription_id, &account)
        .await?;

    builder.set(
        &ACCOUNT_CONTAINERS,
        &labels.values(),
        containers.len() as f64,
    )?;

    for container in containers.iter() {
        if let Some(state) = &container.properties.lease_state {
            builder.set_state(
                &CONTAINER_LEASE_STATE,
                &labels.with(&[container.name.as_str()]),
                state,
            )?;
        }
    }

    debug!(
        cycle_id = cycle.id(),
        updater = cycle.updater(),
        account = %labels.account,
        containers = containers.len(),
        "Collected storage account"
    );

    Ok(())
}
