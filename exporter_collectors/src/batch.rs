//! Batch accounts, their pools and jobs.
//!
//! Listing: subscription and batch accounts. Fan-out: per included account,
//! one "pools" branch and one "jobs" branch. Those submit one task per pool
//! (compute nodes) and one per job (task counts) into the same group.

use crate::lister::ResourceLister;
use crate::updater::{
    run_branch, AccountLabels, BranchFailures, CollectorContext, CycleReport, Updater,
};
use async_trait::async_trait;
use exporter_core::api::{BatchAccount, Job, Pool, TaskCounts};
use exporter_core::{CycleContext, CyclePhase, ExporterError, Result, TaskGroup};
use exporter_metrics::{FamilySpec, SnapshotBuilder, SnapshotPublisher};
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const POOL_ALLOCATION_STATES: &[&str] = &["steady", "resizing", "stopping"];

pub const NODE_STATES: &[&str] = &[
    "idle",
    "rebooting",
    "reimaging",
    "running",
    "unusable",
    "creating",
    "starting",
    "waitingForStartTask",
    "startTaskFailed",
    "unknown",
    "leavingPool",
    "offline",
    "preempted",
];

pub const JOB_STATES: &[&str] = &[
    "active",
    "disabling",
    "disabled",
    "enabling",
    "terminating",
    "completed",
    "deleting",
];

pub static POOL_QUOTA: FamilySpec = FamilySpec::gauge(
    "azure_batch_pool_quota",
    "Azure Batch pool quota",
    &["subscription", "resource_group", "account"],
);

pub static DEDICATED_CORE_QUOTA: FamilySpec = FamilySpec::gauge(
    "azure_batch_dedicated_core_quota",
    "Azure Batch dedicated core quota",
    &["subscription", "resource_group", "account"],
);

pub static LOW_PRIORITY_CORE_QUOTA: FamilySpec = FamilySpec::gauge(
    "azure_batch_low_priority_core_quota",
    "Azure Batch low priority core quota",
    &["subscription", "resource_group", "account"],
);

pub static POOL_DEDICATED_NODES: FamilySpec = FamilySpec::gauge(
    "azure_batch_pool_dedicated_nodes",
    "Current dedicated nodes of the pool",
    &["subscription", "resource_group", "account", "pool"],
);

pub static POOL_LOW_PRIORITY_NODES: FamilySpec = FamilySpec::gauge(
    "azure_batch_pool_low_priority_nodes",
    "Current low priority nodes of the pool",
    &["subscription", "resource_group", "account", "pool"],
);

pub static POOL_ALLOCATION_STATE: FamilySpec = FamilySpec::gauge(
    "azure_batch_pool_allocation_state",
    "Allocation state of the pool",
    &["subscription", "resource_group", "account", "pool", "state"],
)
.with_states(POOL_ALLOCATION_STATES);

pub static POOL_NODE_STATE: FamilySpec = FamilySpec::gauge(
    "azure_batch_pool_node_state",
    "Number of compute nodes of the pool per state",
    &["subscription", "resource_group", "account", "pool", "state"],
)
.with_states(NODE_STATES);

pub static POOL_METADATA: FamilySpec = FamilySpec::gauge(
    "azure_batch_pool_metadata",
    "Metadata of the pool",
    &["subscription", "resource_group", "account", "pool", "metadata", "value"],
);

pub static JOB_STATE: FamilySpec = FamilySpec::gauge(
    "azure_batch_job_state",
    "State of the job",
    &["subscription", "resource_group", "account", "job_id", "state"],
)
.with_states(JOB_STATES);

pub static JOB_METADATA: FamilySpec = FamilySpec::gauge(
    "azure_batch_job_metadata",
    "Metadata of the job",
    &["subscription", "resource_group", "account", "job_id", "metadata", "value"],
);

pub static JOB_INFO: FamilySpec = FamilySpec::gauge(
    "azure_batch_job_info",
    "Information about the job",
    &["subscription", "resource_group", "account", "job_id", "job_name", "pool"],
);

pub static JOB_TASKS_ACTIVE: FamilySpec = FamilySpec::gauge(
    "azure_batch_job_tasks_active",
    "Active tasks of the job",
    &["subscription", "resource_group", "account", "job_id"],
);

pub static JOB_TASKS_RUNNING: FamilySpec = FamilySpec::gauge(
    "azure_batch_job_tasks_running",
    "Running tasks of the job",
    &["subscription", "resource_group", "account", "job_id"],
);

pub static JOB_TASKS_COMPLETED: FamilySpec = FamilySpec::counter(
    "azure_batch_job_tasks_completed_total",
    "Completed tasks of the job",
    &["subscription", "resource_group", "account", "job_id"],
);

pub static JOB_TASKS_SUCCEEDED: FamilySpec = FamilySpec::counter(
    "azure_batch_job_tasks_succeeded_total",
    "Succeeded tasks of the job",
    &["subscription", "resource_group", "account", "job_id"],
);

pub static JOB_TASKS_FAILED: FamilySpec = FamilySpec::counter(
    "azure_batch_job_tasks_failed_total",
    "Failed tasks of the job",
    &["subscription", "resource_group", "account", "job_id"],
);

pub static FAMILIES: &[&FamilySpec] = &[
    &POOL_QUOTA,
    &DEDICATED_CORE_QUOTA,
    &LOW_PRIORITY_CORE_QUOTA,
    &POOL_DEDICATED_NODES,
    &POOL_LOW_PRIORITY_NODES,
    &POOL_ALLOCATION_STATE,
    &POOL_NODE_STATE,
    &POOL_METADATA,
    &JOB_STATE,
    &JOB_METADATA,
    &JOB_INFO,
    &JOB_TASKS_ACTIVE,
    &JOB_TASKS_RUNNING,
    &JOB_TASKS_COMPLETED,
    &JOB_TASKS_SUCCEEDED,
    &JOB_TASKS_FAILED,
];

pub struct BatchUpdater {
    context: Arc<CollectorContext>,
    publisher: Arc<SnapshotPublisher>,
}

impl BatchUpdater {
    pub fn new(context: Arc<CollectorContext>) -> Result<Self> {
        let publisher = context.metrics.publisher("batch", FAMILIES)?;
        Ok(Self { context, publisher })
    }
}

#[async_trait]
impl Updater for BatchUpdater {
    fn name(&self) -> &str {
        "batch"
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
            "Listing batch accounts"
        );
        let subscription = context.lister.subscription(cycle, subscription_id).await?;
        let accounts = context.lister.batch_accounts(cycle, subscription_id).await?;

        let builder = Arc::new(self.publisher.builder(cycle));
        let failures = Arc::new(BranchFailures::default());
        let group = Arc::new(TaskGroup::with_default_capacity(cycle.token()));
        let mut report = CycleReport::default();

        debug!(
            cycle_id = cycle.id(),
            updater = cycle.updater(),
            phase = %CyclePhase::FanOut,
            accounts = accounts.len(),
            "Fanning out over batch accounts"
        );

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

            if let Err(e) = record_account(&builder, &labels, account) {
                warn!(
                    cycle_id = cycle.id(),
                    updater = cycle.updater(),
                    account = %account.name,
                    "Dropping account quotas: {}",
                    e
                );
            }

            let account = Arc::new(account.clone());

            group
                .add(run_branch(
                    cycle.clone(),
                    "pools",
                    labels.account.clone(),
                    failures.clone(),
                    collect_pools(
                        context.lister.clone(),
                        group.clone(),
                        cycle.clone(),
                        account.clone(),
                        labels.clone(),
                        builder.clone(),
                    ),
                ))
                .await?;

            group
                .add(run_branch(
                    cycle.clone(),
                    "jobs",
                    labels.account.clone(),
                    failures.clone(),
                    collect_jobs(
                        context.lister.clone(),
                        group.clone(),
                        cycle.clone(),
                        account,
                        labels,
                        builder.clone(),
                    ),
                ))
                .await?;

            report.branches += 2;
        }

        debug!(
            cycle_id = cycle.id(),
            updater = cycle.updater(),
            phase = %CyclePhase::Joining,
            branches = report.branches,
            "Waiting for batch branches"
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
            "Published batch snapshot"
        );

        Ok(report)
    }
}

fn record_account(
    builder: &SnapshotBuilder,
    labels: &AccountLabels,
    account: &BatchAccount,
) -> Result<()> {
    let values = labels.values();
    let properties = &account.properties;

    if let Some(quota) = properties.pool_quota {
        builder.set(&POOL_QUOTA, &values, quota as f64)?;
    }
    if let Some(quota) = properties.dedicated_core_quota {
        builder.set(&DEDICATED_CORE_QUOTA, &values, quota as f64)?;
    }
    if let Some(quota) = properties.low_priority_core_quota {
        builder.set(&LOW_PRIORITY_CORE_QUOTA, &values, quota as f64)?;
    }
    Ok(())
}

async fn collect_pools(
    lister: Arc<ResourceLister>,
    group: Arc<TaskGroup>,
    cycle: CycleContext,
    account: Arc<BatchAccount>,
    labels: AccountLabels,
    builder: Arc<SnapshotBuilder>,
) -> Result<()> {
    let pools = lister.pools(&cycle, &account).await?;

    for pool in &pools {
        record_pool(&builder, &labels, pool)?;
        group.submit(collect_nodes(
            lister.clone(),
            cycle.clone(),
            account.clone(),
            labels.clone(),
            pool.name.clone(),
            builder.clone(),
        ));
    }

    Ok(())
}

/// Node states of one pool. A failed listing leaves no node-state series
/// for the pool; its other series are unaffected.
async fn collect_nodes(
    lister: Arc<ResourceLister>,
    cycle: CycleContext,
    account: Arc<BatchAccount>,
    labels: AccountLabels,
    pool_id: String,
    builder: Arc<SnapshotBuilder>,
) {
    let nodes = match lister.compute_nodes(&cycle, &account, &pool_id).await {
        Ok(nodes) => nodes,
        Err(e) if e.is_cancellation() => return,
        Err(e) => {
            error!(
                cycle_id = cycle.id(),
                updater = cycle.updater(),
                account = %labels.account,
                pool = %pool_id,
                "Unable to list compute nodes: {}",
                e
            );
            return;
        }
    };

    let entity = labels.with(&[pool_id.as_str()]);
    let recorded = builder.zero_states(&POOL_NODE_STATE, &entity).and_then(|_| {
        nodes
            .iter()
            .try_for_each(|node| builder.count_state(&POOL_NODE_STATE, &entity, &node.state))
    });

    match recorded {
        Ok(()) => debug!(
            cycle_id = cycle.id(),
            updater = cycle.updater(),
            account = %labels.account,
            pool = %pool_id,
            nodes = nodes.len(),
            "Collected pool"
        ),
        Err(e) => warn!(
            cycle_id = cycle.id(),
            updater = cycle.updater(),
            account = %labels.account,
            pool = %pool_id,
            "Dropping node states: {}",
            e
        ),
    }
}

fn record_pool(builder: &SnapshotBuilder, labels: &AccountLabels, pool: &Pool) -> Result<()> {
    let pool_id = pool.name.as_str();
    let entity = labels.with(&[pool_id]);
    let properties = &pool.properties;

    builder.set(
        &POOL_DEDICATED_NODES,
        &entity,
        properties.current_dedicated_nodes as f64,
    )?;
    builder.set(
        &POOL_LOW_PRIORITY_NODES,
        &entity,
        properties.current_low_priority_nodes as f64,
    )?;

    if let Some(state) = &properties.allocation_state {
        builder.set_state(&POOL_ALLOCATION_STATE, &entity, state)?;
    }

    for item in &properties.metadata {
        builder.set(
            &POOL_METADATA,
            &labels.with(&[pool_id, item.name.as_str(), item.value.as_str()]),
            1.0,
        )?;
    }

    Ok(())
}

async fn collect_jobs(
    lister: Arc<ResourceLister>,
    group: Arc<TaskGroup>,
    cycle: CycleContext,
    account: Arc<BatchAccount>,
    labels: AccountLabels,
    builder: Arc<SnapshotBuilder>,
) -> Result<()> {
    let jobs = lister.jobs(&cycle, &account).await?;

    for job in jobs {
        let entity = labels.with(&[job.id.as_str()]);
        builder.set_state(&JOB_STATE, &entity, &job.state)?;

        for item in &job.metadata {
            builder.set(
                &JOB_METADATA,
                &labels.with(&[job.id.as_str(), item.name.as_str(), item.value.as_str()]),
                1.0,
            )?;
        }

        group.submit(collect_task_counts(
            lister.clone(),
            cycle.clone(),
            account.clone(),
            labels.clone(),
            job,
            builder.clone(),
        ));
    }

    Ok(())
}

/// Task counts of one job. A failed call leaves no task-count or info
/// series for the job.
async fn collect_task_counts(
    lister: Arc<ResourceLister>,
    cycle: CycleContext,
    account: Arc<BatchAccount>,
    labels: AccountLabels,
    job: Job,
    builder: Arc<SnapshotBuilder>,
) {
    let counts = match lister.task_counts(&cycle, &account, &job.id).await {
        Ok(counts) => counts,
        Err(e) if e.is_cancellation() => return,
        Err(e) => {
            error!(
                cycle_id = cycle.id(),
                updater = cycle.updater(),
                account = %labels.account,
                job_id = %job.id,
                "Unable to get job task counts: {}",
                e
            );
            return;
        }
    };

    match record_task_counts(&builder, &labels, &job, &counts) {
        Ok(()) => debug!(
            cycle_id = cycle.id(),
            updater = cycle.updater(),
            account = %labels.account,
            job_id = %job.id,
            active = counts.active,
            running = counts.running,
            failed = counts.failed,
            "Collected job"
        ),
        Err(e) => warn!(
            cycle_id = cycle.id(),
            updater = cycle.updater(),
            account = %labels.account,
            job_id = %job.id,
            "Dropping job task counts: {}",
            e
        ),
    }
}

fn record_task_counts(
    builder: &SnapshotBuilder,
    labels: &AccountLabels,
    job: &Job,
    counts: &TaskCounts,
) -> Result<()> {
    let entity = labels.with(&[job.id.as_str()]);
    let pool = job.pool_info.pool_id.as_deref().unwrap_or_default();

    builder.set(&JOB_TASKS_ACTIVE, &entity, counts.active as f64)?;
    builder.set(&JOB_TASKS_RUNNING, &entity, counts.running as f64)?;
    builder.set(&JOB_TASKS_COMPLETED, &entity, counts.completed as f64)?;
    builder.set(&JOB_TASKS_SUCCEEDED, &entity, counts.succeeded as f64)?;
    builder.set(&JOB_TASKS_FAILED, &entity, counts.failed as f64)?;
    builder.set(
        &JOB_INFO,
        &labels.with(&[job.id.as_str(), job.label_name(), pool]),
        1.0,
    )?;

    Ok(())
}
