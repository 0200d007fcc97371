mod common;

use common::*;
use exporter_collectors::batch::{JOB_STATES, NODE_STATES};
use exporter_collectors::{BatchUpdater, Updater, UpdaterRegistry};
use exporter_core::api::TaskCounts;
use exporter_core::{CancellationToken, CycleContext, ExporterError};
use exporter_metrics::{ApiSurface, PrometheusExporter};
use std::time::Duration;

const RG: &str = "rg-batch";
const SUB_LABEL: &str = "Production";

fn scenario() -> FakeState {
    let mut state = FakeState {
        display_name: SUB_LABEL.to_string(),
        batch_accounts: vec![
            batch_account("A1", &[("monitor", "true")]),
            batch_account("A2", &[]),
        ],
        ..FakeState::default()
    };
    state
        .pools
        .insert("A1".into(), vec![pool("P1", 3, "Steady")]);
    state
        .nodes
        .insert(("A1".into(), "P1".into()), nodes("idle", 3));
    state.pools.insert("A2".into(), vec![pool("P9", 7, "Steady")]);
    state
}

fn cycle(root: &CancellationToken) -> CycleContext {
    CycleContext::new("batch", root)
}

#[tokio::test]
async fn test_tagged_account_scenario() {
    let h = harness(scenario(), &[("monitor", "true")]);
    let updater = BatchUpdater::new(h.context.clone()).unwrap();
    let root = CancellationToken::new();

    let report = updater.update(&cycle(&root)).await.unwrap();
    assert_eq!(report.entities, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed_branches, 0);

    let snapshot = updater.publisher().current();
    assert_eq!(
        snapshot.get(
            "azure_batch_pool_dedicated_nodes",
            &[SUB_LABEL, RG, "A1", "P1"]
        ),
        Some(3.0)
    );
    assert_eq!(
        snapshot.get(
            "azure_batch_pool_node_state",
            &[SUB_LABEL, RG, "A1", "P1", "idle"]
        ),
        Some(3.0)
    );
    for state in NODE_STATES.iter().filter(|s| **s != "idle") {
        assert_eq!(
            snapshot.get(
                "azure_batch_pool_node_state",
                &[SUB_LABEL, RG, "A1", "P1", *state]
            ),
            Some(0.0),
            "{}",
            state
        );
    }
    assert!(!snapshot.has_label_value("account", "A2"));

    // A2 was filtered before fan-out: none of its sub-resources are listed.
    assert_eq!(h.api.calls("list_pools"), 1);

    let text = PrometheusExporter::render(&h.metrics).unwrap();
    assert!(text.contains(
        r#"azure_batch_pool_dedicated_nodes{subscription="Production",resource_group="rg-batch",account="A1",pool="P1"} 3"#
    ));
    assert!(!text.contains(r#"account="A2""#));
}

#[tokio::test]
async fn test_disappeared_entities_leave_no_series() {
    let mut state = scenario();
    state.pools.get_mut("A1").unwrap().push(pool("P2", 1, "Resizing"));
    state.jobs.insert("A1".into(), vec![job("job-1", "active", "P1")]);
    let h = harness(state, &[]);
    let updater = BatchUpdater::new(h.context.clone()).unwrap();
    let root = CancellationToken::new();

    updater.update(&cycle(&root)).await.unwrap();
    let first = updater.publisher().current();
    assert!(first.has_label_value("pool", "P2"));
    assert!(first.has_label_value("job_id", "job-1"));

    h.api.update(|s| {
        s.pools.get_mut("A1").unwrap().retain(|p| p.name != "P2");
        s.jobs.clear();
    });
    updater.update(&cycle(&root)).await.unwrap();

    let second = updater.publisher().current();
    assert!(!second.has_label_value("pool", "P2"));
    assert!(!second.has_label_value("job_id", "job-1"));
    assert!(second.has_label_value("pool", "P1"));
    assert_eq!(updater.publisher().generation(), 2);
}

#[tokio::test]
async fn test_enumerated_states_are_one_hot() {
    let mut state = scenario();
    state.jobs.insert(
        "A1".into(),
        vec![
            job("job-1", "active", "P1"),
            job("job-2", "completed", "P1"),
            job("job-3", "terminating", "P1"),
        ],
    );
    let h = harness(state, &[("monitor", "true")]);
    let updater = BatchUpdater::new(h.context.clone()).unwrap();
    updater
        .update(&cycle(&CancellationToken::new()))
        .await
        .unwrap();

    let snapshot = updater.publisher().current();
    for job_id in ["job-1", "job-2", "job-3"] {
        let values: Vec<f64> = JOB_STATES
            .iter()
            .map(|state| {
                snapshot
                    .get(
                        "azure_batch_job_state",
                        &[SUB_LABEL, RG, "A1", job_id, *state],
                    )
                    .unwrap()
            })
            .collect();
        assert_eq!(values.iter().filter(|v| **v == 1.0).count(), 1, "{}", job_id);
        assert_eq!(values.iter().filter(|v| **v == 0.0).count(), JOB_STATES.len() - 1);
    }

    let allocation: f64 = ["steady", "resizing", "stopping"]
        .iter()
        .map(|state| {
            snapshot
                .get(
                    "azure_batch_pool_allocation_state",
                    &[SUB_LABEL, RG, "A1", "P1", *state],
                )
                .unwrap()
        })
        .sum();
    assert_eq!(allocation, 1.0);

    // ARM reports allocation states capitalised; they land on the declared set.
    assert_eq!(
        snapshot.get("azure_batch_pool_allocation_state", &[SUB_LABEL, RG, "A1", "P1", "steady"]),
        Some(1.0)
    );
    assert_eq!(
        snapshot.get("azure_batch_pool_allocation_state", &[SUB_LABEL, RG, "A1", "P1", "Steady"]),
        None
    );
    assert_eq!(snapshot.series("azure_batch_pool_allocation_state").len(), 3);
}

#[tokio::test]
async fn test_job_task_counts() {
    let mut state = scenario();
    state.jobs.insert("A1".into(), vec![job("job-1", "active", "P1")]);
    state.task_counts.insert(
        ("A1".into(), "job-1".into()),
        TaskCounts {
            active: 4,
            running: 2,
            completed: 10,
            succeeded: 9,
            failed: 1,
        },
    );
    let h = harness(state, &[("monitor", "true")]);
    let updater = BatchUpdater::new(h.context.clone()).unwrap();
    updater
        .update(&cycle(&CancellationToken::new()))
        .await
        .unwrap();

    let snapshot = updater.publisher().current();
    let job = [SUB_LABEL, RG, "A1", "job-1"];
    assert_eq!(snapshot.get("azure_batch_job_tasks_active", &job), Some(4.0));
    assert_eq!(snapshot.get("azure_batch_job_tasks_running", &job), Some(2.0));
    assert_eq!(snapshot.get("azure_batch_job_tasks_completed_total", &job), Some(10.0));
    assert_eq!(snapshot.get("azure_batch_job_tasks_succeeded_total", &job), Some(9.0));
    assert_eq!(snapshot.get("azure_batch_job_tasks_failed_total", &job), Some(1.0));
    assert_eq!(
        snapshot.get(
            "azure_batch_job_info",
            &[SUB_LABEL, RG, "A1", "job-1", "job-1", "P1"]
        ),
        Some(1.0)
    );
}

#[tokio::test(start_paused = true)]
async fn test_listing_failure_keeps_previous_snapshot() {
    let h = harness(scenario(), &[("monitor", "true")]);
    let updater = BatchUpdater::new(h.context.clone()).unwrap();
    let root = CancellationToken::new();

    updater.update(&cycle(&root)).await.unwrap();
    let before = updater.publisher().current();

    // Let the cached account listing expire so the next cycle hits the API.
    tokio::time::advance(Duration::from_secs(301)).await;
    h.api.update(|s| {
        s.failing.insert("list_batch_accounts");
        s.pools.clear();
    });

    let result = updater.update(&cycle(&root)).await;
    assert!(matches!(result, Err(ExporterError::Remote { status: 500, .. })));

    let after = updater.publisher().current();
    assert_eq!(updater.publisher().generation(), 1);
    assert_eq!(after.len(), before.len());
    assert_eq!(
        after.get(
            "azure_batch_pool_dedicated_nodes",
            &[SUB_LABEL, RG, "A1", "P1"]
        ),
        Some(3.0)
    );
    assert_eq!(h.metrics.api_calls().failures(ApiSurface::Batch), 1);
}

#[tokio::test]
async fn test_branch_failure_does_not_abort_cycle() {
    let mut state = scenario();
    state.failing.insert("list_jobs");
    let h = harness(state, &[("monitor", "true")]);
    let updater = BatchUpdater::new(h.context.clone()).unwrap();

    let report = updater
        .update(&cycle(&CancellationToken::new()))
        .await
        .unwrap();
    assert_eq!(report.branches, 2);
    assert_eq!(report.failed_branches, 1);

    let snapshot = updater.publisher().current();
    assert!(snapshot.has_label_value("pool", "P1"));
    assert!(snapshot.series("azure_batch_job_state").is_empty());
}

#[tokio::test]
async fn test_node_listing_failure_drops_only_node_states() {
    let mut state = scenario();
    state.failing.insert("list_compute_nodes");
    let h = harness(state, &[("monitor", "true")]);
    let updater = BatchUpdater::new(h.context.clone()).unwrap();

    updater
        .update(&cycle(&CancellationToken::new()))
        .await
        .unwrap();

    let snapshot = updater.publisher().current();
    assert_eq!(
        snapshot.get(
            "azure_batch_pool_dedicated_nodes",
            &[SUB_LABEL, RG, "A1", "P1"]
        ),
        Some(3.0)
    );
    assert!(snapshot.series("azure_batch_pool_node_state").is_empty());
}

#[tokio::test]
async fn test_account_listing_is_cached_between_cycles() {
    let h = harness(scenario(), &[]);
    let updater = BatchUpdater::new(h.context.clone()).unwrap();
    let root = CancellationToken::new();

    updater.update(&cycle(&root)).await.unwrap();
    updater.update(&cycle(&root)).await.unwrap();

    // Two accounts, one per page, listed once.
    assert_eq!(h.api.calls("list_batch_accounts"), 2);
    assert_eq!(h.api.calls("get_subscription"), 1);
    // Pools are volatile and listed every cycle for both accounts.
    assert_eq!(h.api.calls("list_pools"), 4);
}

#[tokio::test]
async fn test_cancelled_cycle_is_discarded() {
    let h = harness(scenario(), &[]);
    let updater = BatchUpdater::new(h.context.clone()).unwrap();
    let root = CancellationToken::new();
    root.cancel();

    let result = updater.update(&cycle(&root)).await;
    assert!(matches!(result, Err(ExporterError::Cancelled)));
    assert_eq!(updater.publisher().generation(), 0);
    assert_eq!(h.metrics.api_calls().failures(ApiSurface::Subscription), 0);
    assert_eq!(h.api.calls("get_subscription"), 0);
}

#[tokio::test]
async fn test_malformed_account_id_is_skipped() {
    let mut state = scenario();
    state.batch_accounts[0].id = "/providers/Microsoft.Batch/batchAccounts/A1".into();
    let h = harness(state, &[]);
    let updater = BatchUpdater::new(h.context.clone()).unwrap();

    let report = updater
        .update(&cycle(&CancellationToken::new()))
        .await
        .unwrap();
    assert_eq!(report.entities, 1);
    assert_eq!(report.skipped, 1);
    let snapshot = updater.publisher().current();
    assert!(!snapshot.has_label_value("account", "A1"));
    assert!(snapshot.has_label_value("account", "A2"));
}

#[tokio::test]
async fn test_registry_builds_enabled_updaters() {
    let h = harness(scenario(), &[]);
    let registry = UpdaterRegistry::from_names(&["batch", "storage"], h.context.clone()).unwrap();
    assert_eq!(registry.list(), vec!["batch", "storage"]);
    assert!(registry.get("batch").is_some());

    let h = harness(scenario(), &[]);
    assert!(UpdaterRegistry::from_names(&["batch", "batch"], h.context.clone()).is_err());
    assert!(UpdaterRegistry::from_names(&["queue"], h.context).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_fan_out_discards_cycle() {
    let h = harness(scenario(), &[("monitor", "true")]);
    let updater = std::sync::Arc::new(BatchUpdater::new(h.context.clone()).unwrap());
    let root = CancellationToken::new();

    updater.update(&cycle(&root)).await.unwrap();
    let before = updater.publisher().current();

    h.api.update(|s| {
        s.stalled.insert("list_pools");
        s.pools.get_mut("A1").unwrap().push(pool("P2", 5, "Steady"));
    });
    let running = updater.clone();
    let cycle_root = root.clone();
    let handle = tokio::spawn(async move { running.update(&cycle(&cycle_root)).await });

    // Let the cycle reach the stalled pool listing, then shut down.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.api.calls("list_pools"), 2);
    root.cancel();

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(ExporterError::Cancelled)));
    assert_eq!(updater.publisher().generation(), 1);
    assert_eq!(updater.publisher().current().len(), before.len());
    assert!(!updater.publisher().current().has_label_value("pool", "P2"));
    assert_eq!(h.metrics.api_calls().failures(ApiSurface::Batch), 0);
    assert_eq!(h.metrics.api_calls().failures(ApiSurface::Subscription), 0);
}

#[tokio::test]
async fn test_panicking_task_keeps_what_was_recorded() {
    let mut state = scenario();
    state.jobs.insert("A1".into(), vec![job("job-1", "active", "P1")]);
    state.panicking.insert("get_task_counts");
    let h = harness(state, &[("monitor", "true")]);
    let updater = BatchUpdater::new(h.context.clone()).unwrap();

    let report = updater
        .update(&cycle(&CancellationToken::new()))
        .await
        .unwrap();
    assert_eq!(report.panicked_branches, 1);
    assert_eq!(report.failed_branches, 0);
    assert_eq!(report.generation, 1);

    // The job branch recorded the job state before the task-count call
    // blew up; that and the pool series are published, the counts are not.
    let snapshot = updater.publisher().current();
    assert_eq!(
        snapshot.get(
            "azure_batch_job_state",
            &[SUB_LABEL, RG, "A1", "job-1", "active"]
        ),
        Some(1.0)
    );
    assert!(snapshot.has_label_value("pool", "P1"));
    assert!(snapshot.series("azure_batch_job_tasks_active").is_empty());
    assert!(snapshot.series("azure_batch_job_info").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_task_counts_are_collected_for_every_job() {
    let mut state = scenario();
    let jobs: Vec<_> = (0..60)
        .map(|i| job(&format!("job-{}", i), "active", "P1"))
        .collect();
    state.jobs.insert("A1".into(), jobs);
    let h = harness(state, &[("monitor", "true")]);
    let updater = BatchUpdater::new(h.context.clone()).unwrap();

    let report = updater
        .update(&cycle(&CancellationToken::new()))
        .await
        .unwrap();
    assert_eq!(report.failed_branches, 0);
    assert_eq!(h.api.calls("get_task_counts"), 60);

    let snapshot = updater.publisher().current();
    assert_eq!(snapshot.series("azure_batch_job_tasks_active").len(), 60);
    assert_eq!(snapshot.series("azure_batch_job_info").len(), 60);
}
