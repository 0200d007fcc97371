#![allow(dead_code)]

use async_trait::async_trait;
use exporter_collectors::{CollectorContext, ExporterConfig};
use exporter_core::api::{
    BatchAccount, BatchAccountProperties, BlobContainer, BlobContainerProperties, ComputeNode,
    Job, Page, Pool, PoolInformation, PoolProperties, StorageAccount, Subscription, TaskCounts,
};
use exporter_core::{ExporterError, ResourceApi, Result, TtlCache};
use exporter_metrics::MetricsRegistry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SUBSCRIPTION: &str = "0000-sub";

/// In-memory resource API. Listings are served one item per page so the
/// continuation path is always exercised.
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

#[derive(Default, Clone)]
pub struct FakeState {
    pub display_name: String,
    pub batch_accounts: Vec<BatchAccount>,
    pub pools: HashMap<String, Vec<Pool>>,
    pub nodes: HashMap<(String, String), Vec<ComputeNode>>,
    pub jobs: HashMap<String, Vec<Job>>,
    pub task_counts: HashMap<(String, String), TaskCounts>,
    pub storage_accounts: Vec<StorageAccount>,
    pub containers: HashMap<String, Vec<BlobContainer>>,
    /// Operations that fail with a server error.
    pub failing: HashSet<&'static str>,
    /// Operations that never answer; only cancellation gets the caller out.
    pub stalled: HashSet<&'static str>,
    /// Operations that panic.
    pub panicking: HashSet<&'static str>,
}

impl FakeApi {
    pub fn new(state: FakeState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            calls: Mutex::new(HashMap::new()),
        })
    }

    pub fn update(&self, f: impl FnOnce(&mut FakeState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().unwrap().get(operation).copied().unwrap_or(0)
    }

    async fn enter(&self, operation: &'static str) -> Result<FakeState> {
        *self.calls.lock().unwrap().entry(operation).or_insert(0) += 1;
        let state = self.state.lock().unwrap().clone();
        if state.stalled.contains(operation) {
            std::future::pending::<()>().await;
        }
        if state.panicking.contains(operation) {
            panic!("{} blew up", operation);
        }
        if state.failing.contains(operation) {
            return Err(ExporterError::Remote {
                status: 500,
                message: format!("{} failed", operation),
            });
        }
        Ok(state)
    }
}

fn paged<T: Clone>(all: &[T], marker: Option<String>) -> Page<T> {
    let index: usize = marker.and_then(|m| m.parse().ok()).unwrap_or(0);
    let items: Vec<T> = all.iter().skip(index).take(1).cloned().collect();
    if index + 1 < all.len() {
        Page::with_next(items, (index + 1).to_string())
    } else {
        Page::last(items)
    }
}

#[async_trait]
impl ResourceApi for FakeApi {
    async fn get_subscription(&self, subscription_id: &str) -> Result<Subscription> {
        let state = self.enter("get_subscription").await?;
        Ok(Subscription {
            subscription_id: subscription_id.to_string(),
            display_name: state.display_name,
        })
    }

    async fn list_batch_accounts(
        &self,
        _subscription_id: &str,
        marker: Option<String>,
    ) -> Result<Page<BatchAccount>> {
        let state = self.enter("list_batch_accounts").await?;
        Ok(paged(&state.batch_accounts, marker))
    }

    async fn list_pools(&self, account: &BatchAccount, marker: Option<String>) -> Result<Page<Pool>> {
        let state = self.enter("list_pools").await?;
        let pools = state.pools.get(&account.name).cloned().unwrap_or_default();
        Ok(paged(&pools, marker))
    }

    async fn list_compute_nodes(
        &self,
        account: &BatchAccount,
        pool_id: &str,
        marker: Option<String>,
    ) -> Result<Page<ComputeNode>> {
        let state = self.enter("list_compute_nodes").await?;
        let nodes = state
            .nodes
            .get(&(account.name.clone(), pool_id.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(paged(&nodes, marker))
    }

    async fn list_jobs(&self, account: &BatchAccount, marker: Option<String>) -> Result<Page<Job>> {
        let state = self.enter("list_jobs").await?;
        let jobs = state.jobs.get(&account.name).cloned().unwrap_or_default();
        Ok(paged(&jobs, marker))
    }

    async fn get_task_counts(&self, account: &BatchAccount, job_id: &str) -> Result<TaskCounts> {
        let state = self.enter("get_task_counts").await?;
        Ok(state
            .task_counts
            .get(&(account.name.clone(), job_id.to_string()))
            .copied()
            .unwrap_or_default())
    }

    async fn list_storage_accounts(
        &self,
        _subscription_id: &str,
        marker: Option<String>,
    ) -> Result<Page<StorageAccount>> {
        let state = self.enter("list_storage_accounts").await?;
        Ok(paged(&state.storage_accounts, marker))
    }

    async fn list_containers(
        &self,
        account: &StorageAccount,
        marker: Option<String>,
    ) -> Result<Page<BlobContainer>> {
        let state = self.enter("list_containers").await?;
        let containers = state
            .containers
            .get(&account.name)
            .cloned()
            .unwrap_or_default();
        Ok(paged(&containers, marker))
    }
}

pub fn batch_account(name: &str, tags: &[(&str, &str)]) -> BatchAccount {
    BatchAccount {
        id: format!(
            "/subscriptions/{}/resourceGroups/rg-batch/providers/Microsoft.Batch/batchAccounts/{}",
            SUBSCRIPTION, name
        ),
        name: name.to_string(),
        location: Some("westeurope".to_string()),
        tags: tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        properties: BatchAccountProperties {
            account_endpoint: format!("{}.westeurope.batch.azure.com", name),
            pool_quota: Some(100),
            dedicated_core_quota: Some(500),
            low_priority_core_quota: Some(100),
        },
    }
}

pub fn pool(name: &str, dedicated: i64, allocation_state: &str) -> Pool {
    Pool {
        name: name.to_string(),
        id: None,
        properties: PoolProperties {
            allocation_state: Some(allocation_state.to_string()),
            current_dedicated_nodes: dedicated,
            current_low_priority_nodes: 0,
            vm_size: Some("STANDARD_D2_V3".to_string()),
            metadata: Vec::new(),
        },
    }
}

pub fn nodes(state: &str, count: usize) -> Vec<ComputeNode> {
    (0..count)
        .map(|i| ComputeNode {
            id: format!("tvm-{}", i),
            state: state.to_string(),
        })
        .collect()
}

pub fn job(id: &str, state: &str, pool_id: &str) -> Job {
    Job {
        id: id.to_string(),
        display_name: None,
        state: state.to_string(),
        pool_info: PoolInformation {
            pool_id: Some(pool_id.to_string()),
        },
        metadata: Vec::new(),
    }
}

pub fn storage_account(name: &str, tags: &[(&str, &str)]) -> StorageAccount {
    StorageAccount {
        id: format!(
            "/subscriptions/{}/resourceGroups/rg-storage/providers/Microsoft.Storage/storageAccounts/{}",
            SUBSCRIPTION, name
        ),
        name: name.to_string(),
        location: None,
        kind: Some("StorageV2".to_string()),
        tags: tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

pub fn container(name: &str, lease_state: &str) -> BlobContainer {
    BlobContainer {
        name: name.to_string(),
        properties: BlobContainerProperties {
            lease_state: Some(lease_state.to_string()),
            public_access: None,
        },
    }
}

pub struct Harness {
    pub api: Arc<FakeApi>,
    pub cache: Arc<TtlCache>,
    pub metrics: Arc<MetricsRegistry>,
    pub context: Arc<CollectorContext>,
}

pub fn harness(state: FakeState, required_tags: &[(&str, &str)]) -> Harness {
    let mut builder = ExporterConfig::builder()
        .subscription_id(SUBSCRIPTION)
        .call_timeout(Duration::from_secs(5))
        .cache_ttl(Duration::from_secs(300));
    for (k, v) in required_tags {
        builder = builder.required_tag(*k, *v);
    }
    let config = builder.build();

    let api = FakeApi::new(state);
    let cache = Arc::new(TtlCache::new(config.cache_ttl));
    let metrics = Arc::new(MetricsRegistry::new().unwrap());
    let context = Arc::new(CollectorContext::new(
        &config,
        api.clone(),
        cache.clone(),
        metrics.clone(),
    ));

    Harness {
        api,
        cache,
        metrics,
        context,
    }
}
