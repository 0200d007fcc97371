//! Remote listings as the updaters see them: every page goes through the
//! instrumented caller, and slowly-changing listings are memoized in the
//! shared TTL cache.

use exporter_core::api::{
    BatchAccount, BlobContainer, ComputeNode, Job, Page, Pool, StorageAccount, Subscription,
    TaskCounts,
};
use exporter_core::{CycleContext, DynResourceApi, Result, TtlCache};
use exporter_metrics::{ApiSurface, InstrumentedCaller};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct ResourceLister {
    api: DynResourceApi,
    cache: Arc<TtlCache>,
    caller: InstrumentedCaller,
    cache_ttl: Duration,
}

impl ResourceLister {
    pub fn new(
        api: DynResourceApi,
        cache: Arc<TtlCache>,
        caller: InstrumentedCaller,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            api,
            cache,
            caller,
            cache_ttl,
        }
    }

    pub async fn subscription(
        &self,
        cycle: &CycleContext,
        subscription_id: &str,
    ) -> Result<Arc<Subscription>> {
        let key = format!("sub-{}-subscription", subscription_id);
        self.cache
            .get_or_try_insert_with(&key, self.cache_ttl, || {
                self.caller.execute(
                    cycle,
                    ApiSurface::Subscription,
                    "get_subscription",
                    self.api.get_subscription(subscription_id),
                )
            })
            .await
    }

    pub async fn batch_accounts(
        &self,
        cycle: &CycleContext,
        subscription_id: &str,
    ) -> Result<Arc<Vec<BatchAccount>>> {
        let key = format!("sub-{}-batch-accounts", subscription_id);
        self.cache
            .get_or_try_insert_with(&key, self.cache_ttl, || {
                self.collect_pages(cycle, ApiSurface::Batch, "list_batch_accounts", |marker| {
                    self.api.list_batch_accounts(subscription_id, marker)
                })
            })
            .await
    }

    pub async fn pools(&self, cycle: &CycleContext, account: &BatchAccount) -> Result<Vec<Pool>> {
        self.collect_pages(cycle, ApiSurface::Batch, "list_pools", |marker| {
            self.api.list_pools(account, marker)
        })
        .await
    }

    pub async fn compute_nodes(
        &self,
        cycle: &CycleContext,
        account: &BatchAccount,
        pool_id: &str,
    ) -> Result<Vec<ComputeNode>> {
        self.collect_pages(cycle, ApiSurface::Batch, "list_compute_nodes", |marker| {
            self.api.list_compute_nodes(account, pool_id, marker)
        })
        .await
    }

    pub async fn jobs(&self, cycle: &CycleContext, account: &BatchAccount) -> Result<Vec<Job>> {
        self.collect_pages(cycle, ApiSurface::Batch, "list_jobs", |marker| {
            self.api.list_jobs(account, marker)
        })
        .await
    }

    pub async fn task_counts(
        &self,
        cycle: &CycleContext,
        account: &BatchAccount,
        job_id: &str,
    ) -> Result<TaskCounts> {
        self.caller
            .execute(
                cycle,
                ApiSurface::Batch,
                "get_task_counts",
                self.api.get_task_counts(account, job_id),
            )
            .await
    }

    pub async fn storage_accounts(
        &self,
        cycle: &CycleContext,
        subscription_id: &str,
    ) -> Result<Arc<Vec<StorageAccount>>> {
        let key = format!("sub-{}-storage-accounts", subscription_id);
        self.cache
            .get_or_try_insert_with(&key, self.cache_ttl, || {
                self.collect_pages(
                    cycle,
                    ApiSurface::Storage,
                    "list_storage_accounts",
                    |marker| self.api.list_storage_accounts(subscription_id, marker),
                )
            })
            .await
    }

    pub async fn containers(
        &self,
        cycle: &CycleContext,
        subscription_id: &str,
        account: &StorageAccount,
    ) -> Result<Arc<Vec<BlobContainer>>> {
        let key = format!(
            "sub-{}-storage-{}-containers",
            subscription_id,
            account.id.to_lowercase()
        );
        self.cache
            .get_or_try_insert_with(&key, self.cache_ttl, || {
                self.collect_pages(cycle, ApiSurface::Storage, "list_containers", |marker| {
                    self.api.list_containers(account, marker)
                })
            })
            .await
    }

    /// Follows continuation markers until the last page. Each page is its
    /// own instrumented call.
    async fn collect_pages<T, F, Fut>(
        &self,
        cycle: &CycleContext,
        api: ApiSurface,
        operation: &str,
        mut fetch: F,
    ) -> Result<Vec<T>>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<Page<T>>>,
    {
        let mut items = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .caller
                .execute(cycle, api, operation, fetch(marker.clone()))
                .await?;
            items.extend(page.items);

            match page.next_marker {
                Some(next) if next.is_empty() => break,
                Some(next) if marker.as_deref() == Some(next.as_str()) => {
                    warn!(
                        cycle_id = cycle.id(),
                        updater = cycle.updater(),
                        operation,
                        "Remote API returned the same continuation marker twice, stopping"
                    );
                    break;
                }
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(items)
    }
}
