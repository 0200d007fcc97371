pub mod arm;
pub mod types;

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub use arm::ArmClient;
pub use types::*;

/// Remote resource API the updaters collect from.
///
/// Every listing is paginated: pass `None` for the first page and the
/// returned `next_marker` for the following ones. Deadlines are enforced by
/// the caller dropping the returned future.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    async fn get_subscription(&self, subscription_id: &str) -> Result<Subscription>;

    async fn list_batch_accounts(
        &self,
        subscription_id: &str,
        marker: Option<String>,
    ) -> Result<Page<BatchAccount>>;

    async fn list_pools(&self, account: &BatchAccount, marker: Option<String>)
        -> Result<Page<Pool>>;

    async fn list_compute_nodes(
        &self,
        account: &BatchAccount,
        pool_id: &str,
        marker: Option<String>,
    ) -> Result<Page<ComputeNode>>;

    async fn list_jobs(&self, account: &BatchAccount, marker: Option<String>) -> Result<Page<Job>>;

    async fn get_task_counts(&self, account: &BatchAccount, job_id: &str) -> Result<TaskCounts>;

    async fn list_storage_accounts(
        &self,
        subscription_id: &str,
        marker: Option<String>,
    ) -> Result<Page<StorageAccount>>;

    async fn list_containers(
        &self,
        account: &StorageAccount,
        marker: Option<String>,
    ) -> Result<Page<BlobContainer>>;
}

pub type DynResourceApi = Arc<dyn ResourceApi>;
