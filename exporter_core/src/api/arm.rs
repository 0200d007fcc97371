//! HTTPS implementation of [`ResourceApi`] over Azure Resource Manager and
//! the Batch data plane.

use super::types::*;
use super::ResourceApi;
use crate::auth::{Audience, Authorizer};
use crate::error::{ExporterError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";

const SUBSCRIPTION_API_VERSION: &str = "2020-01-01";
const BATCH_MANAGEMENT_API_VERSION: &str = "2023-05-01";
const BATCH_DATA_API_VERSION: &str = "2019-08-01.10.0";
const STORAGE_API_VERSION: &str = "2023-01-01";

/// Longest response body excerpt carried into errors and logs.
const MAX_LOG_BODY_LENGTH: usize = 200;

fn sanitize_for_log(body: &str) -> String {
    let truncated: String = body.chars().take(MAX_LOG_BODY_LENGTH).collect();
    let truncated = if truncated.len() < body.len() {
        format!("{}... [truncated, {} bytes total]", truncated, body.len())
    } else {
        truncated
    };
    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

fn classify_status(status: StatusCode, body: &str) -> ExporterError {
    let message = sanitize_for_log(body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => ExporterError::Throttled(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ExporterError::Authorization(format!("{}: {}", status, message))
        }
        _ => ExporterError::Remote {
            status: status.as_u16(),
            message,
        },
    }
}

/// ARM (`nextLink`) and Batch data-plane (`odata.nextLink`) list envelope.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct ListEnvelope<T> {
    #[serde(default)]
    value: Vec<T>,
    #[serde(rename = "nextLink", default)]
    next_link: Option<String>,
    #[serde(rename = "odata.nextLink", default)]
    odata_next_link: Option<String>,
}

impl<T> From<ListEnvelope<T>> for Page<T> {
    fn from(envelope: ListEnvelope<T>) -> Self {
        Page {
            items: envelope.value,
            next_marker: envelope
                .next_link
                .or(envelope.odata_next_link)
                .filter(|link| !link.is_empty()),
        }
    }
}

/// Newer data-plane versions wrap the counts; older ones return them flat.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TaskCountsResponse {
    #[serde(rename_all = "camelCase")]
    Wrapped { task_counts: TaskCounts },
    Flat(TaskCounts),
}

#[derive(Clone)]
pub struct ArmClient {
    http: Client,
    authorizer: Arc<dyn Authorizer>,
    management_endpoint: String,
}

impl ArmClient {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("azure-exporter/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            authorizer,
            management_endpoint: DEFAULT_MANAGEMENT_ENDPOINT.to_string(),
        })
    }

    pub fn with_management_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.management_endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn management_endpoint(&self) -> &str {
        &self.management_endpoint
    }

    fn management_url(&self, path: &str, api_version: &str) -> String {
        format!(
            "{}{}?api-version={}",
            self.management_endpoint, path, api_version
        )
    }

    fn batch_url(&self, account: &BatchAccount, path: &str) -> Result<String> {
        let endpoint = account.properties.account_endpoint.trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(ExporterError::InvalidConfig(format!(
                "batch account '{}' has no account endpoint",
                account.name
            )));
        }

        let base = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("https://{}", endpoint)
        };

        Ok(format!(
            "{}{}?api-version={}",
            base, path, BATCH_DATA_API_VERSION
        ))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, audience: Audience) -> Result<T> {
        let token = self.authorizer.token(audience).await?;
        debug!("GET {}", url);

        let response = self.http.get(url).bearer_auth(token).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(classify_status(status, &body));
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// Fetches the first page from `first_url`, or the page `marker` points at.
    async fn list_page<T: DeserializeOwned>(
        &self,
        first_url: String,
        marker: Option<String>,
        audience: Audience,
    ) -> Result<Page<T>> {
        let url = marker.unwrap_or(first_url);
        let envelope: ListEnvelope<T> = self.get_json(&url, audience).await?;
        Ok(envelope.into())
    }
}

#[async_trait]
impl ResourceApi for ArmClient {
    async fn get_subscription(&self, subscription_id: &str) -> Result<Subscription> {
        let url = self.management_url(
            &format!("/subscriptions/{}", subscription_id),
            SUBSCRIPTION_API_VERSION,
        );
        self.get_json(&url, Audience::Management).await
    }

    async fn list_batch_accounts(
        &self,
        subscription_id: &str,
        marker: Option<String>,
    ) -> Result<Page<BatchAccount>> {
        let url = self.management_url(
            &format!(
                "/subscriptions/{}/providers/Microsoft.Batch/batchAccounts",
                subscription_id
            ),
            BATCH_MANAGEMENT_API_VERSION,
        );
        self.list_page(url, marker, Audience::Management).await
    }

    async fn list_pools(
        &self,
        account: &BatchAccount,
        marker: Option<String>,
    ) -> Result<Page<Pool>> {
        let url = self.management_url(
            &format!("{}/pools", account.id),
            BATCH_MANAGEMENT_API_VERSION,
        );
        self.list_page(url, marker, Audience::Management).await
    }

    async fn list_compute_nodes(
        &self,
        account: &BatchAccount,
        pool_id: &str,
        marker: Option<String>,
    ) -> Result<Page<ComputeNode>> {
        let url = self.batch_url(account, &format!("/pools/{}/nodes", pool_id))?;
        self.list_page(url, marker, Audience::Batch).await
    }

    async fn list_jobs(&self, account: &BatchAccount, marker: Option<String>) -> Result<Page<Job>> {
        let url = self.batch_url(account, "/jobs")?;
        self.list_page(url, marker, Audience::Batch).await
    }

    async fn get_task_counts(&self, account: &BatchAccount, job_id: &str) -> Result<TaskCounts> {
        let url = self.batch_url(account, &format!("/jobs/{}/taskcounts", job_id))?;
        let response: TaskCountsResponse = self.get_json(&url, Audience::Batch).await?;
        Ok(match response {
            TaskCountsResponse::Wrapped { task_counts } => task_counts,
            TaskCountsResponse::Flat(counts) => counts,
        })
    }

    async fn list_storage_accounts(
        &self,
        subscription_id: &str,
        marker: Option<String>,
    ) -> Result<Page<StorageAccount>> {
        let url = self.management_url(
            &format!(
                "/subscriptions/{}/providers/Microsoft.Storage/storageAccounts",
                subscription_id
            ),
            STORAGE_API_VERSION,
        );
        self.list_page(url, marker, Audience::Management).await
    }

    async fn list_containers(
        &self,
        account: &StorageAccount,
        marker: Option<String>,
    ) -> Result<Page<BlobContainer>> {
        let url = self.management_url(
            &format!("{}/blobServices/default/containers", account.id),
            STORAGE_API_VERSION,
        );
        self.list_page(url, marker, Audience::Management).await
    }
}
