pub mod api;
pub mod auth;
pub mod cache;
pub mod cycle;
pub mod error;
pub mod resource_id;
pub mod task_group;

pub use api::{DynResourceApi, Page, ResourceApi};
pub use auth::{Audience, Authorizer, EnvAuthorizer};
pub use cache::TtlCache;
pub use cycle::{CycleContext, CyclePhase};
pub use error::{ExporterError, Result};
pub use resource_id::ResourceId;
pub use task_group::{JoinReport, TaskGroup, MAX_CONCURRENCY};

// Re-export commonly used types
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
