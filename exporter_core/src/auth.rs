//! Bearer token supply. Acquiring and refreshing tokens happens outside the
//! exporter; this module only hands out what it was given.

use crate::error::{ExporterError, Result};
use async_trait::async_trait;
use std::fmt;

pub const MANAGEMENT_TOKEN_ENV: &str = "AZURE_MANAGEMENT_TOKEN";
pub const BATCH_TOKEN_ENV: &str = "AZURE_BATCH_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Azure Resource Manager (`https://management.azure.com/`).
    Management,
    /// Batch data plane (`https://batch.core.windows.net/`).
    Batch,
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Audience::Management => f.write_str("management"),
            Audience::Batch => f.write_str("batch"),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn token(&self, audience: Audience) -> Result<String>;
}

/// Serves tokens read once from the environment.
#[derive(Clone)]
pub struct EnvAuthorizer {
    management: Option<String>,
    batch: Option<String>,
}

impl EnvAuthorizer {
    pub fn new(management: Option<String>, batch: Option<String>) -> Self {
        Self { management, batch }
    }

    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self::new(read(MANAGEMENT_TOKEN_ENV), read(BATCH_TOKEN_ENV))
    }

    pub fn has_management_token(&self) -> bool {
        self.management.is_some()
    }
}

impl fmt::Debug for EnvAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvAuthorizer")
            .field("management", &self.management.as_ref().map(|_| "<redacted>"))
            .field("batch", &self.batch.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[async_trait]
impl Authorizer for EnvAuthorizer {
    async fn token(&self, audience: Audience) -> Result<String> {
        let token = match audience {
            Audience::Management => self.management.as_ref(),
            // Batch falls back to the management token, which works for
            // service principals granted both audiences.
            Audience::Batch => self.batch.as_ref().or(self.management.as_ref()),
        };

        token.cloned().ok_or_else(|| {
            ExporterError::Authorization(format!("no {} token configured", audience))
        })
    }
}
