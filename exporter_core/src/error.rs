use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("Malformed resource id: {0}")]
    MalformedResourceId(String),

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote API throttled the request: {0}")]
    Throttled(String),

    #[error("Remote API error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Call cancelled by the collection cycle")]
    Cancelled,

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid observation for family '{family}': {reason}")]
    InvalidObservation { family: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExporterError {
    /// Self-inflicted cancellation (shutdown, cycle aborted). Never counted
    /// as a failed remote call.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ExporterError::Cancelled)
    }

    /// Failures worth retrying on the next cycle: timeouts, throttling,
    /// server-side errors and transport errors.
    pub fn is_transient(&self) -> bool {
        match self {
            ExporterError::Timeout(_) | ExporterError::Throttled(_) => true,
            ExporterError::Remote { status, .. } => *status >= 500,
            ExporterError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExporterError>;
