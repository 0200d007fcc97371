use std::fmt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Phases an updater walks through during one collection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Listing,
    FanOut,
    Joining,
    Published,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Listing => "listing",
            CyclePhase::FanOut => "fan_out",
            CyclePhase::Joining => "joining",
            CyclePhase::Published => "published",
        };
        f.write_str(name)
    }
}

/// Identity and cancellation scope of one collection cycle.
///
/// Cheap to clone; every task spawned for the cycle owns a copy so its log
/// lines can be joined on `cycle_id`.
#[derive(Debug, Clone)]
pub struct CycleContext {
    id: String,
    updater: String,
    token: CancellationToken,
}

impl CycleContext {
    /// Derives a cycle scope from the long-lived process token. Cancelling
    /// the cycle never cancels the parent.
    pub fn new(updater: impl Into<String>, parent: &CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            updater: updater.into(),
            token: parent.child_token(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn updater(&self) -> &str {
        &self.updater
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
