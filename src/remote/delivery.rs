//! GitOps delivery service interface

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::scope::Scope;
use crate::types::Result;

/// Application health as reported by the delivery service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Progressing,
    Degraded,
    Suspended,
    Missing,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Synced,
    OutOfSync,
    Unknown,
}

/// Observed state of one application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationStatus {
    pub health: HealthStatus,
    pub sync: SyncStatus,
    /// Revision the service last synced to
    #[serde(default)]
    pub revision: Option<String>,
}

impl ApplicationStatus {
    /// Healthy, synced, and on `revision` when one is required
    pub fn is_converged(&self, revision: Option<&str>) -> bool {
        self.health == HealthStatus::Healthy
            && self.sync == SyncStatus::Synced
            && revision.map_or(true, |wanted| self.revision.as_deref() == Some(wanted))
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "health={:?} sync={:?}", self.health, self.sync)?;
        if let Some(revision) = &self.revision {
            write!(f, " revision={}", revision)?;
        }
        Ok(())
    }
}

/// Calls made against the continuous-delivery API
#[async_trait]
pub trait DeliveryApi: Send + Sync {
    /// Ask the service to sync `app`, optionally to a specific revision
    async fn sync_application(&self, scope: &Scope, app: &str, revision: Option<&str>) -> Result<()>;

    /// Current health and sync state of `app`
    async fn application_status(&self, scope: &Scope, app: &str) -> Result<ApplicationStatus>;
}
