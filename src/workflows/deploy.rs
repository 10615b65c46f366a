//! Parallel release convergence
//!
//! Each release is one work item: get the delivery client for its
//! `(credential_scope, server)`, trigger a sync, then poll until the
//! application is healthy and synced. Releases on the same server share one
//! pooled client.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::batch::{BatchConfig, BatchOrchestrator, BatchResult, WorkItem};
use crate::poll::{poll_until, PollConfig};
use crate::pool::{Connector, PoolKey, ResourcePool};
use crate::remote::{ApplicationStatus, DeliveryApi};
use crate::scope::Scope;
use crate::types::Result;

/// One application to converge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseTarget {
    /// Application name on the delivery service
    pub name: String,
    /// Delivery service endpoint
    pub server: String,
    /// Credential scope used to reach `server`
    pub credential_scope: String,
    /// Revision to sync to; latest when unset
    #[serde(default)]
    pub revision: Option<String>,
}

impl ReleaseTarget {
    pub fn new(
        name: impl Into<String>,
        server: impl Into<String>,
        credential_scope: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            server: server.into(),
            credential_scope: credential_scope.into(),
            revision: None,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn pool_key(&self) -> PoolKey {
        PoolKey::new([self.credential_scope.as_str(), self.server.as_str()])
    }
}

/// Converges releases with bounded concurrency
pub struct ReleaseDeployer<C> {
    clients: Arc<ResourcePool<C>>,
    connector: Arc<dyn Connector<C>>,
    batch: BatchOrchestrator,
    poll: PollConfig,
}

impl<C> ReleaseDeployer<C>
where
    C: DeliveryApi + 'static,
{
    pub fn new(
        clients: Arc<ResourcePool<C>>,
        connector: Arc<dyn Connector<C>>,
        batch: BatchConfig,
        poll: PollConfig,
    ) -> Self {
        Self {
            clients,
            connector,
            batch: BatchOrchestrator::with_config(batch),
            poll,
        }
    }

    /// Converge every target; one outcome per target, keyed by app name
    pub async fn deploy(&self, targets: Vec<ReleaseTarget>, scope: &Scope) -> BatchResult<ApplicationStatus> {
        info!(
            releases = targets.len(),
            concurrency = self.batch.concurrency(),
            "Converging releases"
        );

        let items = targets
            .into_iter()
            .map(|target| {
                let clients = Arc::clone(&self.clients);
                let connector = Arc::clone(&self.connector);
                let poll = self.poll.clone();
                WorkItem::new(target.name.clone(), move |scope| async move {
                    converge_release(&clients, connector.as_ref(), &target, &poll, &scope).await
                })
            })
            .collect();

        self.batch.run(items, scope).await
    }
}

/// Sync one release and wait for it to converge
pub async fn converge_release<C>(
    clients: &ResourcePool<C>,
    connector: &dyn Connector<C>,
    target: &ReleaseTarget,
    poll: &PollConfig,
    scope: &Scope,
) -> Result<ApplicationStatus>
where
    C: DeliveryApi + 'static,
{
    let client = clients
        .acquire_with(&target.pool_key(), scope, connector)
        .await?;

    info!(app = %target.name, server = %target.server, revision = ?target.revision, "Syncing application");
    client
        .sync_application(scope, &target.name, target.revision.as_deref())
        .await?;

    let revision = target.revision.as_deref();
    let status = poll_until(
        |scope| {
            let client = Arc::clone(&client);
            let app = target.name.clone();
            async move { client.application_status(&scope, &app).await }
        },
        |status: &ApplicationStatus| status.is_converged(revision),
        poll,
        scope,
    )
    .await
    .into_result(&format!("application {}", target.name))?;

    info!(app = %target.name, %status, "Application converged");
    Ok(status)
}
