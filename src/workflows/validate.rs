//! Remote validation pass across instances
//!
//! Sends one command to every instance through the cloud command service
//! and waits for each invocation to reach a terminal status. Instances in the
//! same `(credential_scope, region)` share one pooled client.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::batch::{BatchConfig, BatchOrchestrator, BatchResult, WorkItem};
use crate::poll::{poll_until, PollConfig};
use crate::pool::{Connector, PoolKey, ResourcePool};
use crate::remote::{CommandApi, CommandInvocation, CommandRequest, InvocationStatus};
use crate::scope::Scope;
use crate::types::{OpsError, Result};

/// One instance to validate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationTarget {
    pub instance_id: String,
    pub credential_scope: String,
    pub region: String,
}

impl ValidationTarget {
    pub fn new(
        instance_id: impl Into<String>,
        credential_scope: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            credential_scope: credential_scope.into(),
            region: region.into(),
        }
    }

    pub fn pool_key(&self) -> PoolKey {
        PoolKey::new([self.credential_scope.as_str(), self.region.as_str()])
    }
}

/// Runs a command across instances with bounded concurrency
pub struct InstanceValidator<C> {
    clients: Arc<ResourcePool<C>>,
    connector: Arc<dyn Connector<C>>,
    batch: BatchOrchestrator,
    poll: PollConfig,
}

impl<C> InstanceValidator<C>
where
    C: CommandApi + 'static,
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

    /// One outcome per instance, keyed by instance id
    pub async fn validate(
        &self,
        targets: Vec<ValidationTarget>,
        request: &CommandRequest,
        scope: &Scope,
    ) -> BatchResult<CommandInvocation> {
        info!(
            instances = targets.len(),
            document = %request.document,
            concurrency = self.batch.concurrency(),
            "Starting validation pass"
        );

        let request = Arc::new(request.clone());
        let items = targets
            .into_iter()
            .map(|target| {
                let clients = Arc::clone(&self.clients);
                let connector = Arc::clone(&self.connector);
                let request = Arc::clone(&request);
                let poll = self.poll.clone();
                WorkItem::new(target.instance_id.clone(), move |scope| async move {
                    run_instance_command(&clients, connector.as_ref(), &target, &request, &poll, &scope).await
                })
            })
            .collect();

        self.batch.run(items, scope).await
    }
}

/// Send `request` to one instance and wait for a terminal status.
///
/// Anything other than `Success` is reported as a remote failure carrying
/// the status and stderr.
pub async fn run_instance_command<C>(
    clients: &ResourcePool<C>,
    connector: &dyn Connector<C>,
    target: &ValidationTarget,
    request: &CommandRequest,
    poll: &PollConfig,
    scope: &Scope,
) -> Result<CommandInvocation>
where
    C: CommandApi + 'static,
{
    let client = clients
        .acquire_with(&target.pool_key(), scope, connector)
        .await?;

    let command_id = client
        .send_command(scope, &target.instance_id, request)
        .await?;
    debug!(instance = %target.instance_id, command_id = %command_id, "Command sent");

    // The invocation may not be visible right after sending; the poller
    // treats that lookup failure as transient.
    let invocation = poll_until(
        |scope| {
            let client = Arc::clone(&client);
            let command_id = command_id.clone();
            let instance_id = target.instance_id.clone();
            async move {
                client
                    .command_invocation(&scope, &command_id, &instance_id)
                    .await
            }
        },
        |invocation: &CommandInvocation| invocation.status.is_terminal(),
        poll,
        scope,
    )
    .await
    .into_result(&format!("command {} on {}", command_id, target.instance_id))?;

    match invocation.status {
        InvocationStatus::Success => {
            info!(instance = %target.instance_id, "Validation command succeeded");
            Ok(invocation)
        }
        status => Err(OpsError::Remote(format!(
            "command {} on {} finished with status {:?}: {}",
            command_id,
            target.instance_id,
            status,
            invocation.stderr.trim()
        ))),
    }
}
