//! Cloud remote-command service interface

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::scope::Scope;
use crate::types::Result;

/// Lifecycle of one command on one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationStatus {
    Pending,
    InProgress,
    Delayed,
    Success,
    Cancelled,
    TimedOut,
    Failed,
}

impl InvocationStatus {
    /// The command will not change state any more
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            InvocationStatus::Pending | InvocationStatus::InProgress | InvocationStatus::Delayed
        )
    }
}

/// Command document and its parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Document (script) name understood by the command service
    pub document: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl CommandRequest {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            parameters: BTreeMap::new(),
            comment: None,
        }
    }

    /// Shell-script request, one command per line
    pub fn shell<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new("AWS-RunShellScript")
            .with_parameter("commands", commands.into_iter().map(Into::into).collect())
    }

    pub fn with_parameter(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.parameters.insert(name.into(), values);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Observed state of a command on one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInvocation {
    pub status: InvocationStatus,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

/// Calls made against the cloud command API
#[async_trait]
pub trait CommandApi: Send + Sync {
    /// Start `request` on `instance_id`; returns the command id
    async fn send_command(&self, scope: &Scope, instance_id: &str, request: &CommandRequest) -> Result<String>;

    /// Current state of `command_id` on `instance_id`
    async fn command_invocation(
        &self,
        scope: &Scope,
        command_id: &str,
        instance_id: &str,
    ) -> Result<CommandInvocation>;
}
