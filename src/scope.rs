//! Cancellation scope shared by every long-running operation
//!
//! A `Scope` is a cancellation token plus an optional deadline. Child scopes
//! are cancelled with their parent and can only shorten the deadline, never
//! extend it.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::{OpsError, Result};

#[derive(Debug, Clone, Default)]
pub struct Scope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Scope {
    /// Root scope with no deadline
    pub fn new() -> Self {
        Self::default()
    }

    /// Root scope driven by an existing token (e.g. a Ctrl+C handler)
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Child scope: cancelled with this one, same deadline
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child scope whose deadline is the earlier of ours and `now + timeout`.
    ///
    /// A timeout too large to represent adds no deadline of its own.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = match (self.deadline, Instant::now().checked_add(timeout)) {
            (Some(existing), Some(candidate)) => Some(existing.min(candidate)),
            (existing, None) => existing,
            (None, candidate) => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline,
        }
    }

    /// Cancel this scope and all of its children
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Underlying token, for collaborators that take one directly
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Fail fast if the scope has already fired
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(OpsError::Cancelled("scope cancelled".into()));
        }
        if self.is_expired() {
            return Err(OpsError::DeadlineExceeded("scope deadline passed".into()));
        }
        Ok(())
    }

    /// Resolves once the scope fires, with the matching terminal error.
    ///
    /// Explicit cancellation wins over a deadline reached at the same time.
    pub async fn done(&self) -> OpsError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => OpsError::Cancelled("scope cancelled".into()),
                    _ = tokio::time::sleep_until(deadline) => {
                        OpsError::DeadlineExceeded("scope deadline passed".into())
                    }
                }
            }
            None => {
                self.token.cancelled().await;
                OpsError::Cancelled("scope cancelled".into())
            }
        }
    }

    /// Race `fut` against the scope.
    ///
    /// The future is dropped if the scope fires first.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.check()?;
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }
}
