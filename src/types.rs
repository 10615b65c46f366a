//! Shared error type for opsgate

/// Errors surfaced by the pool, batch and poll layers.
///
/// Cancellation and deadline expiry are their own variants so callers can
/// tell "never converged" apart from "remote call refused".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpsError {
    /// Handle construction failed; never cached
    #[error("Failed to construct {pool} handle for {key}: {message}")]
    Construction {
        pool: String,
        key: String,
        message: String,
    },

    /// A remote call failed or was refused
    #[error("Remote call failed: {0}")]
    Remote(String),

    /// A work item panicked
    #[error("Work item panicked: {0}")]
    Panicked(String),

    /// Some items of a batch failed
    #[error("{failed} failed out of {total} work items")]
    BatchFailed { failed: usize, total: usize },

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl OpsError {
    /// True for errors caused by an explicit cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, OpsError::Cancelled(_))
    }

    /// True for errors caused by a deadline running out
    pub fn is_deadline(&self) -> bool {
        matches!(self, OpsError::DeadlineExceeded(_))
    }

    /// True for the two terminal scope conditions
    pub fn is_terminal(&self) -> bool {
        self.is_cancellation() || self.is_deadline()
    }
}

pub type Result<T> = std::result::Result<T, OpsError>;
