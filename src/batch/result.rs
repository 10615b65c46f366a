//! Per-item outcomes and their aggregate

use std::time::Duration;

use crate::types::{OpsError, Result};

/// Outcome of one work item
#[derive(Debug)]
pub struct ItemOutcome<T> {
    pub id: String,
    pub result: Result<T>,
    /// Time spent running after admission (zero if never admitted)
    pub elapsed: Duration,
}

impl<T> ItemOutcome<T> {
    pub(crate) fn skipped(id: String, err: OpsError) -> Self {
        Self {
            id,
            result: Err(err),
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&OpsError> {
        self.result.as_ref().err()
    }
}

/// One outcome per submitted item, in submission order
#[derive(Debug)]
pub struct BatchResult<T> {
    outcomes: Vec<ItemOutcome<T>>,
}

impl<T> BatchResult<T> {
    pub(crate) fn new(outcomes: Vec<ItemOutcome<T>>) -> Self {
        Self { outcomes }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.outcomes.iter().map(|o| o.id.as_str()).collect()
    }

    /// First outcome recorded for `id`
    pub fn get(&self, id: &str) -> Option<&ItemOutcome<T>> {
        self.outcomes.iter().find(|o| o.id == id)
    }

    pub fn outcomes(&self) -> &[ItemOutcome<T>] {
        &self.outcomes
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ItemOutcome<T>> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ItemOutcome<T>> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn succeeded_count(&self) -> usize {
        self.len() - self.failed_count()
    }

    /// `BatchFailed` naming the failure count, if anything failed
    pub fn aggregate_error(&self) -> Option<OpsError> {
        match self.failed_count() {
            0 => None,
            failed => Some(OpsError::BatchFailed {
                failed,
                total: self.len(),
            }),
        }
    }

    pub fn ensure_success(&self) -> Result<()> {
        match self.aggregate_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn into_outcomes(self) -> Vec<ItemOutcome<T>> {
        self.outcomes
    }
}
