//! Bounded batch execution
//!
//! Runs independent work items (one per release, instance, ...) as separate
//! tokio tasks behind an admission gate of K slots. Every item reports
//! exactly one outcome; a failing or panicking item never affects the others.
//!
//! ## Flow
//!
//! ```text
//! items ──spawn──> [task] ──acquire slot──> work(scope) ──> outcome ──┐
//!                  [task] ──acquire slot──> work(scope) ──> outcome ──┼──> BatchResult
//!                  [task] ──(waiting)...                              ┘
//! ```

mod result;

pub use result::{BatchResult, ItemOutcome};

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::scope::Scope;
use crate::types::{OpsError, Result};

/// Concurrency used when the caller asks for 0
pub const DEFAULT_CONCURRENCY: usize = 3;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum items in flight; 0 falls back to `DEFAULT_CONCURRENCY`
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-item time limit, measured from admission
    #[serde(default)]
    pub item_timeout_ms: Option<u64>,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            item_timeout_ms: None,
        }
    }
}

impl BatchConfig {
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency == 0 {
            DEFAULT_CONCURRENCY
        } else {
            self.concurrency
        }
    }

    pub fn item_timeout(&self) -> Option<Duration> {
        self.item_timeout_ms.map(Duration::from_millis)
    }
}

// =============================================================================
// Work items
// =============================================================================

type Work<T> = Box<dyn FnOnce(Scope) -> BoxFuture<'static, Result<T>> + Send>;

/// One unit of remote work and its identifier
pub struct WorkItem<T> {
    id: String,
    work: Work<T>,
}

impl<T> WorkItem<T>
where
    T: Send + 'static,
{
    /// `work` receives the item's scope and must honor it in its remote calls
    pub fn new<F, Fut>(id: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(Scope) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            id: id.into(),
            work: Box::new(move |scope| work(scope).boxed()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T> std::fmt::Debug for WorkItem<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem").field("id", &self.id).finish_non_exhaustive()
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Fans work items out behind a K-slot admission gate
#[derive(Debug, Clone, Default)]
pub struct BatchOrchestrator {
    config: BatchConfig,
}

impl BatchOrchestrator {
    pub fn new(concurrency: usize) -> Self {
        Self::with_config(BatchConfig {
            concurrency,
            ..Default::default()
        })
    }

    pub fn with_config(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn concurrency(&self) -> usize {
        self.config.effective_concurrency()
    }

    /// Run every item and wait for all of them to report.
    ///
    /// Items not yet dispatched when `scope` fires are reported as cancelled
    /// without running. Admitted items see the cancellation through their
    /// own scope and finish on their own terms.
    pub async fn run<T>(&self, items: Vec<WorkItem<T>>, scope: &Scope) -> BatchResult<T>
    where
        T: Send + 'static,
    {
        let total = items.len();
        let concurrency = self.concurrency();
        let item_timeout = self.config.item_timeout();
        info!(items = total, concurrency, "Starting batch");

        let gate = Arc::new(Semaphore::new(concurrency));
        let ids: Vec<String> = items.iter().map(|item| item.id.clone()).collect();
        let mut slots: Vec<Option<ItemOutcome<T>>> = (0..total).map(|_| None).collect();
        let mut tasks = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            if let Err(err) = scope.check() {
                debug!(item = %item.id, "Scope fired before dispatch, skipping");
                slots[index] = Some(ItemOutcome::skipped(item.id, err));
                continue;
            }

            let gate = Arc::clone(&gate);
            let scope = scope.clone();
            tasks.spawn(async move { (index, run_item(item, gate, scope, item_timeout).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => error!("Batch task ended without reporting: {}", e),
            }
        }

        let outcomes: Vec<_> = slots
            .into_iter()
            .zip(ids)
            .map(|(slot, id)| {
                slot.unwrap_or_else(|| {
                    ItemOutcome::skipped(id, OpsError::Panicked("task ended without reporting".into()))
                })
            })
            .collect();

        let result = BatchResult::new(outcomes);
        info!(
            items = total,
            failed = result.failed_count(),
            "Batch finished"
        );
        result
    }
}

/// Run `items` with at most `concurrency` in flight (0 → default).
///
/// The returned `BatchResult` carries both halves of the outcome: per-item
/// results, and the single aggregate error through `aggregate_error()` or
/// `ensure_success()` ("2 failed out of 5 work items").
pub async fn run_batch<T>(items: Vec<WorkItem<T>>, concurrency: usize, scope: &Scope) -> BatchResult<T>
where
    T: Send + 'static,
{
    BatchOrchestrator::new(concurrency).run(items, scope).await
}

async fn run_item<T>(
    item: WorkItem<T>,
    gate: Arc<Semaphore>,
    scope: Scope,
    item_timeout: Option<Duration>,
) -> ItemOutcome<T>
where
    T: Send + 'static,
{
    let WorkItem { id, work } = item;

    let permit = match scope.run(gate.acquire_owned()).await {
        Ok(Ok(permit)) => permit,
        Ok(Err(_)) => {
            return ItemOutcome::skipped(id, OpsError::Cancelled("admission gate closed".into()))
        }
        Err(err) => {
            debug!(item = %id, error = %err, "Gave up waiting for a slot");
            return ItemOutcome::skipped(id, err);
        }
    };

    let started = Instant::now();
    let item_scope = match item_timeout {
        Some(timeout) => scope.with_timeout(timeout),
        None => scope.child(),
    };
    debug!(item = %id, "Work item admitted");

    // Calling `work` inside the async block keeps a synchronous panic in the
    // closure itself under catch_unwind too.
    let guarded = AssertUnwindSafe(async move { work(item_scope).await }).catch_unwind();
    let caught = match item_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, guarded).await {
            Ok(caught) => caught,
            Err(_) => Ok(Err(OpsError::DeadlineExceeded(format!(
                "work item {} exceeded {:?}",
                id, timeout
            )))),
        },
        None => guarded.await,
    };
    drop(permit);

    let result = caught.unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        error!(item = %id, "Work item panicked: {}", message);
        Err(OpsError::Panicked(message))
    });

    match &result {
        Ok(_) => debug!(item = %id, elapsed_ms = started.elapsed().as_millis() as u64, "Work item succeeded"),
        Err(e) => warn!(item = %id, error = %e, "Work item failed"),
    }

    ItemOutcome {
        id,
        result,
        elapsed: started.elapsed(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_concurrency_uses_default() {
        assert_eq!(BatchOrchestrator::new(0).concurrency(), DEFAULT_CONCURRENCY);
        assert_eq!(BatchOrchestrator::new(8).concurrency(), 8);
    }

    #[tokio::test]
    async fn test_outcomes_follow_submission_order() {
        let items: Vec<WorkItem<usize>> = (0..4)
            .map(|n| {
                WorkItem::new(format!("item-{}", n), move |_| async move {
                    // Later items finish first
                    tokio::time::sleep(Duration::from_millis(40 - n as u64 * 10)).await;
                    Ok(n)
                })
            })
            .collect();

        let result = run_batch(items, 4, &Scope::new()).await;
        assert_eq!(result.ids(), vec!["item-0", "item-1", "item-2", "item-3"]);
        assert!(result.ensure_success().is_ok());
        assert_eq!(*result.get("item-2").unwrap().result.as_ref().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_scope_dispatches_nothing() {
        let scope = Scope::new();
        scope.cancel();
        let ran = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let items: Vec<WorkItem<()>> = (0..3)
            .map(|n| {
                let ran = Arc::clone(&ran);
                WorkItem::new(format!("item-{}", n), move |_| async move {
                    ran.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        let result = run_batch(items, 2, &scope).await;
        assert_eq!(ran.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(result.len(), 3);
        assert_eq!(result.failed_count(), 3);
        assert!(result
            .failed()
            .all(|outcome| matches!(outcome.result, Err(OpsError::Cancelled(_)))));
    }

    #[tokio::test]
    async fn test_item_timeout_reports_deadline() {
        let orchestrator = BatchOrchestrator::with_config(BatchConfig {
            concurrency: 1,
            item_timeout_ms: Some(20),
        });
        let items = vec![
            WorkItem::new("slow", |_| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }),
            WorkItem::new("fast", |_| async { Ok(()) }),
        ];

        let result = orchestrator.run(items, &Scope::new()).await;
        assert!(result.get("slow").unwrap().result.as_ref().unwrap_err().is_deadline());
        assert!(result.get("fast").unwrap().is_success());
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
