//! Convergence polling
//!
//! `poll_until` observes remote state every interval until a predicate holds,
//! the deadline passes, or the scope is cancelled. A failed observation is
//! logged and retried on the next tick; only the deadline and cancellation
//! end the loop.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::scope::Scope;
use crate::types::{OpsError, Result};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Time between observations
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Overall time allowed for convergence
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Observe once before the first interval elapses
    #[serde(default = "default_true")]
    pub immediate_check: bool,
}

fn default_interval_ms() -> u64 { 5_000 }
fn default_timeout_ms() -> u64 { 300_000 }
fn default_true() -> bool { true }

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            immediate_check: true,
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            timeout_ms: timeout.as_millis() as u64,
            immediate_check: true,
        }
    }

    pub fn with_immediate_check(mut self, immediate_check: bool) -> Self {
        self.immediate_check = immediate_check;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// How a poll ended
#[derive(Debug)]
pub enum PollOutcome<S> {
    /// The predicate held against this observation
    Converged(S),
    /// Deadline passed; `last` is the most recent successful observation
    TimedOut { last: Option<S> },
    /// Deadline passed without a single successful observation
    ObservationFailed { error: OpsError },
    /// The scope was cancelled
    Cancelled { last: Option<S> },
}

impl<S> PollOutcome<S> {
    pub fn is_converged(&self) -> bool {
        matches!(self, PollOutcome::Converged(_))
    }

    /// Most recent observed state, converged or not
    pub fn last_state(&self) -> Option<&S> {
        match self {
            PollOutcome::Converged(state) => Some(state),
            PollOutcome::TimedOut { last } | PollOutcome::Cancelled { last } => last.as_ref(),
            PollOutcome::ObservationFailed { .. } => None,
        }
    }
}

impl<S: fmt::Debug> PollOutcome<S> {
    /// Map onto the crate error taxonomy; `subject` names what was polled
    pub fn into_result(self, subject: &str) -> Result<S> {
        match self {
            PollOutcome::Converged(state) => Ok(state),
            PollOutcome::TimedOut { last: Some(state) } => Err(OpsError::DeadlineExceeded(
                format!("{} did not converge (last seen: {:?})", subject, state),
            )),
            PollOutcome::TimedOut { last: None } => Err(OpsError::DeadlineExceeded(format!(
                "{} did not converge (never observed)",
                subject
            ))),
            PollOutcome::ObservationFailed { error } => Err(error),
            PollOutcome::Cancelled { .. } => {
                Err(OpsError::Cancelled(format!("polling {} cancelled", subject)))
            }
        }
    }
}

// =============================================================================
// Poll loop
// =============================================================================

/// Observe until `predicate` holds, `config.timeout()` elapses, or `scope`
/// fires.
///
/// Each wait takes the first of {tick, deadline, cancel}, in that priority.
/// Observations get the poll scope and are expected to honor it; an
/// in-flight observation is never interrupted, but the deadline and
/// cancellation are checked as soon as it returns.
pub async fn poll_until<S, O, Fut, P>(
    mut observe: O,
    predicate: P,
    config: &PollConfig,
    scope: &Scope,
) -> PollOutcome<S>
where
    O: FnMut(Scope) -> Fut,
    Fut: Future<Output = Result<S>>,
    P: Fn(&S) -> bool,
{
    let interval = config.interval().max(Duration::from_millis(1));
    let poll_scope = scope.with_timeout(config.timeout());
    let deadline = poll_scope.deadline();

    let mut tracker = Tracker::new();

    if config.immediate_check {
        if let Some(state) = tracker
            .observe(&mut observe, &predicate, &poll_scope)
            .await
        {
            return PollOutcome::Converged(state);
        }
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // A slow observation leaves the next tick already due, and the biased
        // select would then never reach the deadline or cancel branches.
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return tracker.timed_out();
        }
        if poll_scope.is_cancelled() {
            debug!(attempts = tracker.attempts, "Polling cancelled");
            return PollOutcome::Cancelled { last: tracker.last };
        }

        tokio::select! {
            biased;
            _ = ticker.tick() => {}
            _ = until(deadline) => {
                return tracker.timed_out();
            }
            _ = poll_scope.token().cancelled() => {
                debug!(attempts = tracker.attempts, "Polling cancelled");
                return PollOutcome::Cancelled { last: tracker.last };
            }
        }

        if let Some(state) = tracker
            .observe(&mut observe, &predicate, &poll_scope)
            .await
        {
            return PollOutcome::Converged(state);
        }
    }
}

/// Sleeps until `deadline`, or forever when there is none
async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Last state, last error and attempt count across ticks
struct Tracker<S> {
    attempts: u32,
    last: Option<S>,
    last_error: Option<OpsError>,
}

impl<S> Tracker<S> {
    fn new() -> Self {
        Self {
            attempts: 0,
            last: None,
            last_error: None,
        }
    }

    /// One observation; returns the state if the predicate holds
    async fn observe<O, Fut, P>(&mut self, observe: &mut O, predicate: &P, scope: &Scope) -> Option<S>
    where
        O: FnMut(Scope) -> Fut,
        Fut: Future<Output = Result<S>>,
        P: Fn(&S) -> bool,
    {
        self.attempts += 1;
        match observe(scope.clone()).await {
            Ok(state) if predicate(&state) => {
                info!(attempts = self.attempts, "Condition converged");
                Some(state)
            }
            Ok(state) => {
                debug!(attempts = self.attempts, "Condition not met yet");
                self.last = Some(state);
                None
            }
            Err(e) => {
                warn!(attempts = self.attempts, error = %e, "Observation failed, retrying on next tick");
                self.last_error = Some(e);
                None
            }
        }
    }

    fn timed_out(self) -> PollOutcome<S> {
        debug!(attempts = self.attempts, "Polling deadline reached");
        match (self.last, self.last_error) {
            (None, Some(error)) => PollOutcome::ObservationFailed { error },
            (last, _) => PollOutcome::TimedOut { last },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(timeout_ms: u64) -> PollConfig {
        PollConfig::new(Duration::from_millis(10), Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn test_immediate_check_converges_without_waiting() {
        let started = Instant::now();
        let outcome = poll_until(
            |_| async { Ok::<_, OpsError>("Healthy") },
            |state| *state == "Healthy",
            &PollConfig::new(Duration::from_secs(60), Duration::from_secs(120)),
            &Scope::new(),
        )
        .await;

        assert!(outcome.is_converged());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_transient_errors_do_not_stop_polling() {
        let calls = &AtomicU32::new(0);
        let outcome = poll_until(
            move |_| async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(OpsError::Remote("throttled".into())),
                    n => Ok(n),
                }
            },
            |n| *n >= 3,
            &fast(2_000),
            &Scope::new(),
        )
        .await;

        assert_eq!(outcome.into_result("counter").unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_only_errors_reports_observation_failed() {
        let outcome: PollOutcome<u32> = poll_until(
            |_| async { Err(OpsError::Remote("connection refused".into())) },
            |_| true,
            &fast(50),
            &Scope::new(),
        )
        .await;

        match outcome {
            PollOutcome::ObservationFailed { error } => {
                assert_eq!(error, OpsError::Remote("connection refused".into()))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_keeps_last_state() {
        let outcome = poll_until(
            |_| async { Ok::<_, OpsError>("Progressing") },
            |state| *state == "Healthy",
            &fast(50),
            &Scope::new(),
        )
        .await;

        assert_eq!(outcome.last_state(), Some(&"Progressing"));
        let err = outcome.into_result("app").unwrap_err();
        assert!(err.is_deadline());
        assert!(err.to_string().contains("Progressing"));
    }

    #[tokio::test]
    async fn test_cancel_is_distinct_from_timeout() {
        let scope = Scope::new();
        let canceller = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let outcome = poll_until(
            |_| async { Ok::<_, OpsError>(false) },
            |done| *done,
            &fast(60_000),
            &scope,
        )
        .await;

        assert!(matches!(outcome, PollOutcome::Cancelled { last: Some(false) }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_default_config() {
        let config = PollConfig::default();
        assert_eq!(config.interval(), Duration::from_secs(5));
        assert_eq!(config.timeout(), Duration::from_secs(300));
        assert!(config.immediate_check);
    }
}
