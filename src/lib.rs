//! opsgate - Concurrent resource layer for DevOps tooling
//!
//! Commands in the surrounding tool are thin glue over two remote control
//! planes (a GitOps delivery API and a cloud command API). This crate holds
//! the parts that have to be right under concurrency:
//!
//! ## Components
//!
//! - **Scope**: cancellation token plus optional deadline, passed to every
//!   long-running operation
//! - **Pool**: keyed cache of expensive client handles, constructed at most
//!   once per key
//! - **Batch**: bounded fan-out of independent work items with per-item
//!   outcomes and one aggregate error
//! - **Poll**: "observe until the predicate holds or the deadline passes"
//! - **Workflows**: parallel release convergence and instance validation
//!   built on the three primitives above

pub mod batch;
pub mod config;
pub mod logging;
pub mod poll;
pub mod pool;
pub mod remote;
pub mod scope;
pub mod types;
pub mod workflows;

pub use batch::{BatchConfig, BatchOrchestrator, BatchResult, ItemOutcome, WorkItem};
pub use config::{Args, Config};
pub use poll::{poll_until, PollConfig, PollOutcome};
pub use pool::{PoolConfig, PoolKey, PoolRegistry, PoolStats, ResourcePool};
pub use scope::Scope;
pub use types::{OpsError, Result};
