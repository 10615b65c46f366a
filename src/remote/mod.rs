//! Remote service interfaces
//!
//! The host tool owns the real API clients; this crate only needs the calls
//! the workflows make. Every call takes the caller's `Scope` and must return
//! promptly once it fires.

mod command;
mod delivery;

pub use command::{CommandApi, CommandInvocation, CommandRequest, InvocationStatus};
pub use delivery::{ApplicationStatus, DeliveryApi, HealthStatus, SyncStatus};

pub use crate::pool::Connector;
