//! Keyed resource pool for remote-client handles
//!
//! Client handles (API sessions, SDK clients) are cheap to hold and expensive
//! to build. `ResourcePool` builds one per `PoolKey` on first use and hands
//! the same `Arc` to every later caller until the pool is torn down.
//!
//! ## Locking
//!
//! One `RwLock` over the map, double-checked:
//!
//! 1. Read lock, look the key up, release.
//! 2. On a miss take the write lock and look again. Two callers can both miss
//!    in step 1 and queue on the write lock; whoever gets it second finds the
//!    first caller's handle here and must not construct another one.
//! 3. Construct while still holding the write lock, insert, release.
//!
//! Construction failures are returned to the caller and never cached, so a
//! transient credential or network failure does not poison the key.

mod key;
pub mod registry;

pub use key::PoolKey;
pub use registry::{ManagedPool, PoolRegistry};

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::scope::Scope;
use crate::types::{OpsError, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Pool configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Rebuild handles older than this. Unset means handles live until teardown.
    #[serde(default)]
    pub handle_ttl_ms: Option<u64>,
}

impl PoolConfig {
    pub fn handle_ttl(&self) -> Option<Duration> {
        self.handle_ttl_ms.map(Duration::from_millis)
    }
}

// =============================================================================
// Handle construction
// =============================================================================

/// Builds a handle for a key.
///
/// Implemented by the host tool's client factories (one per remote service).
#[async_trait]
pub trait Connector<H>: Send + Sync {
    async fn connect(&self, key: &PoolKey, scope: &Scope) -> Result<H>;
}

// =============================================================================
// Pooled handle
// =============================================================================

/// A cached handle and the key it was built for
pub struct PooledHandle<H> {
    pub key: PoolKey,
    pub handle: Arc<H>,
    pub created_at: Instant,
}

impl<H> PooledHandle<H> {
    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.created_at.elapsed() >= ttl)
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct PoolCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    constructions: AtomicU64,
    construction_failures: AtomicU64,
}

impl PoolCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub name: String,
    /// Handles currently cached
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub constructions: u64,
    pub construction_failures: u64,
}

// =============================================================================
// Resource pool
// =============================================================================

/// Lazily built, shared handles keyed by `PoolKey`
pub struct ResourcePool<H> {
    name: String,
    entries: RwLock<HashMap<PoolKey, PooledHandle<H>>>,
    ttl: Option<Duration>,
    counters: PoolCounters,
}

impl<H> ResourcePool<H>
where
    H: Send + Sync + 'static,
{
    /// Create an empty pool; `name` identifies it in stats and logs
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, &PoolConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: &PoolConfig) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            ttl: config.handle_ttl(),
            counters: PoolCounters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the handle for `key`, building it with `construct` on a miss.
    ///
    /// `construct` runs at most once per key no matter how many callers miss
    /// at the same time. Waiting for the write lock and the construction
    /// itself both stop when `scope` fires.
    pub async fn acquire<F, Fut>(&self, key: &PoolKey, scope: &Scope, construct: F) -> Result<Arc<H>>
    where
        F: FnOnce(PoolKey, Scope) -> Fut,
        Fut: Future<Output = Result<H>>,
    {
        if let Some(handle) = self.cached(key, scope).await? {
            PoolCounters::bump(&self.counters.hits);
            return Ok(handle);
        }
        PoolCounters::bump(&self.counters.misses);

        let mut entries = scope.run(self.entries.write()).await?;

        // Another caller may have inserted while we queued for the lock
        if let Some(entry) = entries.get(key) {
            if !entry.is_expired(self.ttl) {
                debug!(pool = %self.name, key = %key, "Handle built by a concurrent caller");
                PoolCounters::bump(&self.counters.hits);
                return Ok(Arc::clone(&entry.handle));
            }
            debug!(pool = %self.name, key = %key, "Cached handle expired, rebuilding");
        }

        let built = scope
            .run(construct(key.clone(), scope.clone()))
            .await
            .and_then(|built| built);

        match built {
            Ok(handle) => {
                let handle = Arc::new(handle);
                entries.insert(
                    key.clone(),
                    PooledHandle {
                        key: key.clone(),
                        handle: Arc::clone(&handle),
                        created_at: Instant::now(),
                    },
                );
                PoolCounters::bump(&self.counters.constructions);
                info!(pool = %self.name, key = %key, entries = entries.len(), "Constructed pooled handle");
                Ok(handle)
            }
            Err(e) => {
                PoolCounters::bump(&self.counters.construction_failures);
                warn!(pool = %self.name, key = %key, error = %e, "Handle construction failed");
                Err(self.construction_error(key, e))
            }
        }
    }

    /// `acquire` with a `Connector` as the constructor
    pub async fn acquire_with(
        &self,
        key: &PoolKey,
        scope: &Scope,
        connector: &dyn Connector<H>,
    ) -> Result<Arc<H>> {
        self.acquire(key, scope, |key, scope| async move {
            connector.connect(&key, &scope).await
        })
        .await
    }

    /// Forget every cached handle. Handles already handed out stay usable.
    ///
    /// Returns the number of entries dropped.
    pub async fn teardown(&self) -> usize {
        let mut entries = self.entries.write().await;
        let dropped = entries.len();
        entries.clear();
        if dropped > 0 {
            info!(pool = %self.name, dropped, "Pool torn down");
        }
        dropped
    }

    /// Number of cached handles
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Keys with a cached handle, sorted
    pub async fn keys(&self) -> Vec<PoolKey> {
        let mut keys: Vec<_> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Snapshot of entry count and counters (read lock only)
    pub async fn stats(&self) -> PoolStats {
        let entries = self.entries.read().await.len();
        PoolStats {
            name: self.name.clone(),
            entries,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            constructions: self.counters.constructions.load(Ordering::Relaxed),
            construction_failures: self.counters.construction_failures.load(Ordering::Relaxed),
        }
    }

    async fn cached(&self, key: &PoolKey, scope: &Scope) -> Result<Option<Arc<H>>> {
        let entries = scope.run(self.entries.read()).await?;
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(self.ttl))
            .map(|entry| Arc::clone(&entry.handle)))
    }

    fn construction_error(&self, key: &PoolKey, err: OpsError) -> OpsError {
        match err {
            OpsError::Construction { .. } | OpsError::Cancelled(_) | OpsError::DeadlineExceeded(_) => err,
            other => OpsError::Construction {
                pool: self.name.clone(),
                key: key.to_string(),
                message: other.to_string(),
            },
        }
    }
}
