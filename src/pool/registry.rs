//! Registry of named pools
//!
//! The tool keeps one pool per handle kind (delivery sessions, command
//! clients, ...). The registry lets callers report on and tear down all of
//! them without knowing their handle types.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{PoolStats, ResourcePool};

/// Type-erased view of a `ResourcePool`
#[async_trait]
pub trait ManagedPool: Send + Sync {
    fn pool_name(&self) -> &str;
    async fn pool_stats(&self) -> PoolStats;
    async fn clear(&self) -> usize;
}

#[async_trait]
impl<H> ManagedPool for ResourcePool<H>
where
    H: Send + Sync + 'static,
{
    fn pool_name(&self) -> &str {
        self.name()
    }

    async fn pool_stats(&self) -> PoolStats {
        self.stats().await
    }

    async fn clear(&self) -> usize {
        self.teardown().await
    }
}

/// Named sub-pools sharing one lifecycle
#[derive(Clone, Default)]
pub struct PoolRegistry {
    pools: Vec<Arc<dyn ManagedPool>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool(mut self, pool: Arc<dyn ManagedPool>) -> Self {
        self.register(pool);
        self
    }

    pub fn register(&mut self, pool: Arc<dyn ManagedPool>) {
        self.pools.push(pool);
    }

    /// Cached entry count per pool name
    pub async fn stats(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for pool in &self.pools {
            let stats = pool.pool_stats().await;
            *counts.entry(stats.name).or_insert(0) += stats.entries;
        }
        counts
    }

    /// Full per-pool snapshots, in registration order
    pub async fn detailed_stats(&self) -> Vec<PoolStats> {
        let mut all = Vec::with_capacity(self.pools.len());
        for pool in &self.pools {
            all.push(pool.pool_stats().await);
        }
        all
    }

    /// Tear down every registered pool. Returns total entries dropped.
    pub async fn teardown(&self) -> usize {
        let mut dropped = 0;
        for pool in &self.pools {
            dropped += pool.clear().await;
        }
        info!(pools = self.pools.len(), dropped, "Pool registry torn down");
        dropped
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
