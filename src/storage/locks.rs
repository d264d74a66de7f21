use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per site id
///
/// Ingestion, lifecycle, purge, clear and rebuild of the same site never
/// interleave inside this process. Other processes must coordinate
/// externally.
#[derive(Debug, Clone, Default)]
pub struct SiteLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SiteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, site: &str) -> OwnedMutexGuard<()> {
        // Clone the Arc out so no map shard stays locked across the await
        let lock = self.locks.entry(site.to_string()).or_default().value().clone();
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
