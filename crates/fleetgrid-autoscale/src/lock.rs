//! Per-cluster provisioning locks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per cluster id, created on first use.
///
/// Held while a provisioning request decides whether to scale out, so
/// concurrent requests against one cluster do not each ask for capacity.
#[derive(Clone, Default)]
pub struct ClusterLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ClusterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, cluster: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(cluster.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Whether another task currently holds the lock for `cluster`.
    pub async fn is_held(&self, cluster: &str) -> bool {
        let locks = self.locks.lock().await;
        locks.get(cluster).is_some_and(|l| l.try_lock().is_err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_cluster_serializes() {
        let locks = ClusterLocks::new();
        let guard = locks.acquire("ci").await;
        assert!(locks.is_held("ci").await);

        let contender = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = contender.acquire("ci").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(!locks.is_held("ci").await);
    }

    #[tokio::test]
    async fn clusters_are_independent() {
        let locks = ClusterLocks::new();
        let _ci = locks.acquire("ci").await;
        let _other = locks.acquire("other").await;
        assert!(locks.is_held("ci").await);
        assert!(locks.is_held("other").await);
    }
}
