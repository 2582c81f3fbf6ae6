//! In-memory cloud backends.
//!
//! Each backend keeps its state behind a mutex, journals the calls made to
//! it, and can be told to fail a named operation. [`MemoryFleet`] can be
//! wired to a [`MemoryCluster`] so that raising desired capacity boots
//! instances which go in service and join the cluster after a delay, and
//! [`MemoryCluster`] can be wired to [`MemoryAgents`] so that started units
//! bring their agent online.

mod agents;
mod cluster;
mod fleet;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use fleetgrid_core::{ClusterMember, MemberStatus};

use crate::error::{CloudError, CloudResult};
use crate::pool::{ClientFactory, CloudClients};

pub use agents::MemoryAgents;
pub use cluster::MemoryCluster;
pub use fleet::{BootSimulation, FleetCall, MemoryFleet};

/// Build an idle cluster member. The instance id is derived from the ARN.
pub fn member(arn: &str, status: MemberStatus, cpu: u32, memory: u32) -> ClusterMember {
    ClusterMember {
        arn: arn.to_string(),
        instance_id: format!("i-{}", arn.trim_start_matches("m-")),
        status,
        remaining_cpu: cpu,
        remaining_memory: memory,
        running_tasks: 0,
        pending_tasks: 0,
        launch_time: epoch_secs(),
    }
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Failures armed per operation name; every call to that operation fails
/// until the failure is cleared.
#[derive(Default)]
pub(crate) struct Failures(HashMap<&'static str, CloudError>);

impl Failures {
    pub(crate) fn arm(&mut self, operation: &'static str, error: CloudError) {
        self.0.insert(operation, error);
    }

    pub(crate) fn clear(&mut self, operation: &str) {
        self.0.remove(operation);
    }

    pub(crate) fn check(&self, operation: &str) -> CloudResult<()> {
        match self.0.get(operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Hands out the same in-memory cluster and fleet for every key.
pub struct MemoryClientFactory {
    cluster: Arc<MemoryCluster>,
    fleet: Arc<MemoryFleet>,
    regions: Mutex<Vec<String>>,
}

impl MemoryClientFactory {
    pub fn new() -> Self {
        Self::with_backends(Arc::new(MemoryCluster::new()), Arc::new(MemoryFleet::new()))
    }

    pub fn with_backends(cluster: Arc<MemoryCluster>, fleet: Arc<MemoryFleet>) -> Self {
        Self {
            cluster,
            fleet,
            regions: Mutex::new(Vec::new()),
        }
    }

    /// Number of times `connect` was called.
    pub fn connects(&self) -> usize {
        lock(&self.regions).len()
    }

    /// Regions connected to, in order.
    pub fn regions(&self) -> Vec<String> {
        lock(&self.regions).clone()
    }
}

impl Default for MemoryClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFactory for MemoryClientFactory {
    fn connect(&self, _credentials_id: Option<&str>, region: &str) -> CloudResult<CloudClients> {
        lock(&self.regions).push(region.to_string());
        Ok(CloudClients {
            cluster: self.cluster.clone(),
            fleet: self.fleet.clone(),
        })
    }
}
