//! In-memory fleet with optional boot simulation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use fleetgrid_core::{FleetInstance, FleetState, LifecycleState, MemberStatus};

use super::{Failures, MemoryCluster, lock};
use crate::error::{CloudError, CloudResult};
use crate::fleet::FleetApi;

/// A mutating call made against the fleet, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetCall {
    SetDesired { fleet: String, desired: u32 },
    ProtectNew { fleet: String, protected: bool },
    Protect { instance_id: String, protected: bool },
    Terminate { instance_id: String, decrement: bool },
}

/// How launched instances come up.
///
/// Each instance goes in service after `in_service_after` and then joins
/// `cluster_id` as an active member with the given free resources after a
/// further `join_after`.
#[derive(Clone)]
pub struct BootSimulation {
    pub cluster: Arc<MemoryCluster>,
    pub cluster_id: String,
    pub in_service_after: Duration,
    pub join_after: Duration,
    pub cpu: u32,
    pub memory: u32,
}

#[derive(Default)]
struct FleetInner {
    fleets: BTreeMap<String, FleetState>,
    calls: Vec<FleetCall>,
    next_instance: u32,
    stalled: Vec<String>,
    failures: Failures,
}

impl FleetInner {
    fn next_instance_id(&mut self) -> String {
        self.next_instance += 1;
        format!("i-{:08x}", self.next_instance)
    }

    fn fleet_of(&mut self, instance_id: &str) -> Option<&mut FleetState> {
        self.fleets
            .values_mut()
            .find(|f| f.instances.iter().any(|i| i.instance_id == instance_id))
    }
}

/// Fleet API backed by process memory.
///
/// Without a [`BootSimulation`], instances launched by raising desired
/// capacity are in service immediately and never join a cluster.
#[derive(Default)]
pub struct MemoryFleet {
    inner: Arc<Mutex<FleetInner>>,
    boot: Option<BootSimulation>,
}

impl MemoryFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_boot(mut self, boot: BootSimulation) -> Self {
        self.boot = Some(boot);
        self
    }

    /// Create a fleet with `desired` instances already in service.
    pub fn add_fleet(&self, name: &str, desired: u32, min: u32, max: u32) {
        let mut inner = lock(&self.inner);
        let instances = (0..desired)
            .map(|_| FleetInstance {
                instance_id: inner.next_instance_id(),
                lifecycle: LifecycleState::InService,
                protected_from_scale_in: false,
            })
            .collect();
        inner.fleets.insert(
            name.to_string(),
            FleetState {
                name: name.to_string(),
                desired,
                min,
                max,
                instances,
                new_instances_protected: false,
            },
        );
    }

    pub fn state(&self, fleet: &str) -> Option<FleetState> {
        lock(&self.inner).fleets.get(fleet).cloned()
    }

    pub fn calls(&self) -> Vec<FleetCall> {
        lock(&self.inner).calls.clone()
    }

    /// Accept desired-capacity changes without ever launching instances.
    pub fn set_stalled(&self, fleet: &str, stalled: bool) {
        let mut inner = lock(&self.inner);
        inner.stalled.retain(|f| f != fleet);
        if stalled {
            inner.stalled.push(fleet.to_string());
        }
    }

    pub fn fail(&self, operation: &'static str, error: CloudError) {
        lock(&self.inner).failures.arm(operation, error);
    }

    pub fn clear_failure(&self, operation: &str) {
        lock(&self.inner).failures.clear(operation);
    }

    fn boot_instance(&self, instance_id: String) {
        let Some(boot) = self.boot.clone() else {
            return;
        };
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(boot.in_service_after).await;
            {
                let mut inner = lock(&inner);
                let Some(instance) = inner
                    .fleet_of(&instance_id)
                    .and_then(|f| f.instances.iter_mut().find(|i| i.instance_id == instance_id))
                else {
                    return;
                };
                instance.lifecycle = LifecycleState::InService;
            }
            debug!(%instance_id, "instance in service");

            tokio::time::sleep(boot.join_after).await;
            if lock(&inner).fleet_of(&instance_id).is_none() {
                return;
            }
            let arn = format!("m-{}", instance_id.trim_start_matches("i-"));
            let mut member = super::member(&arn, MemberStatus::Active, boot.cpu, boot.memory);
            member.instance_id = instance_id.clone();
            boot.cluster.add_member(&boot.cluster_id, member);
            debug!(%instance_id, cluster = %boot.cluster_id, "instance joined cluster");
        });
    }
}

#[async_trait]
impl FleetApi for MemoryFleet {
    async fn describe_fleet(&self, fleet: &str) -> CloudResult<Option<FleetState>> {
        let inner = lock(&self.inner);
        inner.failures.check("describe_fleet")?;
        Ok(inner.fleets.get(fleet).cloned())
    }

    async fn set_desired_capacity(&self, fleet: &str, desired: u32) -> CloudResult<()> {
        let mut launched = Vec::new();
        let mut retired = Vec::new();
        {
            let mut inner = lock(&self.inner);
            inner.failures.check("set_desired_capacity")?;
            let stalled = inner.stalled.iter().any(|f| f == fleet);
            let booting = self.boot.is_some();

            let state = inner
                .fleets
                .get(fleet)
                .ok_or_else(|| CloudError::NotFound(fleet.to_string()))?;
            if desired > state.max {
                return Err(CloudError::CapacityExceeded {
                    desired,
                    max: state.max,
                });
            }
            let current = state.instances.len() as u32;
            let protect = state.new_instances_protected;

            if desired > current && !stalled {
                for _ in current..desired {
                    launched.push(inner.next_instance_id());
                }
            }
            inner.calls.push(FleetCall::SetDesired {
                fleet: fleet.to_string(),
                desired,
            });

            let Some(state) = inner.fleets.get_mut(fleet) else {
                return Err(CloudError::NotFound(fleet.to_string()));
            };
            state.desired = desired;
            state.instances.extend(launched.iter().map(|id| FleetInstance {
                instance_id: id.clone(),
                lifecycle: if booting {
                    LifecycleState::Pending
                } else {
                    LifecycleState::InService
                },
                protected_from_scale_in: protect,
            }));
            while state.instances.len() as u32 > desired {
                let Some(pos) = state
                    .instances
                    .iter()
                    .rposition(|i| !i.protected_from_scale_in)
                else {
                    break;
                };
                retired.push(state.instances.remove(pos).instance_id);
            }
        }

        for instance_id in launched {
            self.boot_instance(instance_id);
        }
        if let Some(boot) = &self.boot {
            for instance_id in &retired {
                boot.cluster.remove_member_by_instance(instance_id);
            }
        }
        Ok(())
    }

    async fn set_new_instance_protection(&self, fleet: &str, protected: bool) -> CloudResult<()> {
        let mut inner = lock(&self.inner);
        inner.failures.check("set_new_instance_protection")?;
        let state = inner
            .fleets
            .get_mut(fleet)
            .ok_or_else(|| CloudError::NotFound(fleet.to_string()))?;
        state.new_instances_protected = protected;
        inner.calls.push(FleetCall::ProtectNew {
            fleet: fleet.to_string(),
            protected,
        });
        Ok(())
    }

    async fn set_scale_in_protection(
        &self,
        fleet: &str,
        instance_id: &str,
        protected: bool,
    ) -> CloudResult<()> {
        let mut inner = lock(&self.inner);
        inner.failures.check("set_scale_in_protection")?;
        let instance = inner
            .fleets
            .get_mut(fleet)
            .and_then(|f| f.instances.iter_mut().find(|i| i.instance_id == instance_id))
            .ok_or_else(|| CloudError::NotFound(instance_id.to_string()))?;
        instance.protected_from_scale_in = protected;
        inner.calls.push(FleetCall::Protect {
            instance_id: instance_id.to_string(),
            protected,
        });
        Ok(())
    }

    async fn terminate_instance(
        &self,
        instance_id: &str,
        decrement_desired: bool,
    ) -> CloudResult<()> {
        {
            let mut inner = lock(&self.inner);
            inner.failures.check("terminate_instance")?;
            let state = inner
                .fleet_of(instance_id)
                .ok_or_else(|| CloudError::NotFound(instance_id.to_string()))?;
            state.instances.retain(|i| i.instance_id != instance_id);
            if decrement_desired {
                state.desired = state.desired.saturating_sub(1);
            }
            inner.calls.push(FleetCall::Terminate {
                instance_id: instance_id.to_string(),
                decrement: decrement_desired,
            });
        }
        if let Some(boot) = &self.boot {
            boot.cluster.remove_member_by_instance(instance_id);
        }
        Ok(())
    }
}
