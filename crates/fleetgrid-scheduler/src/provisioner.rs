//! Provisioner: one cloud's entry point for "N more agents with label L".

use std::sync::Arc;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use fleetgrid_autoscale::{AdmissionConfig, CapacityAdmission, ClusterLocks, ScaleInReaper};
use fleetgrid_cloud::{
    AgentLifecycle, ClientPool, CloudClients, ClusterApi, ClusterSnapshotReader, FleetController,
};
use fleetgrid_core::{AgentHandle, CloudConfig, PlacementRequest, RuntimeConfig, TaskTemplate};

use crate::error::{ProvisionError, ProvisionResult};
use crate::workflow::{ProvisionedAgent, ProvisioningWorkflow, WorkflowSettings, WorkflowState};

/// One unit of requested capacity, provisioning in the background.
pub struct PlannedUnit {
    pub template: String,
    state: watch::Receiver<WorkflowState>,
    handle: JoinHandle<ProvisionResult<ProvisionedAgent>>,
}

impl PlannedUnit {
    /// Latest workflow state.
    pub fn state(&self) -> WorkflowState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.state.clone()
    }

    pub async fn outcome(self) -> ProvisionResult<ProvisionedAgent> {
        self.handle
            .await
            .map_err(|e| ProvisionError::Aborted(e.to_string()))?
    }
}

/// Provisions agents for one configured cloud.
pub struct Provisioner {
    cloud: CloudConfig,
    cluster: Arc<dyn ClusterApi>,
    agents: Arc<dyn AgentLifecycle>,
    clients: CloudClients,
    workflow: ProvisioningWorkflow,
    locks: ClusterLocks,
    permits: Arc<Semaphore>,
}

impl Provisioner {
    pub fn new(
        cloud: CloudConfig,
        runtime: &RuntimeConfig,
        clients: CloudClients,
        agents: Arc<dyn AgentLifecycle>,
        locks: ClusterLocks,
    ) -> Self {
        let admission = CapacityAdmission::new(
            ClusterSnapshotReader::new(clients.cluster.clone()),
            FleetController::new(clients.fleet.clone()),
        )
        .with_config(AdmissionConfig::from(runtime));
        let workflow = ProvisioningWorkflow::new(
            clients.cluster.clone(),
            agents.clone(),
            admission,
            locks.clone(),
            WorkflowSettings {
                cloud_name: cloud.name.clone(),
                agent_url: cloud.agent_url.clone(),
                tunnel: cloud.tunnel.clone(),
                online_poll: runtime.online_poll(),
            },
        );
        Self {
            cluster: clients.cluster.clone(),
            permits: Arc::new(Semaphore::new(runtime.max_concurrent_provisions.max(1))),
            cloud,
            agents,
            clients,
            workflow,
            locks,
        }
    }

    /// Build a provisioner with clients for the cloud's credentials and region.
    pub async fn from_config(
        cloud: &CloudConfig,
        runtime: &RuntimeConfig,
        pool: &ClientPool,
        agents: Arc<dyn AgentLifecycle>,
        locks: ClusterLocks,
    ) -> ProvisionResult<Self> {
        let clients = pool
            .get(cloud.credentials_id.as_deref(), cloud.region.as_deref())
            .await
            .map_err(|source| ProvisionError::Cloud {
                phase: WorkflowState::Requested,
                source,
            })?;
        Ok(Self::new(cloud.clone(), runtime, clients, agents, locks))
    }

    pub fn name(&self) -> &str {
        &self.cloud.name
    }

    pub fn cloud(&self) -> &CloudConfig {
        &self.cloud
    }

    /// Template serving `label`, if any.
    pub fn template_for(&self, label: Option<&str>) -> Option<&TaskTemplate> {
        self.cloud.template_for(label)
    }

    pub fn can_provision(&self, label: Option<&str>) -> bool {
        self.template_for(label).is_some()
    }

    pub fn request_for(&self, template: &TaskTemplate, label: Option<&str>) -> PlacementRequest {
        PlacementRequest {
            template: template.clone(),
            profile: self.cloud.launch.clone(),
            cluster: self.cloud.cluster.clone(),
            fleet: self.cloud.fleet.clone(),
            timeout: self.cloud.timeout(),
            label: label.map(str::to_string),
        }
    }

    /// Start `excess` independent workflows for `label`. Returns nothing if
    /// no template serves the label.
    pub fn provision(&self, label: Option<&str>, excess: u32) -> Vec<PlannedUnit> {
        let Some(template) = self.template_for(label) else {
            debug!(cloud = %self.cloud.name, ?label, "no template for label");
            return Vec::new();
        };
        info!(cloud = %self.cloud.name, template = %template.template_name, ?label, excess, "provisioning agents");

        (0..excess)
            .map(|_| {
                let request = self.request_for(template, label);
                let workflow = self.workflow.clone();
                let permits = self.permits.clone();
                let (progress, state) = watch::channel(WorkflowState::Requested);
                let handle = tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|e| ProvisionError::Aborted(e.to_string()))?;
                    workflow.run(&request, &progress).await
                });
                PlannedUnit {
                    template: template.template_name.clone(),
                    state,
                    handle,
                }
            })
            .collect()
    }

    /// Stop a provisioned agent's unit and remove its record.
    pub async fn retire(&self, agent: &AgentHandle, unit_arn: &str) -> ProvisionResult<()> {
        self.cluster
            .stop_unit(&self.cloud.cluster, unit_arn)
            .await
            .map_err(|source| ProvisionError::Cloud {
                phase: WorkflowState::AgentOnline,
                source,
            })?;
        self.agents
            .remove(agent)
            .await
            .map_err(|source| ProvisionError::Agent {
                phase: WorkflowState::AgentOnline,
                source,
            })?;
        info!(cloud = %self.cloud.name, agent = %agent.name, unit = %unit_arn, "agent retired");
        Ok(())
    }

    /// Scale-in reaper for this cloud's fleet, if it has one.
    pub fn reaper(&self) -> Option<ScaleInReaper> {
        let fleet = self.cloud.fleet.as_deref()?;
        let reaper = ScaleInReaper::new(
            &self.cloud.cluster,
            fleet,
            ClusterSnapshotReader::new(self.clients.cluster.clone()),
            FleetController::new(self.clients.fleet.clone()),
        );
        Some(if self.cloud.respect_cluster_lock {
            reaper.with_cluster_lock(self.locks.clone())
        } else {
            reaper
        })
    }
}
