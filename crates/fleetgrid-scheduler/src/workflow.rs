//! Provisioning workflow for one unit of agent capacity.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fleetgrid_autoscale::{CapacityAdmission, ClusterLocks};
use fleetgrid_cloud::{AgentLifecycle, ClusterApi, RunOutcome, RunUnitRequest};
use fleetgrid_core::{
    AgentHandle, EnvVar, LaunchProfile, PlacementRequest, RemoteDefinitionVersion,
};
use fleetgrid_definition::{DefinitionReconciler, family_name};

use crate::error::{ProvisionError, ProvisionResult};

/// Environment override naming the agent a unit runs as.
pub const AGENT_NAME_VAR: &str = "AGENT_NODE_NAME";

/// Environment override carrying the agent's connection secret.
pub const AGENT_SECRET_VAR: &str = "AGENT_NODE_SECRET";

/// Hex characters appended to the cloud name to form an agent name.
const AGENT_SUFFIX_LEN: usize = 16;

/// Where a placement request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowState {
    Requested,
    AwaitingCapacity,
    AgentCreated,
    DefinitionReady,
    TaskRunning,
    AgentOnline,
    Failed,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::AgentOnline | WorkflowState::Failed)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowState::Requested => "requested",
            WorkflowState::AwaitingCapacity => "awaiting_capacity",
            WorkflowState::AgentCreated => "agent_created",
            WorkflowState::DefinitionReady => "definition_ready",
            WorkflowState::TaskRunning => "task_running",
            WorkflowState::AgentOnline => "agent_online",
            WorkflowState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-cloud settings every workflow of that cloud shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSettings {
    /// Cloud name; prefixes agent names and definition families.
    pub cloud_name: String,
    /// URL the agent connects back to.
    pub agent_url: String,
    pub tunnel: Option<String>,
    /// Between checks while waiting for the agent to connect.
    pub online_poll: Duration,
}

/// A connected agent and the unit it runs in.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionedAgent {
    pub agent: AgentHandle,
    pub unit_arn: String,
    pub definition: RemoteDefinitionVersion,
}

/// A fresh agent name: the cloud name, a hyphen, and a random hex suffix.
pub fn agent_name(cloud_name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{cloud_name}-{}", &suffix[..AGENT_SUFFIX_LEN])
}

/// Command the unit's agent process is started with.
pub fn launch_command(
    agent_url: &str,
    tunnel: Option<&str>,
    secret: &str,
    agent_name: &str,
) -> Vec<String> {
    let mut command = vec!["-url".to_string(), agent_url.to_string()];
    if let Some(tunnel) = tunnel.filter(|t| !t.trim().is_empty()) {
        command.push("-tunnel".to_string());
        command.push(tunnel.to_string());
    }
    command.push(secret.to_string());
    command.push(agent_name.to_string());
    command
}

/// Runs placement requests for one cloud. Cheap to clone; each request
/// runs independently.
#[derive(Clone)]
pub struct ProvisioningWorkflow {
    cluster: Arc<dyn ClusterApi>,
    agents: Arc<dyn AgentLifecycle>,
    admission: CapacityAdmission,
    reconciler: DefinitionReconciler,
    locks: ClusterLocks,
    settings: WorkflowSettings,
}

impl ProvisioningWorkflow {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        agents: Arc<dyn AgentLifecycle>,
        admission: CapacityAdmission,
        locks: ClusterLocks,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            reconciler: DefinitionReconciler::new(cluster.clone()),
            cluster,
            agents,
            admission,
            locks,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Run one request to completion.
    pub async fn execute(&self, request: &PlacementRequest) -> ProvisionResult<ProvisionedAgent> {
        let (progress, _) = watch::channel(WorkflowState::Requested);
        self.run(request, &progress).await
    }

    /// Run one request, publishing each state change on `progress`.
    pub async fn run(
        &self,
        request: &PlacementRequest,
        progress: &watch::Sender<WorkflowState>,
    ) -> ProvisionResult<ProvisionedAgent> {
        let result = self.run_phases(request, progress).await;
        match &result {
            Ok(provisioned) => {
                self.transition(progress, WorkflowState::AgentOnline);
                info!(
                    agent = %provisioned.agent.name,
                    unit = %provisioned.unit_arn,
                    "agent online"
                );
            }
            Err(e) => {
                let phase = e.phase();
                self.transition(progress, WorkflowState::Failed);
                warn!(
                    cloud = %self.settings.cloud_name,
                    template = %request.template.template_name,
                    %phase,
                    error = %e,
                    "provisioning failed"
                );
            }
        }
        result
    }

    async fn run_phases(
        &self,
        request: &PlacementRequest,
        progress: &watch::Sender<WorkflowState>,
    ) -> ProvisionResult<ProvisionedAgent> {
        let deadline = Instant::now() + request.timeout;
        let template = &request.template;

        self.transition(progress, WorkflowState::AwaitingCapacity);
        match &request.profile {
            LaunchProfile::SelfManaged => {
                let _guard = self.locks.acquire(&request.cluster).await;
                let admitted = self
                    .admission
                    .await_capacity(template, &request.cluster, request.fleet.as_deref(), deadline)
                    .await?;
                debug!(cluster = %request.cluster, ?admitted, "capacity admitted");
            }
            LaunchProfile::Hosted(_) => {
                debug!(cluster = %request.cluster, "hosted launch, provider owns capacity");
            }
        }

        let name = agent_name(&self.settings.cloud_name);
        let labels: Vec<String> = request.label.iter().cloned().collect();
        let agent = self
            .agents
            .create(&name, &labels)
            .await
            .map_err(|source| ProvisionError::Agent {
                phase: WorkflowState::AwaitingCapacity,
                source,
            })?;
        self.transition(progress, WorkflowState::AgentCreated);

        let family = family_name(&self.settings.cloud_name, &template.template_name);
        let definition = match self
            .reconciler
            .reconcile(&family, template, &request.profile)
            .await
        {
            Ok(definition) => definition,
            Err(e) => {
                self.discard(&agent).await;
                return Err(e.into());
            }
        };
        self.transition(progress, WorkflowState::DefinitionReady);

        let secret = match self.agents.connection_secret(&agent).await {
            Ok(secret) => secret,
            Err(source) => {
                self.discard(&agent).await;
                return Err(ProvisionError::Agent {
                    phase: WorkflowState::DefinitionReady,
                    source,
                });
            }
        };
        let run = RunUnitRequest {
            cluster: request.cluster.clone(),
            definition: definition.reference.clone(),
            container_name: definition.spec.container.name.clone(),
            profile: request.profile.clone(),
            command: launch_command(
                &self.settings.agent_url,
                self.settings.tunnel.as_deref(),
                &secret,
                &name,
            ),
            environment: vec![
                EnvVar::new(AGENT_NAME_VAR, name.clone()),
                EnvVar::new(AGENT_SECRET_VAR, secret),
            ],
        };
        let unit_arn = match self.cluster.run_unit(run).await {
            Ok(RunOutcome::Started { unit_arn }) => unit_arn,
            Ok(RunOutcome::Rejected { failures }) => {
                self.discard(&agent).await;
                let reasons = failures
                    .into_iter()
                    .map(|f| match f.arn {
                        Some(arn) => format!("{arn}: {}", f.reason),
                        None => f.reason,
                    })
                    .collect();
                return Err(ProvisionError::Placement { reasons });
            }
            Err(source) => {
                self.discard(&agent).await;
                return Err(ProvisionError::Cloud {
                    phase: WorkflowState::DefinitionReady,
                    source,
                });
            }
        };
        info!(agent = %name, unit = %unit_arn, definition = %definition.reference, "unit started");
        self.transition(progress, WorkflowState::TaskRunning);

        self.wait_online(&request.cluster, &agent, &unit_arn, deadline)
            .await?;
        Ok(ProvisionedAgent {
            agent,
            unit_arn,
            definition,
        })
    }

    /// Poll the agent until it connects, vanishes, or the deadline passes.
    async fn wait_online(
        &self,
        cluster: &str,
        agent: &AgentHandle,
        unit_arn: &str,
        deadline: Instant,
    ) -> ProvisionResult<()> {
        loop {
            match self.agents.is_online(agent).await {
                Ok(Some(true)) => return Ok(()),
                Ok(Some(false)) => {}
                Ok(None) => return Err(ProvisionError::RecordDeleted(agent.name.clone())),
                Err(source) => {
                    self.abandon(cluster, agent, unit_arn).await;
                    return Err(ProvisionError::Agent {
                        phase: WorkflowState::TaskRunning,
                        source,
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                self.abandon(cluster, agent, unit_arn).await;
                return Err(ProvisionError::ConnectTimeout(agent.name.clone()));
            }
            tokio::time::sleep(self.settings.online_poll.min(deadline - now)).await;
        }
    }

    /// Remove the agent record. Failures are logged, never surfaced.
    async fn discard(&self, agent: &AgentHandle) {
        if let Err(e) = self.agents.remove(agent).await {
            warn!(agent = %agent.name, error = %e, "failed to remove agent record");
        }
    }

    /// Remove the agent record and stop the unit it was started in.
    async fn abandon(&self, cluster: &str, agent: &AgentHandle, unit_arn: &str) {
        self.discard(agent).await;
        if let Err(e) = self.cluster.stop_unit(cluster, unit_arn).await {
            warn!(%cluster, unit = %unit_arn, error = %e, "failed to stop unit");
        }
    }

    fn transition(&self, progress: &watch::Sender<WorkflowState>, to: WorkflowState) {
        let from = *progress.borrow();
        progress.send_replace(to);
        debug!(cloud = %self.settings.cloud_name, %from, %to, "workflow transition");
    }
}
