//! In-memory cluster: members, definition versions and running units.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use fleetgrid_core::{
    ClusterMember, DefinitionRef, DefinitionSpec, LaunchProfile, MemberStatus,
    RemoteDefinitionVersion,
};

use super::{Failures, MemoryAgents, lock};
use crate::cluster::{ClusterApi, Page, PlacementFailure, RunOutcome, RunUnitRequest};
use crate::error::{CloudError, CloudResult};

const DEFAULT_PAGE_SIZE: usize = 100;

/// Environment override carrying the agent name on a run request.
const AGENT_NAME_VAR: &str = "AGENT_NODE_NAME";

#[derive(Debug, Clone)]
struct Unit {
    cluster: String,
    /// Member the unit was placed on; `None` for hosted launches.
    member: Option<String>,
    cpu: u32,
    memory: u32,
}

#[derive(Default)]
struct ClusterState {
    members: HashMap<String, Vec<ClusterMember>>,
    definitions: BTreeMap<String, Vec<RemoteDefinitionVersion>>,
    units: BTreeMap<String, Unit>,
    next_unit: u64,
    list_calls: HashMap<String, usize>,
    describe_calls: usize,
    definition_list_calls: usize,
    publish_calls: usize,
    run_requests: Vec<RunUnitRequest>,
    stopped: Vec<String>,
    reject_next: Option<Vec<PlacementFailure>>,
    failures: Failures,
}

/// Cluster API backed by process memory.
///
/// Listings are paginated with offset tokens. Units are placed on the
/// first active member with room for the definition's container and
/// consume its resources until stopped.
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
    page_size: usize,
    agents: Option<(Arc<MemoryAgents>, Duration)>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClusterState::default()),
            page_size: DEFAULT_PAGE_SIZE,
            agents: None,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Bring a unit's agent online `connect_after` once the unit starts.
    pub fn with_agents(mut self, agents: Arc<MemoryAgents>, connect_after: Duration) -> Self {
        self.agents = Some((agents, connect_after));
        self
    }

    // ── Test helpers ────────────────────────────────────────────────

    pub fn add_member(&self, cluster: &str, member: ClusterMember) {
        lock(&self.state)
            .members
            .entry(cluster.to_string())
            .or_default()
            .push(member);
    }

    pub fn member(&self, cluster: &str, arn: &str) -> Option<ClusterMember> {
        lock(&self.state)
            .members
            .get(cluster)
            .and_then(|ms| ms.iter().find(|m| m.arn == arn).cloned())
    }

    pub fn members(&self, cluster: &str) -> Vec<ClusterMember> {
        lock(&self.state)
            .members
            .get(cluster)
            .cloned()
            .unwrap_or_default()
    }

    /// Deregister whatever member runs on `instance_id`, in any cluster.
    pub fn remove_member_by_instance(&self, instance_id: &str) {
        let mut state = lock(&self.state);
        for members in state.members.values_mut() {
            members.retain(|m| m.instance_id != instance_id);
        }
    }

    pub fn set_task_counts(&self, cluster: &str, arn: &str, running: u32, pending: u32) {
        let mut state = lock(&self.state);
        if let Some(m) = state
            .members
            .get_mut(cluster)
            .and_then(|ms| ms.iter_mut().find(|m| m.arn == arn))
        {
            m.running_tasks = running;
            m.pending_tasks = pending;
        }
    }

    pub fn set_launch_time(&self, cluster: &str, arn: &str, launch_time: u64) {
        let mut state = lock(&self.state);
        if let Some(m) = state
            .members
            .get_mut(cluster)
            .and_then(|ms| ms.iter_mut().find(|m| m.arn == arn))
        {
            m.launch_time = launch_time;
        }
    }

    /// Published versions of a family, oldest first.
    pub fn published(&self, family: &str) -> Vec<RemoteDefinitionVersion> {
        lock(&self.state)
            .definitions
            .get(family)
            .cloned()
            .unwrap_or_default()
    }

    pub fn publish_calls(&self) -> usize {
        lock(&self.state).publish_calls
    }

    pub fn list_calls(&self, cluster: &str) -> usize {
        lock(&self.state)
            .list_calls
            .get(cluster)
            .copied()
            .unwrap_or(0)
    }

    pub fn describe_calls(&self) -> usize {
        lock(&self.state).describe_calls
    }

    pub fn definition_list_calls(&self) -> usize {
        lock(&self.state).definition_list_calls
    }

    pub fn run_requests(&self) -> Vec<RunUnitRequest> {
        lock(&self.state).run_requests.clone()
    }

    pub fn running_units(&self) -> Vec<String> {
        lock(&self.state).units.keys().cloned().collect()
    }

    pub fn stopped_units(&self) -> Vec<String> {
        lock(&self.state).stopped.clone()
    }

    /// Reject the next run request with these failures.
    pub fn reject_next_run(&self, failures: Vec<PlacementFailure>) {
        lock(&self.state).reject_next = Some(failures);
    }

    pub fn fail(&self, operation: &'static str, error: CloudError) {
        lock(&self.state).failures.arm(operation, error);
    }

    pub fn clear_failure(&self, operation: &str) {
        lock(&self.state).failures.clear(operation);
    }

    fn page<T: Clone>(&self, items: &[T], token: Option<String>) -> CloudResult<Page<T>> {
        let start = match token {
            Some(t) => t
                .parse::<usize>()
                .map_err(|_| CloudError::api("list", format!("invalid next token {t}")))?,
            None => 0,
        };
        let end = (start + self.page_size).min(items.len());
        let next_token = (end < items.len()).then(|| end.to_string());
        Ok(Page {
            items: items.get(start..end).map(<[T]>::to_vec).unwrap_or_default(),
            next_token,
        })
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn family_of(reference: &str) -> Option<&str> {
    let rest = reference.strip_prefix("arn:definition/")?;
    rest.rsplit_once(':').map(|(family, _)| family)
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn list_members(
        &self,
        cluster: &str,
        status: Option<MemberStatus>,
        next_token: Option<String>,
    ) -> CloudResult<Page<String>> {
        let arns: Vec<String> = {
            let mut state = lock(&self.state);
            state.failures.check("list_members")?;
            *state.list_calls.entry(cluster.to_string()).or_default() += 1;
            state
                .members
                .get(cluster)
                .map(|ms| {
                    ms.iter()
                        .filter(|m| status.is_none_or(|s| m.status == s))
                        .map(|m| m.arn.clone())
                        .collect()
                })
                .unwrap_or_default()
        };
        self.page(&arns, next_token)
    }

    async fn describe_members(
        &self,
        cluster: &str,
        arns: &[String],
    ) -> CloudResult<Vec<ClusterMember>> {
        let mut state = lock(&self.state);
        state.failures.check("describe_members")?;
        state.describe_calls += 1;
        Ok(state
            .members
            .get(cluster)
            .map(|ms| {
                ms.iter()
                    .filter(|m| arns.contains(&m.arn))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn run_unit(&self, request: RunUnitRequest) -> CloudResult<RunOutcome> {
        let unit_arn = {
            let mut state = lock(&self.state);
            state.failures.check("run_unit")?;
            state.run_requests.push(request.clone());

            if let Some(failures) = state.reject_next.take() {
                return Ok(RunOutcome::Rejected { failures });
            }

            let family = family_of(&request.definition)
                .ok_or_else(|| CloudError::NotFound(request.definition.clone()))?;
            let container = state
                .definitions
                .get(family)
                .and_then(|vs| vs.iter().find(|v| v.reference == request.definition))
                .map(|v| v.spec.container.clone())
                .ok_or_else(|| CloudError::NotFound(request.definition.clone()))?;
            let cpu = container.cpu;
            let memory = container
                .memory
                .filter(|m| *m > 0)
                .or(container.memory_reservation)
                .unwrap_or(0);

            let member = match request.profile {
                LaunchProfile::Hosted(_) => None,
                LaunchProfile::SelfManaged => {
                    let slot = state.members.get_mut(&request.cluster).and_then(|ms| {
                        ms.iter_mut().find(|m| {
                            m.status == MemberStatus::Active
                                && m.remaining_cpu >= cpu
                                && m.remaining_memory >= memory
                        })
                    });
                    let Some(slot) = slot else {
                        return Ok(RunOutcome::Rejected {
                            failures: vec![PlacementFailure {
                                arn: None,
                                reason: "RESOURCE:MEMORY".to_string(),
                            }],
                        });
                    };
                    slot.remaining_cpu -= cpu;
                    slot.remaining_memory -= memory;
                    slot.running_tasks += 1;
                    Some(slot.arn.clone())
                }
            };

            state.next_unit += 1;
            let unit_arn = format!("arn:unit/{}/{:06}", request.cluster, state.next_unit);
            state.units.insert(
                unit_arn.clone(),
                Unit {
                    cluster: request.cluster.clone(),
                    member,
                    cpu,
                    memory,
                },
            );
            unit_arn
        };
        debug!(%unit_arn, definition = %request.definition, "unit started");

        if let Some((agents, connect_after)) = &self.agents
            && let Some(name) = request
                .environment
                .iter()
                .find(|e| e.name == AGENT_NAME_VAR)
                .map(|e| e.value.clone())
        {
            let agents = agents.clone();
            let connect_after = *connect_after;
            tokio::spawn(async move {
                tokio::time::sleep(connect_after).await;
                agents.set_online(&name, true);
            });
        }

        Ok(RunOutcome::Started { unit_arn })
    }

    async fn stop_unit(&self, cluster: &str, unit_arn: &str) -> CloudResult<()> {
        let mut state = lock(&self.state);
        state.failures.check("stop_unit")?;
        let unit = state
            .units
            .remove(unit_arn)
            .filter(|u| u.cluster == cluster)
            .ok_or_else(|| CloudError::NotFound(unit_arn.to_string()))?;
        if let Some(arn) = &unit.member
            && let Some(m) = state
                .members
                .get_mut(cluster)
                .and_then(|ms| ms.iter_mut().find(|m| &m.arn == arn))
        {
            m.remaining_cpu += unit.cpu;
            m.remaining_memory += unit.memory;
            m.running_tasks = m.running_tasks.saturating_sub(1);
        }
        state.stopped.push(unit_arn.to_string());
        Ok(())
    }

    async fn list_definition_versions(
        &self,
        family: &str,
        next_token: Option<String>,
    ) -> CloudResult<Page<DefinitionRef>> {
        let refs: Vec<DefinitionRef> = {
            let mut state = lock(&self.state);
            state.failures.check("list_definition_versions")?;
            state.definition_list_calls += 1;
            state
                .definitions
                .get(family)
                .map(|vs| vs.iter().map(|v| v.reference.clone()).collect())
                .unwrap_or_default()
        };
        self.page(&refs, next_token)
    }

    async fn describe_definition_version(
        &self,
        reference: &str,
    ) -> CloudResult<RemoteDefinitionVersion> {
        let state = lock(&self.state);
        state.failures.check("describe_definition_version")?;
        family_of(reference)
            .and_then(|family| state.definitions.get(family))
            .and_then(|vs| vs.iter().find(|v| v.reference == reference))
            .cloned()
            .ok_or_else(|| CloudError::NotFound(reference.to_string()))
    }

    async fn publish_definition_version(
        &self,
        spec: DefinitionSpec,
    ) -> CloudResult<RemoteDefinitionVersion> {
        let mut state = lock(&self.state);
        state.failures.check("publish_definition_version")?;
        state.publish_calls += 1;
        let versions = state.definitions.entry(spec.family.clone()).or_default();
        let revision = versions.len() as u32 + 1;
        let version = RemoteDefinitionVersion {
            reference: format!("arn:definition/{}:{revision}", spec.family),
            revision,
            spec,
        };
        versions.push(version.clone());
        Ok(version)
    }

    async fn set_member_drain_state(
        &self,
        cluster: &str,
        arn: &str,
        status: MemberStatus,
    ) -> CloudResult<()> {
        let mut state = lock(&self.state);
        state.failures.check("set_member_drain_state")?;
        let member = state
            .members
            .get_mut(cluster)
            .and_then(|ms| ms.iter_mut().find(|m| m.arn == arn))
            .ok_or_else(|| CloudError::NotFound(arn.to_string()))?;
        member.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentLifecycle;
    use crate::memory::member;
    use fleetgrid_core::{Compatibility, ContainerSpec, EnvVar};

    fn spec(family: &str, cpu: u32, memory: u32) -> DefinitionSpec {
        DefinitionSpec {
            family: family.to_string(),
            container: ContainerSpec {
                name: family.to_string(),
                image: "ci/agent".to_string(),
                cpu,
                memory: Some(memory),
                memory_reservation: None,
                environment: Vec::new(),
                mount_points: Vec::new(),
                extra_hosts: Vec::new(),
                entrypoint: None,
                privileged: false,
                essential: true,
                log_config: None,
            },
            volumes: Vec::new(),
            task_role: None,
            execution_role: None,
            compatibilities: vec![Compatibility::SelfManaged],
            sizing: None,
            network_mode: None,
        }
    }

    fn request(definition: &str, agent: &str) -> RunUnitRequest {
        RunUnitRequest {
            cluster: "ci".to_string(),
            definition: definition.to_string(),
            container_name: "ci-java".to_string(),
            profile: LaunchProfile::SelfManaged,
            command: Vec::new(),
            environment: vec![EnvVar::new(AGENT_NAME_VAR, agent)],
        }
    }

    #[tokio::test]
    async fn publish_assigns_increasing_revisions() {
        let cluster = MemoryCluster::new().with_page_size(1);
        cluster.publish_definition_version(spec("ci-java", 512, 1024)).await.unwrap();
        let v2 = cluster.publish_definition_version(spec("ci-java", 512, 2048)).await.unwrap();
        assert_eq!(v2.revision, 2);
        assert_eq!(v2.reference, "arn:definition/ci-java:2");

        let first = cluster.list_definition_versions("ci-java", None).await.unwrap();
        assert_eq!(first.items, vec!["arn:definition/ci-java:1".to_string()]);
        let second = cluster
            .list_definition_versions("ci-java", first.next_token)
            .await
            .unwrap();
        assert_eq!(second.items, vec![v2.reference.clone()]);
        assert_eq!(second.next_token, None);

        let described = cluster.describe_definition_version(&v2.reference).await.unwrap();
        assert_eq!(described, v2);
    }

    #[tokio::test]
    async fn run_consumes_and_stop_releases_resources() {
        let cluster = MemoryCluster::new();
        cluster.add_member("ci", member("m-1", MemberStatus::Active, 1024, 2048));
        let def = cluster.publish_definition_version(spec("ci-java", 512, 1024)).await.unwrap();

        let RunOutcome::Started { unit_arn } =
            cluster.run_unit(request(&def.reference, "a")).await.unwrap()
        else {
            panic!("expected the unit to start");
        };
        let m = cluster.member("ci", "m-1").unwrap();
        assert_eq!((m.remaining_cpu, m.remaining_memory, m.running_tasks), (512, 1024, 1));

        cluster.stop_unit("ci", &unit_arn).await.unwrap();
        let m = cluster.member("ci", "m-1").unwrap();
        assert_eq!((m.remaining_cpu, m.remaining_memory, m.running_tasks), (1024, 2048, 0));
        assert_eq!(cluster.stopped_units(), vec![unit_arn]);
    }

    #[tokio::test]
    async fn run_rejects_when_nothing_fits() {
        let cluster = MemoryCluster::new();
        cluster.add_member("ci", member("m-1", MemberStatus::Active, 256, 512));
        cluster.add_member("ci", member("m-2", MemberStatus::Draining, 4096, 8192));
        let def = cluster.publish_definition_version(spec("ci-java", 512, 1024)).await.unwrap();

        let outcome = cluster.run_unit(request(&def.reference, "a")).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn armed_failure_fails_until_cleared() {
        let cluster = MemoryCluster::new();
        cluster.fail("list_members", CloudError::Throttled("slow down".to_string()));
        assert!(cluster.list_members("ci", None, None).await.is_err());
        cluster.clear_failure("list_members");
        assert!(cluster.list_members("ci", None, None).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn started_unit_brings_agent_online() {
        let agents = Arc::new(MemoryAgents::new());
        let cluster =
            MemoryCluster::new().with_agents(agents.clone(), Duration::from_secs(3));
        cluster.add_member("ci", member("m-1", MemberStatus::Active, 1024, 2048));
        let def = cluster.publish_definition_version(spec("ci-java", 512, 1024)).await.unwrap();

        let handle = agents.create("agent-1", &[]).await.unwrap();
        cluster.run_unit(request(&def.reference, "agent-1")).await.unwrap();
        assert_eq!(agents.is_online(&handle).await.unwrap(), Some(false));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(agents.is_online(&handle).await.unwrap(), Some(true));
    }
}
