//! Domain types shared by the FleetGrid control loops.
//!
//! These types describe what a placement request asks for (templates and
//! launch profiles), what the cluster API stores (definition versions),
//! and what the control loops observe (cluster members and fleet state).
//! All types are serializable so they can be loaded from config and
//! carried through the in-memory backends unchanged.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Identifier of a compute cluster (name or ARN).
pub type ClusterId = String;

/// Identifier of an elastic instance pool.
pub type FleetId = String;

/// Identifier of an underlying compute instance.
pub type InstanceId = String;

/// Opaque reference to one published definition version.
pub type DefinitionRef = String;

// ── Task template ──────────────────────────────────────────────────

/// A single environment variable passed to the container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A volume mounted into the container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountPoint {
    pub source_volume: String,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// An extra `/etc/hosts` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostEntry {
    pub hostname: String,
    pub ip_address: String,
}

/// A task-level volume. `host_path` is only meaningful on self-managed instances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    #[serde(default)]
    pub host_path: Option<String>,
}

/// Container log driver and its options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub driver: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Logical unit-of-work specification an agent is launched from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskTemplate {
    /// Human-readable name, used to derive the definition family.
    pub template_name: String,
    /// Whitespace-separated labels this template can serve.
    #[serde(default)]
    pub label: String,
    pub image: String,
    /// CPU units (1024 = one vCPU).
    pub cpu: u32,
    /// Hard memory limit in MiB.
    #[serde(default)]
    pub memory: Option<u32>,
    /// Soft memory reservation in MiB.
    #[serde(default)]
    pub memory_reservation: Option<u32>,
    #[serde(default)]
    pub environment: Vec<EnvVar>,
    #[serde(default)]
    pub mount_points: Vec<MountPoint>,
    #[serde(default)]
    pub extra_hosts: Vec<HostEntry>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub entrypoint: Option<String>,
    /// Extra JVM options, exported to the container as `JAVA_OPTS`.
    #[serde(default)]
    pub jvm_args: Option<String>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub log_config: Option<LogConfig>,
    #[serde(default)]
    pub task_role: Option<String>,
    #[serde(default)]
    pub execution_role: Option<String>,
}

impl TaskTemplate {
    /// Memory the template needs on a host: the hard limit if set, else the reservation.
    pub fn memory_constraint(&self) -> u32 {
        match self.memory {
            Some(hard) if hard > 0 => hard,
            _ => self.memory_reservation.unwrap_or(0),
        }
    }

    /// Whether this template serves the given label.
    pub fn matches_label(&self, label: &str) -> bool {
        self.label.split_whitespace().any(|l| l == label)
    }

    /// Check the template is something the cluster API would accept.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |reason: &str| ConfigError::InvalidTemplate {
            template: self.template_name.clone(),
            reason: reason.to_string(),
        };

        if self.template_name.trim().is_empty() {
            return Err(invalid("template name must not be empty"));
        }
        if self.image.trim().is_empty() {
            return Err(invalid("image must not be empty"));
        }
        if self.cpu == 0 {
            return Err(invalid("cpu units must be positive"));
        }
        if self.memory.unwrap_or(0) == 0 && self.memory_reservation.unwrap_or(0) == 0 {
            return Err(invalid("at least one of memory or memory_reservation is required"));
        }
        if let (Some(hard), Some(soft)) = (self.memory, self.memory_reservation)
            && hard > 0
            && soft > hard
        {
            return Err(invalid("memory_reservation must not exceed memory"));
        }

        let mut seen = BTreeSet::new();
        for var in &self.environment {
            if !seen.insert(var.name.as_str()) {
                return Err(invalid(&format!("duplicate environment key {}", var.name)));
            }
        }
        Ok(())
    }
}

// ── Launch profile ─────────────────────────────────────────────────

/// Which launch model a definition declares compatibility with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compatibility {
    Hosted,
    SelfManaged,
}

/// Container networking mode recorded on a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    Vpc,
}

/// Task-level CPU/memory sizing, required by hosted launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedSizing {
    pub cpu: u32,
    pub memory: u32,
}

impl HostedSizing {
    /// Check the CPU/memory pair is one the hosted provider supports.
    pub fn validate(&self) -> ConfigResult<()> {
        let gib = |from: u32, to: u32| (from..to).map(|g| g * 1024).collect::<Vec<_>>();
        let allowed: Vec<u32> = match self.cpu {
            256 => vec![512, 1024, 2048],
            512 => gib(1, 4),
            1024 => gib(2, 8),
            2048 => gib(4, 16),
            4096 => gib(8, 30),
            _ => Vec::new(),
        };
        if allowed.contains(&self.memory) {
            Ok(())
        } else {
            Err(ConfigError::InvalidSizing {
                cpu: self.cpu,
                memory: self.memory,
            })
        }
    }
}

/// Settings for a hosted (provider-managed, virtualized) launch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostedLaunch {
    pub cpu: u32,
    pub memory: u32,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub assign_public_ip: bool,
}

impl HostedLaunch {
    pub fn sizing(&self) -> HostedSizing {
        HostedSizing {
            cpu: self.cpu,
            memory: self.memory,
        }
    }
}

/// How a unit of work is launched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LaunchProfile {
    /// Provider-managed capacity; carries sizing and network placement.
    Hosted(HostedLaunch),
    /// Runs on instances from the cluster's own fleet.
    SelfManaged,
}

impl LaunchProfile {
    pub fn compatibility(&self) -> Compatibility {
        match self {
            LaunchProfile::Hosted(_) => Compatibility::Hosted,
            LaunchProfile::SelfManaged => Compatibility::SelfManaged,
        }
    }

    /// Task-level sizing, present only for hosted launches.
    pub fn sizing(&self) -> Option<HostedSizing> {
        match self {
            LaunchProfile::Hosted(hosted) => Some(hosted.sizing()),
            LaunchProfile::SelfManaged => None,
        }
    }

    pub fn network_mode(&self) -> Option<NetworkMode> {
        match self {
            LaunchProfile::Hosted(_) => Some(NetworkMode::Vpc),
            LaunchProfile::SelfManaged => None,
        }
    }
}

// ── Definitions ────────────────────────────────────────────────────

/// The container definition derived from a template.
///
/// Equality is structural; the environment is compared as a set because
/// the cluster API does not preserve its order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cpu: u32,
    pub memory: Option<u32>,
    pub memory_reservation: Option<u32>,
    pub environment: Vec<EnvVar>,
    pub mount_points: Vec<MountPoint>,
    pub extra_hosts: Vec<HostEntry>,
    pub entrypoint: Option<Vec<String>>,
    pub privileged: bool,
    pub essential: bool,
    pub log_config: Option<LogConfig>,
}

impl ContainerSpec {
    fn env_set(&self) -> BTreeSet<&EnvVar> {
        self.environment.iter().collect()
    }
}

impl PartialEq for ContainerSpec {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.image == other.image
            && self.cpu == other.cpu
            && self.memory == other.memory
            && self.memory_reservation == other.memory_reservation
            && self.env_set() == other.env_set()
            && self.mount_points == other.mount_points
            && self.extra_hosts == other.extra_hosts
            && self.entrypoint == other.entrypoint
            && self.privileged == other.privileged
            && self.essential == other.essential
            && self.log_config == other.log_config
    }
}

/// Everything published as one definition version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DefinitionSpec {
    pub family: String,
    pub container: ContainerSpec,
    pub volumes: Vec<Volume>,
    pub task_role: Option<String>,
    pub execution_role: Option<String>,
    pub compatibilities: Vec<Compatibility>,
    pub sizing: Option<HostedSizing>,
    pub network_mode: Option<NetworkMode>,
}

/// A published, immutable definition version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteDefinitionVersion {
    pub reference: DefinitionRef,
    pub revision: u32,
    pub spec: DefinitionSpec,
}

// ── Cluster ────────────────────────────────────────────────────────

/// Registration status of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemberStatus {
    Active,
    Draining,
}

/// One fleet instance as registered with the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterMember {
    pub arn: String,
    pub instance_id: InstanceId,
    pub status: MemberStatus,
    /// Unreserved CPU units.
    pub remaining_cpu: u32,
    /// Unreserved memory in MiB.
    pub remaining_memory: u32,
    pub running_tasks: u32,
    pub pending_tasks: u32,
    /// Unix timestamp (seconds) the underlying instance was launched.
    pub launch_time: u64,
}

impl ClusterMember {
    pub fn task_count(&self) -> u32 {
        self.running_tasks + self.pending_tasks
    }

    /// Whether this member has room for a template's CPU and memory.
    pub fn fits(&self, template: &TaskTemplate) -> bool {
        self.remaining_cpu >= template.cpu && self.remaining_memory >= template.memory_constraint()
    }
}

// ── Fleet ──────────────────────────────────────────────────────────

/// Lifecycle state of one fleet instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    InService,
    Terminating,
}

/// One instance of the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetInstance {
    pub instance_id: InstanceId,
    pub lifecycle: LifecycleState,
    #[serde(default)]
    pub protected_from_scale_in: bool,
}

/// Capacity and membership of an elastic instance pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetState {
    pub name: FleetId,
    pub desired: u32,
    pub min: u32,
    pub max: u32,
    pub instances: Vec<FleetInstance>,
    pub new_instances_protected: bool,
}

impl FleetState {
    pub fn in_service_count(&self) -> u32 {
        self.instances
            .iter()
            .filter(|i| i.lifecycle == LifecycleState::InService)
            .count() as u32
    }
}

// ── Placement ──────────────────────────────────────────────────────

/// One request for a unit of agent capacity.
#[derive(Debug, Clone)]
pub struct PlacementRequest {
    pub template: TaskTemplate,
    pub profile: LaunchProfile,
    pub cluster: ClusterId,
    pub fleet: Option<FleetId>,
    /// Budget shared by every phase of the request.
    pub timeout: Duration,
    /// Label the agent record is registered under.
    pub label: Option<String>,
}

/// Handle to an agent record owned by the agent-lifecycle collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentHandle {
    pub name: String,
}
