//! Cluster API collaborator.

use async_trait::async_trait;

use fleetgrid_core::{
    ClusterMember, DefinitionRef, DefinitionSpec, EnvVar, LaunchProfile, MemberStatus,
    RemoteDefinitionVersion,
};

use crate::error::CloudResult;

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Continuation token; `None` on the last page.
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }
}

/// Request to start one unit of work on a cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct RunUnitRequest {
    pub cluster: String,
    pub definition: DefinitionRef,
    /// Container the overrides apply to.
    pub container_name: String,
    pub profile: LaunchProfile,
    pub command: Vec<String>,
    pub environment: Vec<EnvVar>,
}

/// A reason the cluster API gave for not placing a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementFailure {
    pub arn: Option<String>,
    pub reason: String,
}

/// Outcome of a run request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Started { unit_arn: String },
    Rejected { failures: Vec<PlacementFailure> },
}

/// Operations the control loops need from the cluster provider.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List member ARNs, optionally filtered by status.
    async fn list_members(
        &self,
        cluster: &str,
        status: Option<MemberStatus>,
        next_token: Option<String>,
    ) -> CloudResult<Page<String>>;

    /// Describe members, including their remaining resources.
    async fn describe_members(
        &self,
        cluster: &str,
        arns: &[String],
    ) -> CloudResult<Vec<ClusterMember>>;

    async fn run_unit(&self, request: RunUnitRequest) -> CloudResult<RunOutcome>;

    async fn stop_unit(&self, cluster: &str, unit_arn: &str) -> CloudResult<()>;

    /// List published versions of a family, oldest first.
    async fn list_definition_versions(
        &self,
        family: &str,
        next_token: Option<String>,
    ) -> CloudResult<Page<DefinitionRef>>;

    async fn describe_definition_version(
        &self,
        reference: &str,
    ) -> CloudResult<RemoteDefinitionVersion>;

    async fn publish_definition_version(
        &self,
        spec: DefinitionSpec,
    ) -> CloudResult<RemoteDefinitionVersion>;

    async fn set_member_drain_state(
        &self,
        cluster: &str,
        arn: &str,
        status: MemberStatus,
    ) -> CloudResult<()>;
}
