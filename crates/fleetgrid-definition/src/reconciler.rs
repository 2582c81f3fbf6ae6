//! Definition reconciler: reuse the latest version or publish a new one.
//!
//! ```text
//! versions = list(family)            // every page, oldest first
//! latest   = versions.last()
//! if latest matches the candidate on all six axes:
//!     reuse latest
//! else:
//!     publish candidate
//! ```

use std::sync::Arc;

use tracing::{debug, info};

use fleetgrid_cloud::ClusterApi;
use fleetgrid_core::{DefinitionSpec, LaunchProfile, RemoteDefinitionVersion, TaskTemplate};

use crate::error::ReconcileResult;
use crate::family::build_definition;

/// Per-axis comparison of a candidate against a published version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefinitionMatch {
    pub container: bool,
    pub volumes: bool,
    /// A template without a task role accepts whatever role was published.
    pub task_role: bool,
    pub execution_role: bool,
    pub compatibility: bool,
    /// Always true for self-managed launches.
    pub sizing: bool,
}

impl DefinitionMatch {
    pub fn evaluate(
        candidate: &DefinitionSpec,
        template: &TaskTemplate,
        profile: &LaunchProfile,
        published: &DefinitionSpec,
    ) -> Self {
        Self {
            container: candidate.container == published.container,
            volumes: candidate.volumes == published.volumes,
            task_role: template.task_role.is_none() || template.task_role == published.task_role,
            execution_role: template.execution_role == published.execution_role,
            compatibility: published.compatibilities.contains(&profile.compatibility()),
            sizing: match profile {
                LaunchProfile::Hosted(hosted) => published.sizing == Some(hosted.sizing()),
                LaunchProfile::SelfManaged => true,
            },
        }
    }

    pub fn reusable(&self) -> bool {
        self.container
            && self.volumes
            && self.task_role
            && self.execution_role
            && self.compatibility
            && self.sizing
    }
}

/// Publishes definition versions only when a template actually changed.
///
/// Cluster API errors are returned to the caller as-is; there is no retry.
#[derive(Clone)]
pub struct DefinitionReconciler {
    cluster: Arc<dyn ClusterApi>,
}

impl DefinitionReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    pub async fn reconcile(
        &self,
        family: &str,
        template: &TaskTemplate,
        profile: &LaunchProfile,
    ) -> ReconcileResult<RemoteDefinitionVersion> {
        template.validate()?;
        let candidate = build_definition(family, template, profile);

        if let Some(reference) = self.latest_reference(family).await? {
            let latest = self.cluster.describe_definition_version(&reference).await?;
            let matched = DefinitionMatch::evaluate(&candidate, template, profile, &latest.spec);
            debug!(
                %family,
                revision = latest.revision,
                container = matched.container,
                volumes = matched.volumes,
                task_role = matched.task_role,
                execution_role = matched.execution_role,
                compatibility = matched.compatibility,
                sizing = matched.sizing,
                "compared template against latest definition"
            );
            if matched.reusable() {
                info!(%family, reference = %latest.reference, "reusing definition");
                return Ok(latest);
            }
        }

        let published = self.cluster.publish_definition_version(candidate).await?;
        info!(
            %family,
            reference = %published.reference,
            revision = published.revision,
            "published definition"
        );
        Ok(published)
    }

    /// Reference of the newest version in a family, reading every page.
    async fn latest_reference(&self, family: &str) -> ReconcileResult<Option<String>> {
        let mut latest = None;
        let mut token = None;
        loop {
            let page = self.cluster.list_definition_versions(family, token).await?;
            if let Some(last) = page.items.into_iter().last() {
                latest = Some(last);
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(latest),
            }
        }
    }
}
