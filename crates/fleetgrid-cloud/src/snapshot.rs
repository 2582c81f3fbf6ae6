//! Cluster snapshot reader: current membership and free resources.

use std::sync::Arc;

use tracing::debug;

use fleetgrid_core::{ClusterMember, MemberStatus};

use crate::cluster::ClusterApi;
use crate::error::CloudResult;

/// Most members the cluster API describes in one call.
const DESCRIBE_BATCH: usize = 100;

/// Reads cluster membership. Results are never cached; every call is a
/// fresh view of remote state.
#[derive(Clone)]
pub struct ClusterSnapshotReader {
    api: Arc<dyn ClusterApi>,
}

impl ClusterSnapshotReader {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }

    /// All member ARNs with the given status, following continuation tokens.
    pub async fn member_arns(
        &self,
        cluster: &str,
        status: Option<MemberStatus>,
    ) -> CloudResult<Vec<String>> {
        let mut arns = Vec::new();
        let mut token = None;
        loop {
            let page = self.api.list_members(cluster, status, token).await?;
            arns.extend(page.items);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(arns)
    }

    /// Describe every member with the given status.
    pub async fn members(
        &self,
        cluster: &str,
        status: Option<MemberStatus>,
    ) -> CloudResult<Vec<ClusterMember>> {
        let arns = self.member_arns(cluster, status).await?;
        let mut members = Vec::with_capacity(arns.len());
        for chunk in arns.chunks(DESCRIBE_BATCH) {
            members.extend(self.api.describe_members(cluster, chunk).await?);
        }
        members.retain(|m| status.is_none_or(|s| m.status == s));
        debug!(%cluster, ?status, count = members.len(), "cluster members described");
        Ok(members)
    }

    /// Members that can take new work: everything not draining.
    pub async fn schedulable(&self, cluster: &str) -> CloudResult<Vec<ClusterMember>> {
        let mut members = self.members(cluster, None).await?;
        members.retain(|m| m.status != MemberStatus::Draining);
        Ok(members)
    }

    pub async fn count(&self, cluster: &str, status: MemberStatus) -> CloudResult<u32> {
        Ok(self.member_arns(cluster, Some(status)).await?.len() as u32)
    }

    pub async fn drain(&self, cluster: &str, arn: &str) -> CloudResult<()> {
        self.api
            .set_member_drain_state(cluster, arn, MemberStatus::Draining)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCluster, member};

    #[tokio::test]
    async fn members_follow_pagination() {
        let cluster = Arc::new(MemoryCluster::new().with_page_size(2));
        for i in 0..5 {
            cluster.add_member("ci", member(&format!("m-{i}"), MemberStatus::Active, 1024, 2048));
        }
        let reader = ClusterSnapshotReader::new(cluster.clone());

        let members = reader.members("ci", None).await.unwrap();
        assert_eq!(members.len(), 5);
        assert_eq!(cluster.list_calls("ci"), 3);
    }

    #[tokio::test]
    async fn schedulable_excludes_draining() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_member("ci", member("m-1", MemberStatus::Active, 1024, 2048));
        cluster.add_member("ci", member("m-2", MemberStatus::Draining, 4096, 8192));
        let reader = ClusterSnapshotReader::new(cluster);

        let members = reader.schedulable("ci").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].arn, "m-1");

        assert_eq!(reader.count("ci", MemberStatus::Active).await.unwrap(), 1);
        assert_eq!(reader.count("ci", MemberStatus::Draining).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_cluster_makes_no_describe_call() {
        let cluster = Arc::new(MemoryCluster::new());
        let reader = ClusterSnapshotReader::new(cluster.clone());

        assert!(reader.members("ci", None).await.unwrap().is_empty());
        assert_eq!(cluster.describe_calls(), 0);
    }

    #[tokio::test]
    async fn drain_marks_member() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.add_member("ci", member("m-1", MemberStatus::Active, 1024, 2048));
        let reader = ClusterSnapshotReader::new(cluster.clone());

        reader.drain("ci", "m-1").await.unwrap();
        assert_eq!(
            cluster.member("ci", "m-1").unwrap().status,
            MemberStatus::Draining
        );
    }
}
