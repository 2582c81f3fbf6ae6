//! Scale-in reaper: retire idle members on billing-hour boundaries.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, error, info};

use fleetgrid_cloud::{CloudResult, ClusterSnapshotReader, FleetController};
use fleetgrid_core::{ClusterMember, InstanceId, MemberStatus};

use crate::lock::ClusterLocks;

/// Members older than this are drained regardless of load.
pub const MAX_UPTIME_SECS: u64 = 10 * 3600;

/// Length of one billing period.
pub const BILLING_PERIOD_SECS: u64 = 3600;

/// Idle members this close to their next billing boundary are drained.
pub const DRAIN_WINDOW_SECS: u64 = 240;

/// Why an ACTIVE member should stop taking work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReason {
    MaxUptime { uptime: u64 },
    IdleNearBillingBoundary { remaining: u64 },
}

/// Decide whether an ACTIVE member should be drained at `now` (epoch secs).
pub fn drain_reason(member: &ClusterMember, now: u64) -> Option<DrainReason> {
    let uptime = now.saturating_sub(member.launch_time);
    if uptime > MAX_UPTIME_SECS {
        return Some(DrainReason::MaxUptime { uptime });
    }
    let remaining = BILLING_PERIOD_SECS - uptime % BILLING_PERIOD_SECS;
    if member.task_count() == 0 && remaining < DRAIN_WINDOW_SECS {
        return Some(DrainReason::IdleNearBillingBoundary { remaining });
    }
    None
}

/// What one reaper pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// New-instance protection was switched on by this pass.
    pub protected: bool,
    /// Instances terminated after draining empty.
    pub terminated: Vec<InstanceId>,
    /// Member ARNs moved to DRAINING.
    pub drained: Vec<String>,
}

/// Periodic scale-in for one (cluster, fleet) pair.
#[derive(Clone)]
pub struct ScaleInReaper {
    cluster: String,
    fleet: String,
    snapshot: ClusterSnapshotReader,
    controller: FleetController,
    locks: Option<ClusterLocks>,
}

impl ScaleInReaper {
    pub fn new(
        cluster: &str,
        fleet: &str,
        snapshot: ClusterSnapshotReader,
        controller: FleetController,
    ) -> Self {
        Self {
            cluster: cluster.to_string(),
            fleet: fleet.to_string(),
            snapshot,
            controller,
            locks: None,
        }
    }

    /// Hold the cluster's provisioning lock for the whole of each pass.
    pub fn with_cluster_lock(mut self, locks: ClusterLocks) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn fleet(&self) -> &str {
        &self.fleet
    }

    /// One pass: protect, reap drained-idle members, drain candidates.
    pub async fn run_once(&self, now: u64) -> CloudResult<ReapReport> {
        let _guard = match &self.locks {
            Some(locks) => Some(locks.acquire(&self.cluster).await),
            None => None,
        };
        let cluster = self.cluster.as_str();
        let fleet = self.fleet.as_str();
        let mut report = ReapReport {
            protected: self.controller.protect_new_instances(fleet).await?,
            ..ReapReport::default()
        };

        for member in self
            .snapshot
            .members(cluster, Some(MemberStatus::Draining))
            .await?
        {
            if member.task_count() > 0 {
                debug!(%cluster, arn = %member.arn, tasks = member.task_count(), "draining member still busy");
                continue;
            }
            self.controller
                .retire_instance(fleet, &member.instance_id)
                .await?;
            info!(%cluster, %fleet, arn = %member.arn, instance_id = %member.instance_id, "reaped drained member");
            report.terminated.push(member.instance_id);
        }

        for member in self
            .snapshot
            .members(cluster, Some(MemberStatus::Active))
            .await?
        {
            let Some(reason) = drain_reason(&member, now) else {
                continue;
            };
            self.snapshot.drain(cluster, &member.arn).await?;
            info!(%cluster, arn = %member.arn, ?reason, "draining member");
            report.drained.push(member.arn);
        }

        Ok(report)
    }

    /// Run passes until `shutdown` flips: one after `initial_delay`, then
    /// each `period` after the previous pass finished. A failed pass is
    /// logged and the schedule continues.
    pub async fn run(
        self,
        initial_delay: Duration,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let cluster = self.cluster.clone();
        let fleet = self.fleet.clone();
        debug!(%cluster, %fleet, "reaper loop starting");

        let mut delay = initial_delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    match self.run_once(epoch_secs()).await {
                        Ok(report) => debug!(
                            %cluster,
                            %fleet,
                            protected = report.protected,
                            terminated = report.terminated.len(),
                            drained = report.drained.len(),
                            "reaper pass complete"
                        ),
                        Err(e) => error!(%cluster, %fleet, error = %e, "reaper pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    debug!(%cluster, %fleet, "reaper loop shutting down");
                    break;
                }
            }
            delay = period;
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fleetgrid_cloud::{CloudError, FleetApi};
    use fleetgrid_cloud::memory::{FleetCall, MemoryCluster, MemoryFleet, member};

    const NOW: u64 = 1_700_000_000;

    fn aged(arn: &str, status: MemberStatus, uptime: u64, tasks: u32) -> ClusterMember {
        let mut m = member(arn, status, 1024, 2048);
        m.launch_time = NOW - uptime;
        m.running_tasks = tasks;
        m
    }

    struct Harness {
        cluster: Arc<MemoryCluster>,
        fleet: Arc<MemoryFleet>,
        reaper: ScaleInReaper,
    }

    fn harness() -> Harness {
        let cluster = Arc::new(MemoryCluster::new());
        let fleet = Arc::new(MemoryFleet::new());
        fleet.add_fleet("asg", 2, 0, 4);
        let reaper = ScaleInReaper::new(
            "ci",
            "asg",
            ClusterSnapshotReader::new(cluster.clone()),
            FleetController::new(fleet.clone()),
        );
        Harness {
            cluster,
            fleet,
            reaper,
        }
    }

    /// A member registered on the fleet's `index`th instance.
    fn on_instance(h: &Harness, index: usize, mut m: ClusterMember) -> ClusterMember {
        m.instance_id = h.fleet.state("asg").unwrap().instances[index]
            .instance_id
            .clone();
        m
    }

    #[test]
    fn drain_boundaries() {
        let idle_near = aged("m-1", MemberStatus::Active, 3595, 0);
        assert_eq!(
            drain_reason(&idle_near, NOW),
            Some(DrainReason::IdleNearBillingBoundary { remaining: 5 })
        );

        let idle_early = aged("m-2", MemberStatus::Active, 3200, 0);
        assert_eq!(drain_reason(&idle_early, NOW), None);

        let busy_near = aged("m-3", MemberStatus::Active, 3595, 1);
        assert_eq!(drain_reason(&busy_near, NOW), None);

        let old_busy = aged("m-4", MemberStatus::Active, MAX_UPTIME_SECS + 1, 3);
        assert_eq!(
            drain_reason(&old_busy, NOW),
            Some(DrainReason::MaxUptime { uptime: MAX_UPTIME_SECS + 1 })
        );

        let exactly_max = aged("m-5", MemberStatus::Active, MAX_UPTIME_SECS, 3);
        assert_eq!(drain_reason(&exactly_max, NOW), None);

        let later_hour = aged("m-6", MemberStatus::Active, 2 * 3600 + 3400, 0);
        assert_eq!(
            drain_reason(&later_hour, NOW),
            Some(DrainReason::IdleNearBillingBoundary { remaining: 200 })
        );
    }

    #[tokio::test]
    async fn pass_protects_new_instances_once() {
        let h = harness();
        assert!(h.reaper.run_once(NOW).await.unwrap().protected);
        assert!(!h.reaper.run_once(NOW).await.unwrap().protected);
        assert!(h.fleet.state("asg").unwrap().new_instances_protected);
    }

    #[tokio::test]
    async fn busy_draining_member_is_never_reaped() {
        let h = harness();
        let m = on_instance(&h, 0, aged("m-1", MemberStatus::Draining, 100, 1));
        h.cluster.add_member("ci", m);

        let report = h.reaper.run_once(NOW).await.unwrap();
        assert!(report.terminated.is_empty());
        assert_eq!(h.fleet.state("asg").unwrap().instances.len(), 2);
    }

    #[tokio::test]
    async fn idle_draining_member_is_unprotected_then_terminated() {
        let h = harness();
        let m = on_instance(&h, 0, aged("m-1", MemberStatus::Draining, 100, 0));
        let instance_id = m.instance_id.clone();
        h.cluster.add_member("ci", m);
        h.fleet
            .set_scale_in_protection("asg", &instance_id, true)
            .await
            .unwrap();

        let report = h.reaper.run_once(NOW).await.unwrap();
        assert_eq!(report.terminated, vec![instance_id.clone()]);

        let calls = h.fleet.calls();
        let unprotect = calls.iter().position(|c| {
            *c == FleetCall::Protect {
                instance_id: instance_id.clone(),
                protected: false,
            }
        });
        let terminate = calls.iter().position(|c| {
            *c == FleetCall::Terminate {
                instance_id: instance_id.clone(),
                decrement: true,
            }
        });
        assert!(unprotect.unwrap() < terminate.unwrap());

        let state = h.fleet.state("asg").unwrap();
        assert_eq!(state.desired, 1);
        assert_eq!(state.instances.len(), 1);
    }

    #[tokio::test]
    async fn missing_fleet_still_drains_members() {
        let cluster = Arc::new(MemoryCluster::new());
        let reaper = ScaleInReaper::new(
            "ci",
            "gone",
            ClusterSnapshotReader::new(cluster.clone()),
            FleetController::new(Arc::new(MemoryFleet::new())),
        );
        cluster.add_member("ci", aged("m-old", MemberStatus::Active, MAX_UPTIME_SECS + 1, 2));

        let report = reaper.run_once(NOW).await.unwrap();
        assert!(!report.protected);
        assert_eq!(report.drained, vec!["m-old".to_string()]);
        assert_eq!(cluster.member("ci", "m-old").unwrap().status, MemberStatus::Draining);
    }

    #[tokio::test]
    async fn active_candidates_are_drained() {
        let h = harness();
        h.cluster.add_member("ci", aged("m-near", MemberStatus::Active, 3595, 0));
        h.cluster.add_member("ci", aged("m-early", MemberStatus::Active, 3200, 0));
        h.cluster.add_member("ci", aged("m-old", MemberStatus::Active, MAX_UPTIME_SECS + 1, 2));

        let report = h.reaper.run_once(NOW).await.unwrap();
        assert_eq!(report.drained, vec!["m-near".to_string(), "m-old".to_string()]);
        assert_eq!(h.cluster.member("ci", "m-early").unwrap().status, MemberStatus::Active);
        assert_eq!(h.cluster.member("ci", "m-near").unwrap().status, MemberStatus::Draining);
        // Drained this pass, reaped on a later one.
        assert!(report.terminated.is_empty());
    }

    #[tokio::test]
    async fn failed_pass_reports_error() {
        let h = harness();
        h.cluster.fail("list_members", CloudError::Throttled("slow down".to_string()));
        assert!(h.reaper.run_once(NOW).await.is_err());

        h.cluster.clear_failure("list_members");
        assert!(h.reaper.run_once(NOW).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn lock_holds_off_pass_while_provisioning() {
        let h = harness();
        let locks = ClusterLocks::new();
        let reaper = h.reaper.clone().with_cluster_lock(locks.clone());

        let guard = locks.acquire("ci").await;
        let pass = tokio::spawn(async move { reaper.run_once(NOW).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!pass.is_finished());
        assert!(!h.fleet.state("asg").unwrap().new_instances_protected);

        drop(guard);
        pass.await.unwrap().unwrap();
        assert!(h.fleet.state("asg").unwrap().new_instances_protected);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_survives_failed_passes() {
        let h = harness();
        h.cluster.fail("list_members", CloudError::Throttled("slow down".to_string()));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(h.reaper.clone().run(
            Duration::from_secs(5),
            Duration::from_secs(60),
            rx,
        ));

        tokio::time::sleep(Duration::from_secs(6)).await;
        h.cluster.clear_failure("list_members");
        h.cluster.add_member("ci", aged("m-old", MemberStatus::Active, MAX_UPTIME_SECS * 2, 1));
        assert_eq!(h.cluster.member("ci", "m-old").unwrap().status, MemberStatus::Active);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.cluster.member("ci", "m-old").unwrap().status, MemberStatus::Draining);

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
