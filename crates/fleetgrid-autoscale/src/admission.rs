//! Capacity admission: wait until some member can take a template, growing
//! the fleet by at most one instance per call.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use fleetgrid_cloud::{CloudError, CloudResult, ClusterSnapshotReader, FleetController};
use fleetgrid_core::{MemberStatus, RuntimeConfig, TaskTemplate};

use crate::error::{AdmissionError, AdmissionResult};

/// Poll intervals used while waiting for capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Between cluster capacity checks.
    pub capacity_poll: Duration,
    /// Between fleet-join and cluster-join checks during a scale-out.
    pub scale_poll: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            capacity_poll: Duration::from_secs(10),
            scale_poll: Duration::from_secs(5),
        }
    }
}

impl From<&RuntimeConfig> for AdmissionConfig {
    fn from(runtime: &RuntimeConfig) -> Self {
        Self {
            capacity_poll: runtime.capacity_poll(),
            scale_poll: runtime.scale_poll(),
        }
    }
}

/// How capacity was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// An existing member already had room.
    Available,
    /// The fleet was grown to `desired` and the new member joined.
    ScaledOut { desired: u32 },
}

#[derive(Clone)]
pub struct CapacityAdmission {
    snapshot: ClusterSnapshotReader,
    fleet: FleetController,
    config: AdmissionConfig,
}

impl CapacityAdmission {
    pub fn new(snapshot: ClusterSnapshotReader, fleet: FleetController) -> Self {
        Self {
            snapshot,
            fleet,
            config: AdmissionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AdmissionConfig) -> Self {
        self.config = config;
        self
    }

    /// Wait until a non-draining member of `cluster` fits `template`.
    ///
    /// Makes at most one scale-out attempt; its outcome ends the call.
    /// Remote errors end the call immediately.
    pub async fn await_capacity(
        &self,
        template: &TaskTemplate,
        cluster: &str,
        fleet: Option<&str>,
        deadline: Instant,
    ) -> AdmissionResult<Admission> {
        let cpu = template.cpu;
        let memory = template.memory_constraint();
        let timeout = AdmissionError::Timeout { cpu, memory };

        loop {
            let members = self.snapshot.schedulable(cluster).await?;
            if members.iter().any(|m| m.fits(template)) {
                debug!(%cluster, cpu, memory, "capacity available");
                return Ok(Admission::Available);
            }

            if let Some(fleet) = fleet {
                match self.fleet.describe(fleet).await? {
                    Some(state) if state.desired < state.max => {
                        let desired = state.desired + 1;
                        info!(%cluster, %fleet, from = state.desired, to = desired, "no member fits, scaling out");
                        let reached = self
                            .wait_for_scale_out(desired, cluster, fleet, deadline)
                            .await?;
                        if reached == desired {
                            return Ok(Admission::ScaledOut { desired });
                        }
                        warn!(%cluster, %fleet, desired, reached, "scale-out did not complete");
                        return Err(timeout);
                    }
                    Some(state) => {
                        info!(%cluster, %fleet, max = state.max, "fleet at maximum, not scaling out");
                    }
                    None => warn!(%cluster, %fleet, "fleet not found"),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(%cluster, cpu, memory, "deadline reached waiting for capacity");
                return Err(timeout);
            }
            tokio::time::sleep(self.config.capacity_poll.min(deadline - now)).await;
        }
    }

    /// Grow the fleet to `desired` and wait for the new instance to join.
    ///
    /// Returns the ACTIVE member count once the cluster has caught up, or
    /// the in-service count if the fleet itself never reached `desired`.
    pub async fn wait_for_scale_out(
        &self,
        desired: u32,
        cluster: &str,
        fleet: &str,
        deadline: Instant,
    ) -> AdmissionResult<u32> {
        self.fleet.set_desired(fleet, desired).await?;

        let in_service = self
            .poll_until(deadline, |n| n == desired, || self.fleet.in_service_count(fleet))
            .await?;
        debug!(%fleet, desired, in_service, "fleet join wait finished");
        if in_service != desired {
            return Ok(in_service);
        }

        let joined = self
            .poll_until(
                deadline,
                |n| n >= desired,
                || async {
                    let active = self.snapshot.count(cluster, MemberStatus::Active).await?;
                    let draining = self.snapshot.count(cluster, MemberStatus::Draining).await?;
                    Ok::<u32, CloudError>(active + draining)
                },
            )
            .await?;
        debug!(%cluster, desired, joined, "cluster join wait finished");

        Ok(self.snapshot.count(cluster, MemberStatus::Active).await?)
    }

    /// Re-run `probe` every `scale_poll` until `done` or the deadline. The
    /// probe always runs at least once, and once more at the deadline.
    async fn poll_until<F, Fut>(
        &self,
        deadline: Instant,
        done: impl Fn(u32) -> bool,
        probe: F,
    ) -> AdmissionResult<u32>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CloudResult<u32>>,
    {
        loop {
            let value = probe().await?;
            let now = Instant::now();
            if done(value) || now >= deadline {
                return Ok(value);
            }
            tokio::time::sleep(self.config.scale_poll.min(deadline - now)).await;
        }
    }
}
