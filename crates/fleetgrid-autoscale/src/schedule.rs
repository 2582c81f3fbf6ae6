//! Reaper scheduler: owns one reaper loop per (cluster, fleet) pair.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fleetgrid_core::RuntimeConfig;

use crate::reaper::ScaleInReaper;

/// How long a stopping loop may take to finish its current pass before it
/// is aborted.
pub const STOP_GRACE: Duration = Duration::from_secs(30);

type ReaperKey = (String, String);

/// Lifecycle of one reaper loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaperState {
    Running,
    Stopped,
}

/// A spawned reaper loop.
struct ReaperSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ReaperState>,
}

impl ReaperSlot {
    fn spawn<F>(run: F, shutdown_tx: watch::Sender<bool>) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(ReaperState::Running);
        let handle = tokio::spawn(async move {
            run.await;
            let _ = state_tx.send(ReaperState::Stopped);
        });
        Self {
            handle,
            shutdown_tx,
            state_rx,
        }
    }

    /// A loop whose task ended without reporting (panic or abort) is stopped too.
    fn state(&self) -> ReaperState {
        if self.state_rx.has_changed().is_err() {
            return ReaperState::Stopped;
        }
        *self.state_rx.borrow()
    }

    /// Signal shutdown and let an in-flight pass finish. Returns false if
    /// the loop had to be aborted after `grace`.
    async fn stop(mut self, grace: Duration) -> bool {
        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(_) => true,
            Err(_) => {
                self.handle.abort();
                false
            }
        }
    }
}

/// Starts and stops reaper loops. Starting a pair that already has a
/// running loop does nothing.
pub struct ReaperScheduler {
    initial_delay: Duration,
    period: Duration,
    grace: Duration,
    reapers: Arc<RwLock<HashMap<ReaperKey, ReaperSlot>>>,
}

impl ReaperScheduler {
    pub fn new(initial_delay: Duration, period: Duration) -> Self {
        Self {
            initial_delay,
            period,
            grace: STOP_GRACE,
            reapers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn from_runtime(runtime: &RuntimeConfig) -> Self {
        Self::new(runtime.reaper_initial_delay(), runtime.reaper_period())
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Start the reaper's loop. Returns false if one is already running
    /// for its (cluster, fleet) pair.
    pub async fn start(&self, reaper: ScaleInReaper) -> bool {
        let key = (reaper.cluster().to_string(), reaper.fleet().to_string());
        let mut reapers = self.reapers.write().await;
        if reapers
            .get(&key)
            .is_some_and(|slot| slot.state() == ReaperState::Running)
        {
            debug!(cluster = %key.0, fleet = %key.1, "reaper already running");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let slot = ReaperSlot::spawn(
            reaper.run(self.initial_delay, self.period, shutdown_rx),
            shutdown_tx,
        );
        reapers.insert(key.clone(), slot);
        info!(cluster = %key.0, fleet = %key.1, period_secs = self.period.as_secs(), "reaper started");
        true
    }

    pub async fn stop(&self, cluster: &str, fleet: &str) -> bool {
        let slot = self
            .reapers
            .write()
            .await
            .remove(&(cluster.to_string(), fleet.to_string()));
        let Some(slot) = slot else {
            return false;
        };
        if !slot.stop(self.grace).await {
            warn!(%cluster, %fleet, "reaper pass overran stop grace, aborted");
        }
        info!(%cluster, %fleet, "reaper stopped");
        true
    }

    /// Stop all reapers (for graceful shutdown).
    pub async fn stop_all(&self) {
        let slots: Vec<_> = self.reapers.write().await.drain().collect();
        for ((cluster, fleet), slot) in slots {
            if !slot.stop(self.grace).await {
                warn!(%cluster, %fleet, "reaper pass overran stop grace, aborted");
            }
            debug!(%cluster, %fleet, "reaper stopped");
        }
        info!("all reapers stopped");
    }

    pub async fn state(&self, cluster: &str, fleet: &str) -> ReaperState {
        let reapers = self.reapers.read().await;
        reapers
            .get(&(cluster.to_string(), fleet.to_string()))
            .map_or(ReaperState::Stopped, ReaperSlot::state)
    }

    pub async fn is_running(&self, cluster: &str, fleet: &str) -> bool {
        self.state(cluster, fleet).await == ReaperState::Running
    }

    pub async fn active(&self) -> Vec<(String, String)> {
        let reapers = self.reapers.read().await;
        reapers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use fleetgrid_cloud::memory::{FleetCall, MemoryCluster, MemoryFleet};
    use fleetgrid_cloud::{ClusterSnapshotReader, FleetController};

    fn reaper(fleet: &Arc<MemoryFleet>) -> ScaleInReaper {
        ScaleInReaper::new(
            "ci",
            "asg",
            ClusterSnapshotReader::new(Arc::new(MemoryCluster::new())),
            FleetController::new(fleet.clone()),
        )
    }

    fn protect_calls(fleet: &MemoryFleet) -> usize {
        fleet
            .calls()
            .iter()
            .filter(|c| matches!(c, FleetCall::ProtectNew { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let fleet = Arc::new(MemoryFleet::new());
        fleet.add_fleet("asg", 0, 0, 2);
        let scheduler = ReaperScheduler::new(Duration::from_secs(5), Duration::from_secs(60));

        assert!(scheduler.start(reaper(&fleet)).await);
        assert!(!scheduler.start(reaper(&fleet)).await);
        assert_eq!(scheduler.active().await.len(), 1);
        assert!(scheduler.is_running("ci", "asg").await);

        scheduler.stop_all().await;
        assert!(!scheduler.is_running("ci", "asg").await);
    }

    #[tokio::test(start_paused = true)]
    async fn first_pass_after_initial_delay() {
        let fleet = Arc::new(MemoryFleet::new());
        fleet.add_fleet("asg", 0, 0, 2);
        let scheduler = ReaperScheduler::new(Duration::from_secs(5), Duration::from_secs(60));
        scheduler.start(reaper(&fleet)).await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!fleet.state("asg").unwrap().new_instances_protected);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fleet.state("asg").unwrap().new_instances_protected);
        assert_eq!(protect_calls(&fleet), 1);

        assert!(scheduler.stop("ci", "asg").await);
        assert!(!scheduler.stop("ci", "asg").await);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_reaper_can_restart() {
        let fleet = Arc::new(MemoryFleet::new());
        fleet.add_fleet("asg", 0, 0, 2);
        let scheduler = ReaperScheduler::from_runtime(&RuntimeConfig::default());

        assert!(scheduler.start(reaper(&fleet)).await);
        scheduler.stop("ci", "asg").await;
        assert!(scheduler.start(reaper(&fleet)).await);
        assert!(scheduler.is_running("ci", "asg").await);
        scheduler.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_the_loop_exit_on_its_own() {
        let fleet = Arc::new(MemoryFleet::new());
        fleet.add_fleet("asg", 0, 0, 2);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let slot = ReaperSlot::spawn(
            reaper(&fleet).run(Duration::from_secs(5), Duration::from_secs(60), shutdown_rx),
            shutdown_tx,
        );
        assert_eq!(slot.state(), ReaperState::Running);

        assert!(slot.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_a_loop_that_ignores_shutdown() {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let slot = ReaperSlot::spawn(
            async {
                loop {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
            },
            shutdown_tx,
        );

        assert!(!slot.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_loop_reports_stopped_and_restarts() {
        let fleet = Arc::new(MemoryFleet::new());
        fleet.add_fleet("asg", 0, 0, 2);
        let scheduler = ReaperScheduler::new(Duration::from_secs(5), Duration::from_secs(60));

        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let slot = ReaperSlot::spawn(async {}, shutdown_tx);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(slot.state(), ReaperState::Stopped);
        scheduler
            .reapers
            .write()
            .await
            .insert(("ci".to_string(), "asg".to_string()), slot);
        assert_eq!(scheduler.state("ci", "asg").await, ReaperState::Stopped);

        assert!(scheduler.start(reaper(&fleet)).await);
        assert_eq!(scheduler.state("ci", "asg").await, ReaperState::Running);
        scheduler.stop_all().await;
        assert_eq!(scheduler.state("ci", "asg").await, ReaperState::Stopped);
    }
}
