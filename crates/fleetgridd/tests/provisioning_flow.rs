//! End-to-end provisioning tests.
//!
//! Drive a cloud loaded from TOML through the provisioner and the scale-in
//! reaper against the in-memory backends, under paused time.

use std::sync::Arc;
use std::time::Duration;

use fleetgrid_autoscale::{ClusterLocks, ReapReport};
use fleetgrid_cloud::ClientPool;
use fleetgrid_cloud::memory::{
    BootSimulation, MemoryAgents, MemoryClientFactory, MemoryCluster, MemoryFleet,
};
use fleetgrid_core::{Config, MemberStatus};
use fleetgrid_scheduler::{ProvisionError, Provisioner, WorkflowState};

const CONFIG: &str = r#"
[[cloud]]
name = "ci-builders"
cluster = "ci"
fleet = "asg"
agent_url = "https://ci.example.com/"
timeout_secs = 300

[cloud.launch]
type = "self_managed"

[[cloud.template]]
template_name = "java"
label = "java"
image = "ci/agent:latest"
cpu = 512
memory = 1024
"#;

struct Env {
    cluster: Arc<MemoryCluster>,
    fleet: Arc<MemoryFleet>,
    agents: Arc<MemoryAgents>,
    provisioner: Provisioner,
}

/// Each booted instance fits exactly one agent.
async fn env(fleet_max: u32) -> Env {
    let config = Config::from_toml_str(CONFIG).unwrap();
    config.validate().unwrap();

    let agents = Arc::new(MemoryAgents::new());
    let cluster =
        Arc::new(MemoryCluster::new().with_agents(agents.clone(), Duration::from_secs(4)));
    let fleet = Arc::new(MemoryFleet::new().with_boot(BootSimulation {
        cluster: cluster.clone(),
        cluster_id: "ci".to_string(),
        in_service_after: Duration::from_secs(30),
        join_after: Duration::from_secs(20),
        cpu: 512,
        memory: 1024,
    }));
    fleet.add_fleet("asg", 0, 0, fleet_max);
    let pool = ClientPool::new(Arc::new(MemoryClientFactory::with_backends(
        cluster.clone(),
        fleet.clone(),
    )));

    let provisioner = Provisioner::from_config(
        &config.clouds[0],
        &config.runtime,
        &pool,
        agents.clone(),
        ClusterLocks::new(),
    )
    .await
    .unwrap();
    Env {
        cluster,
        fleet,
        agents,
        provisioner,
    }
}

#[tokio::test(start_paused = true)]
async fn scale_out_provision_retire_and_reap() {
    let env = env(2).await;

    let units = env.provisioner.provision(Some("java"), 3);
    assert_eq!(units.len(), 3);
    let mut online = Vec::new();
    let mut failures = Vec::new();
    for unit in units {
        match unit.outcome().await {
            Ok(agent) => online.push(agent),
            Err(e) => failures.push(e),
        }
    }

    // Two instances fit under the fleet maximum; the third request times out.
    assert_eq!(online.len(), 2);
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], ProvisionError::Capacity(_)));
    assert_eq!(failures[0].phase(), WorkflowState::AwaitingCapacity);

    let state = env.fleet.state("asg").unwrap();
    assert_eq!(state.desired, 2);
    assert!(state.desired <= state.max);
    assert_eq!(env.cluster.members("ci").len(), 2);
    assert_eq!(env.cluster.publish_calls(), 1);
    assert_eq!(env.agents.created().len(), 2);

    for agent in &online {
        env.provisioner
            .retire(&agent.agent, &agent.unit_arn)
            .await
            .unwrap();
    }

    let reaper = env.provisioner.reaper().unwrap();
    let newest = env
        .cluster
        .members("ci")
        .iter()
        .map(|m| m.launch_time)
        .max()
        .unwrap();
    let near_boundary = newest + 3595;

    let first = reaper.run_once(near_boundary).await.unwrap();
    assert!(first.protected);
    assert_eq!(first.drained.len(), 2);
    assert!(first.terminated.is_empty());
    assert!(env
        .cluster
        .members("ci")
        .iter()
        .all(|m| m.status == MemberStatus::Draining));

    let second = reaper.run_once(near_boundary).await.unwrap();
    assert_eq!(second.terminated.len(), 2);
    assert!(env.cluster.members("ci").is_empty());
    assert_eq!(env.fleet.state("asg").unwrap().desired, 0);

    let third = reaper.run_once(near_boundary).await.unwrap();
    assert_eq!(third, ReapReport::default());
}

#[tokio::test(start_paused = true)]
async fn busy_members_are_kept_until_idle() {
    let env = env(1).await;
    let agent = env
        .provisioner
        .provision(Some("java"), 1)
        .pop()
        .unwrap()
        .outcome()
        .await
        .unwrap();

    let member = env.cluster.members("ci").pop().unwrap();
    assert_eq!(member.running_tasks, 1);
    let reaper = env.provisioner.reaper().unwrap();

    // Busy near the boundary: left alone.
    let report = reaper.run_once(member.launch_time + 3595).await.unwrap();
    assert!(report.drained.is_empty());

    // Past the uptime cap: drained even though busy, but not reaped.
    let old = member.launch_time + 10 * 3600 + 1;
    let report = reaper.run_once(old).await.unwrap();
    assert_eq!(report.drained, vec![member.arn.clone()]);
    let report = reaper.run_once(old).await.unwrap();
    assert!(report.terminated.is_empty());

    env.provisioner
        .retire(&agent.agent, &agent.unit_arn)
        .await
        .unwrap();
    let report = reaper.run_once(old).await.unwrap();
    assert_eq!(report.terminated, vec![member.instance_id]);
}

#[tokio::test(start_paused = true)]
async fn unknown_label_provisions_nothing() {
    let env = env(1).await;
    assert!(!env.provisioner.can_provision(Some("python")));
    assert!(env.provisioner.provision(Some("python"), 2).is_empty());
    assert!(env.fleet.calls().is_empty());
}
