//! `fleetgridd simulate`: run provisioning and reapers in process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::{info, warn};

use fleetgrid_autoscale::{ClusterLocks, ReaperScheduler};
use fleetgrid_cloud::ClientPool;
use fleetgrid_cloud::memory::{
    BootSimulation, MemoryAgents, MemoryClientFactory, MemoryCluster, MemoryFleet,
};
use fleetgrid_core::Config;
use fleetgrid_scheduler::Provisioner;

pub struct SimulateArgs {
    pub config: PathBuf,
    pub label: String,
    pub count: u32,
    pub cloud: Option<String>,
    pub fleet_max: u32,
    pub boot_secs: u64,
    pub connect_secs: u64,
    pub hold_secs: u64,
    pub retire: bool,
}

pub async fn run(args: SimulateArgs) -> anyhow::Result<()> {
    let config = Config::from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    config.validate()?;

    let cloud = match &args.cloud {
        Some(name) => config
            .cloud(name)
            .with_context(|| format!("no cloud named {name}"))?,
        None => config
            .clouds
            .iter()
            .find(|c| c.template_for(Some(&args.label)).is_some())
            .with_context(|| format!("no cloud serves label {}", args.label))?,
    };
    if cloud.template_for(Some(&args.label)).is_none() {
        bail!("cloud {} has no template for label {}", cloud.name, args.label);
    }

    // ── In-memory cloud ────────────────────────────────────────

    let boot = Duration::from_secs(args.boot_secs);
    let agents = Arc::new(MemoryAgents::new());
    let cluster = Arc::new(
        MemoryCluster::new().with_agents(agents.clone(), Duration::from_secs(args.connect_secs)),
    );
    let fleet = Arc::new(MemoryFleet::new().with_boot(BootSimulation {
        cluster: cluster.clone(),
        cluster_id: cloud.cluster.clone(),
        in_service_after: boot / 2,
        join_after: boot - boot / 2,
        cpu: 4096,
        memory: 16384,
    }));
    if let Some(name) = &cloud.fleet {
        fleet.add_fleet(name, 0, 0, args.fleet_max);
    }
    let pool = ClientPool::new(Arc::new(MemoryClientFactory::with_backends(
        cluster.clone(),
        fleet.clone(),
    )));

    // ── Control loops ──────────────────────────────────────────

    let locks = ClusterLocks::new();
    let provisioner =
        Provisioner::from_config(cloud, &config.runtime, &pool, agents.clone(), locks).await?;
    let reapers = ReaperScheduler::from_runtime(&config.runtime);
    if let Some(reaper) = provisioner.reaper() {
        reapers.start(reaper).await;
    }

    info!(cloud = %cloud.name, label = %args.label, count = args.count, "simulation starting");
    let units = provisioner.provision(Some(&args.label), args.count);

    let mut provisioned = Vec::new();
    let mut failed = 0;
    for unit in units {
        match unit.outcome().await {
            Ok(agent) => {
                println!(
                    "online  {} unit={} definition={}",
                    agent.agent.name, agent.unit_arn, agent.definition.reference
                );
                provisioned.push(agent);
            }
            Err(e) => {
                println!("failed  phase={} error={e}", e.phase());
                failed += 1;
            }
        }
    }

    if args.retire {
        for agent in &provisioned {
            if let Err(e) = provisioner.retire(&agent.agent, &agent.unit_arn).await {
                warn!(agent = %agent.agent.name, error = %e, "retire failed");
            }
        }
    }

    if args.hold_secs > 0 {
        info!(secs = args.hold_secs, "holding with reapers running");
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(args.hold_secs)) => {}
            _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
        }
    }
    reapers.stop_all().await;

    let members = cluster.members(&cloud.cluster);
    let fleet_state = cloud.fleet.as_deref().and_then(|f| fleet.state(f));
    println!(
        "summary online={} failed={} members={} fleet_desired={}",
        provisioned.len(),
        failed,
        members.len(),
        fleet_state.map(|s| s.desired.to_string()).unwrap_or_else(|| "-".to_string()),
    );

    if failed > 0 {
        bail!("{failed} of {} agents failed to provision", args.count);
    }
    Ok(())
}
