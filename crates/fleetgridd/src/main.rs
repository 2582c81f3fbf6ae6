//! fleetgridd: the FleetGrid daemon.
//!
//! Loads a `fleetgrid.toml` and either checks it or runs the provisioning
//! workflow and scale-in reapers against in-memory cloud backends.
//!
//! # Usage
//!
//! ```text
//! fleetgridd check --config fleetgrid.toml
//! fleetgridd simulate --config fleetgrid.toml --label java --count 3
//! ```

mod check;
mod simulate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleetgridd", about = "FleetGrid agent provisioning daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a config file and print what each cloud would publish.
    Check {
        #[arg(long, default_value = "fleetgrid.toml")]
        config: PathBuf,
    },

    /// Provision agents against the in-memory backend.
    Simulate {
        #[arg(long, default_value = "fleetgrid.toml")]
        config: PathBuf,

        /// Label to provision for.
        #[arg(long)]
        label: String,

        /// Number of agents to provision.
        #[arg(long, default_value = "1")]
        count: u32,

        /// Cloud to use; defaults to the first one serving the label.
        #[arg(long)]
        cloud: Option<String>,

        /// Maximum size of the simulated fleet.
        #[arg(long, default_value = "4")]
        fleet_max: u32,

        /// Seconds a launched instance takes to go in service and join.
        #[arg(long, default_value = "5")]
        boot_secs: u64,

        /// Seconds a started unit takes to connect its agent.
        #[arg(long, default_value = "2")]
        connect_secs: u64,

        /// Keep the reapers running this long after provisioning.
        #[arg(long, default_value = "0")]
        hold_secs: u64,

        /// Retire every provisioned agent before holding.
        #[arg(long)]
        retire: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Check { config } => check::run(&config),
        Command::Simulate {
            config,
            label,
            count,
            cloud,
            fleet_max,
            boot_secs,
            connect_secs,
            hold_secs,
            retire,
        } => {
            simulate::run(simulate::SimulateArgs {
                config,
                label,
                count,
                cloud,
                fleet_max,
                boot_secs,
                connect_secs,
                hold_secs,
                retire,
            })
            .await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fleetgridd=debug,fleetgrid=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
