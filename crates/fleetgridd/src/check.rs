//! `fleetgridd check`: validate a config and describe what it would do.

use std::path::Path;

use anyhow::Context;
use tracing::info;

use fleetgrid_core::{Config, LaunchProfile};
use fleetgrid_definition::family_name;

pub fn run(path: &Path) -> anyhow::Result<()> {
    let config = Config::from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    info!(path = %path.display(), clouds = config.clouds.len(), "config valid");

    for cloud in &config.clouds {
        let launch = match &cloud.launch {
            LaunchProfile::Hosted(h) => format!("hosted {}cpu/{}MiB", h.cpu, h.memory),
            LaunchProfile::SelfManaged => "self-managed".to_string(),
        };
        println!(
            "cloud {} cluster={} region={} fleet={} launch={} timeout={}s",
            cloud.name,
            cloud.cluster,
            cloud.region(),
            cloud.fleet.as_deref().unwrap_or("-"),
            launch,
            cloud.timeout().as_secs(),
        );
        for template in &cloud.templates {
            println!(
                "  template {} family={} labels=[{}] cpu={} memory={}",
                template.template_name,
                family_name(&cloud.name, &template.template_name),
                template.label.split_whitespace().collect::<Vec<_>>().join(","),
                template.cpu,
                template.memory_constraint(),
            );
        }
    }
    Ok(())
}
