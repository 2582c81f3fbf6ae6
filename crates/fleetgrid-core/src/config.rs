//! fleetgrid.toml configuration parser.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::{LaunchProfile, TaskTemplate};

/// Default budget for one placement request, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 900;

/// Region used when a cloud does not name one.
pub const DEFAULT_REGION: &str = "us-east-1";

static CLOUD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,127}$").expect("valid cloud name pattern"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, rename = "cloud")]
    pub clouds: Vec<CloudConfig>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// One cloud: a cluster, its optional fleet, and the templates it can launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    pub name: String,
    #[serde(default)]
    pub credentials_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub cluster: String,
    #[serde(default)]
    pub fleet: Option<String>,
    /// URL agents connect back to.
    pub agent_url: String,
    #[serde(default)]
    pub tunnel: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Have the scale-in reaper hold the provisioning lock for its cluster.
    #[serde(default)]
    pub respect_cluster_lock: bool,
    pub launch: LaunchProfile,
    #[serde(default, rename = "template")]
    pub templates: Vec<TaskTemplate>,
}

/// Poll intervals and pool sizes shared by every cloud.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub capacity_poll_secs: u64,
    pub scale_poll_secs: u64,
    pub online_poll_secs: u64,
    pub reaper_initial_delay_secs: u64,
    pub reaper_period_secs: u64,
    pub max_concurrent_provisions: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            capacity_poll_secs: 10,
            scale_poll_secs: 5,
            online_poll_secs: 1,
            reaper_initial_delay_secs: 5,
            reaper_period_secs: 60,
            max_concurrent_provisions: 8,
        }
    }
}

impl RuntimeConfig {
    pub fn capacity_poll(&self) -> Duration {
        Duration::from_secs(self.capacity_poll_secs)
    }

    pub fn scale_poll(&self) -> Duration {
        Duration::from_secs(self.scale_poll_secs)
    }

    pub fn online_poll(&self) -> Duration {
        Duration::from_secs(self.online_poll_secs)
    }

    pub fn reaper_initial_delay(&self) -> Duration {
        Duration::from_secs(self.reaper_initial_delay_secs)
    }

    pub fn reaper_period(&self) -> Duration {
        Duration::from_secs(self.reaper_period_secs)
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate every cloud and reject duplicate cloud names.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut names = BTreeSet::new();
        for cloud in &self.clouds {
            cloud.validate()?;
            if !names.insert(cloud.name.as_str()) {
                return Err(ConfigError::DuplicateCloud(cloud.name.clone()));
            }
        }
        Ok(())
    }

    pub fn cloud(&self, name: &str) -> Option<&CloudConfig> {
        self.clouds.iter().find(|c| c.name == name)
    }
}

impl CloudConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if !CLOUD_NAME.is_match(&self.name) {
            return Err(ConfigError::InvalidCloudName(self.name.clone()));
        }
        if self.cluster.trim().is_empty() {
            return Err(ConfigError::MissingCluster(self.name.clone()));
        }
        if let LaunchProfile::Hosted(hosted) = &self.launch {
            hosted.sizing().validate()?;
        }

        let mut seen = BTreeSet::new();
        for template in &self.templates {
            template.validate()?;
            if !seen.insert(template.template_name.as_str()) {
                return Err(ConfigError::DuplicateTemplate {
                    cloud: self.name.clone(),
                    template: template.template_name.clone(),
                });
            }
        }
        Ok(())
    }

    /// First template serving `label`; no label means no template.
    pub fn template_for(&self, label: Option<&str>) -> Option<&TaskTemplate> {
        let label = label?;
        self.templates.iter().find(|t| t.matches_label(label))
    }

    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }

    pub fn timeout(&self) -> Duration {
        if self.timeout_secs > 0 {
            Duration::from_secs(self.timeout_secs)
        } else {
            Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        }
    }
}
