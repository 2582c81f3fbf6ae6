//! Configuration and validation errors.

use thiserror::Error;

/// Result type alias for config validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while parsing or validating a `fleetgrid.toml`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid cloud name {0:?}: up to 127 letters, numbers, hyphens and underscores are allowed")]
    InvalidCloudName(String),

    #[error("duplicate cloud name: {0}")]
    DuplicateCloud(String),

    #[error("cloud {0}: cluster must not be empty")]
    MissingCluster(String),

    #[error("template {template}: {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("duplicate template name in cloud {cloud}: {template}")]
    DuplicateTemplate { cloud: String, template: String },

    #[error("invalid hosted sizing: {cpu} cpu units and {memory}mb memory")]
    InvalidSizing { cpu: u32, memory: u32 },
}
