//! fleetgrid-core: shared domain model and configuration.
//!
//! Everything the control loops pass between each other lives here:
//! task templates, launch profiles, published definition versions,
//! cluster members and fleet state. The `config` module parses
//! `fleetgrid.toml` into the same types.

pub mod config;
pub mod error;
pub mod types;

pub use config::{CloudConfig, Config, RuntimeConfig};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
