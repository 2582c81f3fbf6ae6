//! fleetgrid-cloud: the boundary between the control loops and the cloud.
//!
//! The control loops never talk to a provider SDK directly. They call
//! through three collaborator traits:
//!
//! - [`ClusterApi`]: cluster membership, definition versions, running units
//! - [`FleetApi`]: desired capacity, scale-in protection, termination
//! - [`AgentLifecycle`]: agent records that running units connect back to
//!
//! On top of those sit the two read/write helpers the control loops use,
//! [`ClusterSnapshotReader`] and [`FleetController`], and a [`ClientPool`]
//! that hands out one set of clients per `(credentials, region)`.
//!
//! The [`memory`] module provides in-process implementations of all three
//! traits for tests and for `fleetgridd simulate`.

pub mod agent;
pub mod cluster;
pub mod controller;
pub mod error;
pub mod fleet;
pub mod memory;
pub mod pool;
pub mod snapshot;

pub use agent::AgentLifecycle;
pub use cluster::{ClusterApi, Page, PlacementFailure, RunOutcome, RunUnitRequest};
pub use controller::FleetController;
pub use error::{CloudError, CloudResult};
pub use fleet::FleetApi;
pub use pool::{ClientFactory, ClientPool, CloudClients};
pub use snapshot::ClusterSnapshotReader;
