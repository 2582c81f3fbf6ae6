//! fleetgrid-autoscale: grow the fleet when work cannot be placed, shrink it
//! when members sit idle.
//!
//! # Admission
//!
//! ```text
//! loop until deadline:
//!     if any ACTIVE member fits cpu/memory:  Available
//!     if fleet.desired + 1 <= fleet.max:
//!         set desired, wait for in-service, wait for cluster join
//!         ScaledOut if ACTIVE count reached desired, else Timeout
//!     sleep capacity_poll
//! Timeout { cpu, memory }
//! ```
//!
//! # Reaper
//!
//! Each pass protects new fleet instances from provider-initiated scale-in,
//! terminates DRAINING members with no tasks, and drains ACTIVE members that
//! have run longer than ten hours or are idle within four minutes of their
//! next billing hour. [`ReaperScheduler`] runs one pass loop per
//! (cluster, fleet) pair.

pub mod admission;
pub mod error;
pub mod lock;
pub mod reaper;
pub mod schedule;

pub use admission::{Admission, AdmissionConfig, CapacityAdmission};
pub use error::{AdmissionError, AdmissionResult};
pub use lock::ClusterLocks;
pub use reaper::{DrainReason, ReapReport, ScaleInReaper, drain_reason};
pub use schedule::{ReaperScheduler, ReaperState, STOP_GRACE};
