//! fleetgrid-definition: keeps published definitions in step with templates.
//!
//! A template is turned into a [`DefinitionSpec`](fleetgrid_core::DefinitionSpec)
//! and compared against the most recent version published under its family.
//! The latest version is reused when nothing that matters has changed, so
//! repeated provisioning of an unchanged template never grows the version
//! history.

pub mod error;
pub mod family;
pub mod reconciler;

pub use error::{ReconcileError, ReconcileResult};
pub use family::{build_container, build_definition, family_name};
pub use reconciler::{DefinitionMatch, DefinitionReconciler};
