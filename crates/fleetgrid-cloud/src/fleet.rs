//! Fleet API collaborator.

use async_trait::async_trait;

use fleetgrid_core::FleetState;

use crate::error::CloudResult;

/// Operations on an elastic instance pool.
#[async_trait]
pub trait FleetApi: Send + Sync {
    /// Describe a fleet; `None` if it does not exist.
    async fn describe_fleet(&self, fleet: &str) -> CloudResult<Option<FleetState>>;

    async fn set_desired_capacity(&self, fleet: &str, desired: u32) -> CloudResult<()>;

    /// Toggle scale-in protection for instances launched from now on.
    async fn set_new_instance_protection(&self, fleet: &str, protected: bool) -> CloudResult<()>;

    async fn set_scale_in_protection(
        &self,
        fleet: &str,
        instance_id: &str,
        protected: bool,
    ) -> CloudResult<()>;

    /// Terminate one instance, optionally shrinking desired capacity with it.
    async fn terminate_instance(&self, instance_id: &str, decrement_desired: bool)
    -> CloudResult<()>;
}
