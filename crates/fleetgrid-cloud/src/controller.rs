//! Fleet controller: desired capacity and instance protection.

use std::sync::Arc;

use tracing::{debug, info, warn};

use fleetgrid_core::FleetState;

use crate::error::{CloudError, CloudResult};
use crate::fleet::FleetApi;

/// Reads and writes the size of an elastic instance pool.
#[derive(Clone)]
pub struct FleetController {
    api: Arc<dyn FleetApi>,
}

impl FleetController {
    pub fn new(api: Arc<dyn FleetApi>) -> Self {
        Self { api }
    }

    pub async fn describe(&self, fleet: &str) -> CloudResult<Option<FleetState>> {
        self.api.describe_fleet(fleet).await
    }

    /// Set desired capacity. Never raises it above the fleet maximum.
    pub async fn set_desired(&self, fleet: &str, desired: u32) -> CloudResult<()> {
        let state = self
            .describe(fleet)
            .await?
            .ok_or_else(|| CloudError::NotFound(fleet.to_string()))?;
        if desired > state.max {
            return Err(CloudError::CapacityExceeded {
                desired,
                max: state.max,
            });
        }
        info!(%fleet, from = state.desired, to = desired, "setting desired capacity");
        self.api.set_desired_capacity(fleet, desired).await
    }

    /// Number of instances in service; a missing fleet counts as zero.
    pub async fn in_service_count(&self, fleet: &str) -> CloudResult<u32> {
        Ok(self
            .describe(fleet)
            .await?
            .map(|s| s.in_service_count())
            .unwrap_or(0))
    }

    /// Protect newly launched instances from scale-in. Returns true if this
    /// changed anything. A missing fleet is skipped, not an error.
    pub async fn protect_new_instances(&self, fleet: &str) -> CloudResult<bool> {
        match self.describe(fleet).await? {
            Some(state) if !state.new_instances_protected => {
                info!(%fleet, "enabling scale-in protection for new instances");
                self.api.set_new_instance_protection(fleet, true).await?;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                warn!(%fleet, "fleet not found, skipping new-instance protection");
                Ok(false)
            }
        }
    }

    /// Drop protection from one instance, then terminate it and shrink
    /// desired capacity in the same call.
    pub async fn retire_instance(&self, fleet: &str, instance_id: &str) -> CloudResult<()> {
        self.api
            .set_scale_in_protection(fleet, instance_id, false)
            .await?;
        debug!(%fleet, %instance_id, "scale-in protection removed");
        self.api.terminate_instance(instance_id, true).await?;
        info!(%fleet, %instance_id, "instance terminated");
        Ok(())
    }
}
