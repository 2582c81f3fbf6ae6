use thiserror::Error;

use fleetgrid_cloud::CloudError;
use fleetgrid_core::ConfigError;

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("cluster API error: {0}")]
    Cloud(#[from] CloudError),

    #[error("invalid template: {0}")]
    InvalidTemplate(#[from] ConfigError),
}
