use thiserror::Error;

use fleetgrid_cloud::CloudError;

pub type AdmissionResult<T> = Result<T, AdmissionError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("timed out waiting for capacity: {cpu} cpu units, {memory} MiB")]
    Timeout { cpu: u32, memory: u32 },

    #[error("cloud error: {0}")]
    Cloud(#[from] CloudError),
}
