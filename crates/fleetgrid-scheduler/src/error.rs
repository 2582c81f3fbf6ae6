//! Provisioning error types.

use thiserror::Error;

use fleetgrid_autoscale::AdmissionError;
use fleetgrid_cloud::CloudError;
use fleetgrid_definition::ReconcileError;

use crate::workflow::WorkflowState;

/// Why a placement request ended in `Failed`.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("capacity: {0}")]
    Capacity(#[from] AdmissionError),

    #[error("definition: {0}")]
    Definition(#[from] ReconcileError),

    #[error("placement rejected: {}", .reasons.join("; "))]
    Placement { reasons: Vec<String> },

    #[error("agent record {0} was deleted before it connected")]
    RecordDeleted(String),

    #[error("agent {0} did not connect before the deadline")]
    ConnectTimeout(String),

    #[error("agent lifecycle error while {phase}: {source}")]
    Agent {
        phase: WorkflowState,
        source: CloudError,
    },

    #[error("cloud error while {phase}: {source}")]
    Cloud {
        phase: WorkflowState,
        source: CloudError,
    },

    #[error("workflow task ended abnormally: {0}")]
    Aborted(String),
}

impl ProvisionError {
    /// The phase the workflow was in when it failed.
    pub fn phase(&self) -> WorkflowState {
        match self {
            ProvisionError::Capacity(_) => WorkflowState::AwaitingCapacity,
            ProvisionError::Definition(_) => WorkflowState::AgentCreated,
            ProvisionError::Placement { .. } => WorkflowState::DefinitionReady,
            ProvisionError::RecordDeleted(_) | ProvisionError::ConnectTimeout(_) => {
                WorkflowState::TaskRunning
            }
            ProvisionError::Agent { phase, .. } | ProvisionError::Cloud { phase, .. } => *phase,
            ProvisionError::Aborted(_) => WorkflowState::Requested,
        }
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
