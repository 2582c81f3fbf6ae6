//! fleetgrid-scheduler: turns a placement request into a connected agent.
//!
//! # Workflow
//!
//! ```text
//! Requested
//!   └─ AwaitingCapacity   admission under the per-cluster lock (self-managed only)
//!       └─ AgentCreated   agent record created
//!           └─ DefinitionReady   definition reconciled
//!               └─ TaskRunning   unit started with the agent's identity
//!                   └─ AgentOnline
//! ```
//!
//! Any phase may end in `Failed`. One deadline, fixed when the request
//! starts, bounds every phase. The agent record is removed on every failure
//! after it was created.
//!
//! [`Provisioner`] holds one cloud's configuration and fans a request for
//! N units out to N workflows on a bounded pool.

pub mod error;
pub mod provisioner;
pub mod workflow;

pub use error::{ProvisionError, ProvisionResult};
pub use provisioner::{PlannedUnit, Provisioner};
pub use workflow::{
    AGENT_NAME_VAR, AGENT_SECRET_VAR, ProvisionedAgent, ProvisioningWorkflow, WorkflowSettings,
    WorkflowState, agent_name, launch_command,
};
