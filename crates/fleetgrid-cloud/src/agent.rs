//! Agent-lifecycle collaborator.
//!
//! An agent record is the identity a running unit connects back as. The
//! workflow creates one before launching, and removes it on every failure.

use async_trait::async_trait;

use fleetgrid_core::AgentHandle;

use crate::error::CloudResult;

#[async_trait]
pub trait AgentLifecycle: Send + Sync {
    async fn create(&self, name: &str, labels: &[String]) -> CloudResult<AgentHandle>;

    async fn remove(&self, agent: &AgentHandle) -> CloudResult<()>;

    /// `Some(online)` while the record exists, `None` once it has vanished.
    async fn is_online(&self, agent: &AgentHandle) -> CloudResult<Option<bool>>;

    /// Secret the unit presents when it connects.
    async fn connection_secret(&self, agent: &AgentHandle) -> CloudResult<String>;
}
