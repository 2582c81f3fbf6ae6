//! In-memory agent records.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use fleetgrid_core::AgentHandle;

use super::{Failures, lock};
use crate::agent::AgentLifecycle;
use crate::error::{CloudError, CloudResult};

struct AgentRecord {
    labels: Vec<String>,
    secret: String,
    online: bool,
}

#[derive(Default)]
struct AgentsState {
    records: BTreeMap<String, AgentRecord>,
    created: Vec<String>,
    removed: Vec<String>,
    failures: Failures,
}

/// Agent registry backed by process memory. Records start offline.
#[derive(Default)]
pub struct MemoryAgents {
    state: Mutex<AgentsState>,
}

impl MemoryAgents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an agent connected or disconnected. No effect once removed.
    pub fn set_online(&self, name: &str, online: bool) {
        if let Some(record) = lock(&self.state).records.get_mut(name) {
            record.online = online;
        }
    }

    /// Drop a record behind the workflow's back.
    pub fn vanish(&self, name: &str) {
        lock(&self.state).records.remove(name);
    }

    pub fn exists(&self, name: &str) -> bool {
        lock(&self.state).records.contains_key(name)
    }

    pub fn labels(&self, name: &str) -> Option<Vec<String>> {
        lock(&self.state).records.get(name).map(|r| r.labels.clone())
    }

    /// Names of every record ever created, in order.
    pub fn created(&self) -> Vec<String> {
        lock(&self.state).created.clone()
    }

    /// Names passed to `remove`, in order.
    pub fn removed(&self) -> Vec<String> {
        lock(&self.state).removed.clone()
    }

    pub fn fail(&self, operation: &'static str, error: CloudError) {
        lock(&self.state).failures.arm(operation, error);
    }

    pub fn clear_failure(&self, operation: &str) {
        lock(&self.state).failures.clear(operation);
    }
}

#[async_trait]
impl AgentLifecycle for MemoryAgents {
    async fn create(&self, name: &str, labels: &[String]) -> CloudResult<AgentHandle> {
        let mut state = lock(&self.state);
        state.failures.check("create")?;
        if state.records.contains_key(name) {
            return Err(CloudError::api("create", format!("agent {name} already exists")));
        }
        state.records.insert(
            name.to_string(),
            AgentRecord {
                labels: labels.to_vec(),
                secret: Uuid::new_v4().simple().to_string(),
                online: false,
            },
        );
        state.created.push(name.to_string());
        Ok(AgentHandle {
            name: name.to_string(),
        })
    }

    async fn remove(&self, agent: &AgentHandle) -> CloudResult<()> {
        let mut state = lock(&self.state);
        state.failures.check("remove")?;
        state.records.remove(&agent.name);
        state.removed.push(agent.name.clone());
        Ok(())
    }

    async fn is_online(&self, agent: &AgentHandle) -> CloudResult<Option<bool>> {
        let state = lock(&self.state);
        state.failures.check("is_online")?;
        Ok(state.records.get(&agent.name).map(|r| r.online))
    }

    async fn connection_secret(&self, agent: &AgentHandle) -> CloudResult<String> {
        let state = lock(&self.state);
        state.failures.check("connection_secret")?;
        state
            .records
            .get(&agent.name)
            .map(|r| r.secret.clone())
            .ok_or_else(|| CloudError::NotFound(agent.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_lifecycle() {
        let agents = MemoryAgents::new();
        let handle = agents.create("ci-1a2b", &["java".to_string()]).await.unwrap();
        assert_eq!(agents.is_online(&handle).await.unwrap(), Some(false));
        assert_eq!(agents.connection_secret(&handle).await.unwrap().len(), 32);
        assert!(agents.create("ci-1a2b", &[]).await.is_err());

        agents.set_online("ci-1a2b", true);
        assert_eq!(agents.is_online(&handle).await.unwrap(), Some(true));

        agents.vanish("ci-1a2b");
        assert_eq!(agents.is_online(&handle).await.unwrap(), None);
        assert!(agents.connection_secret(&handle).await.is_err());
        assert!(agents.removed().is_empty());
    }
}
