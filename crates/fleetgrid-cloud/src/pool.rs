//! Client pool: one set of cloud clients per `(credentials, region)`.
//!
//! Constructed once per process and passed to whatever needs clients.
//! Clients are built on first use by a [`ClientFactory`] and reused
//! afterwards; tests hand in a factory that returns in-memory backends.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use fleetgrid_core::config::DEFAULT_REGION;

use crate::cluster::ClusterApi;
use crate::error::CloudResult;
use crate::fleet::FleetApi;

/// The clients one cloud needs.
#[derive(Clone)]
pub struct CloudClients {
    pub cluster: Arc<dyn ClusterApi>,
    pub fleet: Arc<dyn FleetApi>,
}

/// Builds clients for a credential/region pair.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, credentials_id: Option<&str>, region: &str) -> CloudResult<CloudClients>;
}

type PoolKey = (String, String);

pub struct ClientPool {
    factory: Arc<dyn ClientFactory>,
    clients: Mutex<HashMap<PoolKey, CloudClients>>,
}

impl ClientPool {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Clients for a credential/region pair, connecting on first use.
    ///
    /// No credentials means the provider's ambient credential chain; no
    /// region means the default region.
    pub async fn get(
        &self,
        credentials_id: Option<&str>,
        region: Option<&str>,
    ) -> CloudResult<CloudClients> {
        let region = region.filter(|r| !r.is_empty()).unwrap_or(DEFAULT_REGION);
        let key = (credentials_id.unwrap_or_default().to_string(), region.to_string());

        let mut clients = self.clients.lock().await;
        if let Some(existing) = clients.get(&key) {
            return Ok(existing.clone());
        }

        let created = self.factory.connect(credentials_id, region)?;
        debug!(credentials = %key.0, %region, "cloud clients connected");
        clients.insert(key, created.clone());
        Ok(created)
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
