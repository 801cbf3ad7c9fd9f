//! Registry abstraction and an in-memory implementation

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use switchyard_api::Instance;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{CoreError, Result};

/// Source of truth for service instances
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch the current instance list of `service`.
    ///
    /// An unknown service is an error, not an empty list.
    async fn fetch_instances(&self, service: &str) -> Result<Vec<Instance>>;
}

/// StaticRegistry keeps services and their instances in memory
pub struct StaticRegistry {
    services: Arc<RwLock<HashMap<String, Vec<Instance>>>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self {
            services: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register or replace a service
    pub async fn register_service(&self, service: impl Into<String>, instances: Vec<Instance>) {
        let service = service.into();
        let count = instances.len();
        self.services.write().await.insert(service.clone(), instances);
        debug!(service = %service, instances = count, "Registered service");
    }

    pub async fn get(&self, service: &str) -> Result<Vec<Instance>> {
        let services = self.services.read().await;
        services
            .get(service)
            .cloned()
            .ok_or_else(|| CoreError::Registry(format!("service {} not found", service)))
    }

    /// Replace the instances of an existing service
    pub async fn update(&self, service: &str, instances: Vec<Instance>) -> Result<()> {
        let mut services = self.services.write().await;
        match services.get_mut(service) {
            Some(existing) => {
                *existing = instances;
                debug!(service = %service, "Updated instances");
                Ok(())
            }
            None => Err(CoreError::Registry(format!("service {} not found", service))),
        }
    }

    /// Registered service names, sorted
    pub async fn list(&self) -> Vec<String> {
        let services = self.services.read().await;
        let mut names: Vec<String> = services.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn deregister(&self, service: &str) {
        self.services.write().await.remove(service);
        debug!(service = %service, "Deregistered service");
    }
}

impl Default for StaticRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for StaticRegistry {
    async fn fetch_instances(&self, service: &str) -> Result<Vec<Instance>> {
        self.get(service).await
    }
}
