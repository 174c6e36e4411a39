//! Shared worker→service map (`spec.md` §3 ownership rule): owned and
//! mutated only by [`crate::PairingManager`], read by `xlt_coordinator`
//! through the same `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use xlt_protocol::types::{RemoteService, WorkerId};

#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<WorkerId, RemoteService>>,
}

impl ServiceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn get(&self, worker_id: &WorkerId) -> Option<RemoteService> {
        self.services.read().await.get(worker_id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<RemoteService> {
        self.services.read().await.values().cloned().collect()
    }

    pub async fn insert(&self, service: RemoteService) {
        self.services.write().await.insert(service.worker_id.clone(), service);
    }

    pub async fn remove(&self, worker_id: &WorkerId) {
        self.services.write().await.remove(worker_id);
    }

    pub async fn mutate<F>(&self, worker_id: &WorkerId, f: F) -> bool
    where
        F: FnOnce(&mut RemoteService),
    {
        let mut services = self.services.write().await;
        if let Some(service) = services.get_mut(worker_id) {
            f(service);
            true
        } else {
            false
        }
    }
}
