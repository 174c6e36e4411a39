//! Pairing Manager (`spec.md` §4.5): owns the worker→service registry and
//! the health-check loop; discovery is delegated to [`crate::discovery`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use xlt_events::{Event, EventBus, EventPayload};
use xlt_protocol::types::{ServiceStatus, WorkerConfig, WorkerId};

use crate::discovery::discover_service;
use crate::error::{PairingError, Result};
use crate::health::spawn_health_loop;
use crate::registry::ServiceRegistry;

pub struct PairingManager {
    http_client: reqwest::Client,
    ssh_pool: Arc<xlt_ssh::SshConnectionPool>,
    registry: Arc<ServiceRegistry>,
    event_bus: Option<Arc<EventBus>>,
    cancel: CancellationToken,
    health_loop: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PairingManager {
    pub fn new(
        http_client: reqwest::Client,
        ssh_pool: Arc<xlt_ssh::SshConnectionPool>,
        event_bus: Option<Arc<EventBus>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            http_client,
            ssh_pool,
            registry: ServiceRegistry::new(),
            event_bus,
            cancel: CancellationToken::new(),
            health_loop: tokio::sync::Mutex::new(None),
        })
    }

    pub fn registry(&self) -> Arc<ServiceRegistry> {
        self.registry.clone()
    }

    pub async fn start_health_loop(&self, interval: Duration) {
        let handle = spawn_health_loop(
            self.http_client.clone(),
            self.registry.clone(),
            self.event_bus.clone(),
            interval,
            self.cancel.clone(),
        );
        *self.health_loop.lock().await = Some(handle);
    }

    pub async fn discover_service(&self, worker: &WorkerConfig, cancel: &CancellationToken) -> Result<()> {
        let service = discover_service(&self.http_client, &self.ssh_pool, worker, cancel).await?;
        self.registry.insert(service).await;
        Ok(())
    }

    pub async fn pair_with_service(&self, worker_id: &WorkerId) -> Result<()> {
        let updated = self
            .registry
            .mutate(worker_id, |s| {
                s.status = ServiceStatus::Paired;
                s.paired_at = Some(Utc::now());
            })
            .await;
        if !updated {
            return Err(PairingError::WorkerNotFound(worker_id.clone()));
        }
        self.publish(EventPayload::WorkerPaired { worker_id: worker_id.clone() });
        Ok(())
    }

    pub async fn unpair_service(&self, worker_id: &WorkerId) -> Result<()> {
        let updated = self.registry.mutate(worker_id, |s| s.status = ServiceStatus::Online).await;
        if !updated {
            return Err(PairingError::WorkerNotFound(worker_id.clone()));
        }
        self.publish(EventPayload::WorkerUnpaired { worker_id: worker_id.clone() });
        Ok(())
    }

    fn publish(&self, payload: EventPayload) {
        if let Some(bus) = &self.event_bus {
            bus.publish(Event::new("pairing", "pairing state change", payload));
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
