//! Background health-check ticker (`spec.md` §4.5 "Health loop").
//!
//! A health-check failure alone never unpairs a worker — it only drives the
//! `online ↔ offline` transitions for services that are not currently
//! `paired`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use xlt_events::{Event, EventBus, EventPayload};
use xlt_protocol::types::ServiceStatus;

use crate::registry::ServiceRegistry;

pub fn spawn_health_loop(
    http_client: reqwest::Client,
    registry: Arc<ServiceRegistry>,
    event_bus: Option<Arc<EventBus>>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => run_health_pass(&http_client, &registry, &event_bus).await,
            }
        }
    })
}

async fn run_health_pass(http_client: &reqwest::Client, registry: &ServiceRegistry, event_bus: &Option<Arc<EventBus>>) {
    for service in registry.snapshot().await {
        let base = match service.protocol {
            xlt_protocol::types::Protocol::Https | xlt_protocol::types::Protocol::Http3 => {
                format!("https://{}:{}", service.host, service.port)
            }
            xlt_protocol::types::Protocol::Http => format!("http://{}:{}", service.host, service.port),
        };
        let healthy = check_health(http_client, &base).await;

        let worker_id = service.worker_id.clone();
        match service.status {
            ServiceStatus::Online if !healthy => {
                registry.mutate(&worker_id, |s| s.status = ServiceStatus::Offline).await;
                publish(event_bus, EventPayload::WorkerOffline { worker_id: worker_id.clone() });
            }
            ServiceStatus::Offline if healthy => {
                registry.mutate(&worker_id, |s| s.status = ServiceStatus::Online).await;
                publish(event_bus, EventPayload::WorkerOnline { worker_id: worker_id.clone() });
            }
            ServiceStatus::Paired if !healthy => {
                debug!(%worker_id, "health check failed for paired worker; status unchanged");
            }
            _ => {}
        }
    }
}

async fn check_health(http_client: &reqwest::Client, base: &str) -> bool {
    let url = format!("{base}/health");
    match http_client.get(&url).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

fn publish(event_bus: &Option<Arc<EventBus>>, payload: EventPayload) {
    if let Some(bus) = event_bus {
        bus.publish(Event::new("pairing", "health check transition", payload));
    }
}
