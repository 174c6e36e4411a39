//! `DiscoverRemoteInstances` (`spec.md` §4.9): expands each paired
//! service's advertised providers into a fresh, atomically-replacing
//! instance list.

use tracing::warn;
use xlt_pairing::ServiceRegistry;
use xlt_protocol::types::{InstanceId, Protocol, ProvidersPayload, RemoteLLMInstance, ServiceStatus, WorkerId};

use crate::error::{CoordinatorError, Result};
use crate::priority::{classify_provider, instance_count_for_priority, priority_for};

fn base_url(host: &str, port: u16, protocol: Protocol) -> String {
    let scheme = match protocol {
        Protocol::Https | Protocol::Http3 => "https",
        Protocol::Http => "http",
    };
    format!("{scheme}://{host}:{port}")
}

async fn fetch_providers(http_client: &reqwest::Client, worker_id: &WorkerId, base: &str) -> Result<ProvidersPayload> {
    let url = format!("{base}/api/v1/providers");
    let response = http_client
        .get(&url)
        .send()
        .await
        .map_err(|source| CoordinatorError::Http { worker_id: worker_id.clone(), source })?;
    response
        .json()
        .await
        .map_err(|source| CoordinatorError::MalformedProviders { worker_id: worker_id.clone(), source })
}

fn expand_instances(worker_id: &WorkerId, max_concurrent: u32, payload: ProvidersPayload) -> Vec<RemoteLLMInstance> {
    let mut instances = Vec::new();
    for provider in payload.into_capabilities() {
        let family = classify_provider(&provider.name);
        let count = instance_count_for_priority(family, max_concurrent);
        let model = provider.models.first().cloned().unwrap_or_default();
        for i in 0..count {
            instances.push(RemoteLLMInstance {
                id: InstanceId::new(format!("{worker_id}:{}:{i}", provider.name)),
                worker_id: worker_id.clone(),
                provider: provider.name.clone(),
                model: model.clone(),
                priority: priority_for(family),
                available: true,
                last_used: None,
            });
        }
    }
    instances
}

/// Queries every paired service for its current providers and returns the
/// full, freshly-built instance list. Callers replace (never merge) their
/// previous list with this one, per `spec.md` §4.9.
///
/// A single worker failing to answer `/api/v1/providers` doesn't abort
/// discovery for the rest of the fleet; it's logged and skipped so one
/// unreachable worker can't zero out every other worker's instances.
pub async fn discover_remote_instances(
    http_client: &reqwest::Client,
    registry: &ServiceRegistry,
) -> Result<Vec<RemoteLLMInstance>> {
    let mut all_instances = Vec::new();
    for service in registry.snapshot().await {
        if service.status != ServiceStatus::Paired {
            continue;
        }
        let base = base_url(&service.host, service.port, service.protocol);
        match fetch_providers(http_client, &service.worker_id, &base).await {
            Ok(payload) => {
                all_instances.extend(expand_instances(&service.worker_id, service.capabilities.max_concurrent, payload))
            }
            Err(error) => warn!(worker_id = %service.worker_id, %error, "skipping worker during instance discovery"),
        }
    }
    Ok(all_instances)
}
