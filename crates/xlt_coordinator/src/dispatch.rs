//! `translateWithRemoteInstances` and `TranslateWithDistributedRetry`
//! (`spec.md` §4.9): load-balanced dispatch across remote LLM instances, with
//! rate-limit cooldowns, a per-instance result cache, and a fallback to
//! local/reduced-quality translation. `translate_batch` additionally
//! exposes the performance layer's batch processor to callers with many
//! requests at once, gated on a `supports_batch` worker being paired.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use xlt_fallback::{Fallback, FallbackError, FallbackManager};
use xlt_pairing::ServiceRegistry;
use xlt_performance::{cache_key, selector_for, BatchProcessor, InstanceSelector, ResultCache};
use xlt_protocol::config::PerformanceConfig;
use xlt_protocol::defaults::DEFAULT_RATE_LIMIT_COOLDOWN;
use xlt_protocol::http_types::{TranslateRequest, TranslateResponse};
use xlt_protocol::types::{InstanceId, Protocol, RemoteLLMInstance, ServiceStatus};
use xlt_version::VersionManager;

use crate::error::{CoordinatorError, Result};
use crate::local::LocalCoordinator;

const RATE_LIMIT_TEXT_MARKERS: &[&str] = &["rate limit", "rate-limited", "too many requests"];

fn base_url(host: &str, port: u16, protocol: Protocol) -> String {
    let scheme = match protocol {
        Protocol::Https | Protocol::Http3 => "https",
        Protocol::Http => "http",
    };
    format!("{scheme}://{host}:{port}")
}

fn looks_rate_limited(status: reqwest::StatusCode, body: &str) -> bool {
    if status.as_u16() == 429 {
        return true;
    }
    let lower = body.to_ascii_lowercase();
    RATE_LIMIT_TEXT_MARKERS.iter().any(|marker| lower.contains(marker))
}

pub struct DistributedCoordinator {
    http_client: reqwest::Client,
    registry: Arc<ServiceRegistry>,
    version_manager: Arc<VersionManager>,
    fallback_manager: Arc<FallbackManager>,
    instances: tokio::sync::RwLock<Vec<RemoteLLMInstance>>,
    selector: Box<dyn InstanceSelector>,
    cache: Arc<ResultCache<String>>,
    batch_size: usize,
    batch_timeout: std::time::Duration,
    max_retries: u32,
    local_coordinator: Option<Arc<dyn LocalCoordinator>>,
    reduced_quality_coordinator: Option<Arc<dyn LocalCoordinator>>,
}

impl DistributedCoordinator {
    pub fn new(
        http_client: reqwest::Client,
        registry: Arc<ServiceRegistry>,
        version_manager: Arc<VersionManager>,
        fallback_manager: Arc<FallbackManager>,
        performance_config: &PerformanceConfig,
        max_retries: u32,
        local_coordinator: Option<Arc<dyn LocalCoordinator>>,
        reduced_quality_coordinator: Option<Arc<dyn LocalCoordinator>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            http_client,
            registry,
            version_manager,
            fallback_manager,
            instances: tokio::sync::RwLock::new(Vec::new()),
            selector: selector_for(performance_config.load_balancing_strategy),
            cache: Arc::new(ResultCache::new(performance_config.max_cache_size, performance_config.cache_ttl)),
            batch_size: performance_config.batch_size,
            batch_timeout: performance_config.batch_timeout,
            max_retries,
            local_coordinator,
            reduced_quality_coordinator,
        })
    }

    /// `DiscoverRemoteInstances`: atomically replaces the instance list.
    pub async fn discover_remote_instances(&self) -> Result<()> {
        let fresh = crate::discovery::discover_remote_instances(&self.http_client, &self.registry).await?;
        *self.instances.write().await = fresh;
        Ok(())
    }

    pub async fn instance_snapshot(&self) -> Vec<RemoteLLMInstance> {
        self.instances.read().await.clone()
    }

    /// `TranslateWithDistributedRetry`: C7 wraps the remote-instance primary
    /// with exactly `[local_fallback, reduced_quality]`, in that order.
    pub async fn translate_with_distributed_retry(
        self: &Arc<Self>,
        text: &str,
        hint: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, FallbackError<CoordinatorError>> {
        let mut fallbacks = Vec::new();
        if let Some(local) = self.local_coordinator.clone() {
            let text = text.to_string();
            let hint = hint.to_string();
            fallbacks.push(Fallback::new("local_fallback", move || {
                let local = local.clone();
                let text = text.clone();
                let hint = hint.clone();
                async move {
                    local.translate(&text, &hint).await.map_err(|e| CoordinatorError::RemoteError {
                        instance_id: InstanceId::new("local"),
                        message: e.to_string(),
                    })
                }
            }));
        }
        if let Some(reduced) = self.reduced_quality_coordinator.clone() {
            let text = text.to_string();
            let hint = hint.to_string();
            fallbacks.push(Fallback::new("reduced_quality", move || {
                let reduced = reduced.clone();
                let text = text.clone();
                let hint = hint.clone();
                async move {
                    reduced.translate(&text, &hint).await.map_err(|e| CoordinatorError::RemoteError {
                        instance_id: InstanceId::new("reduced_quality"),
                        message: e.to_string(),
                    })
                }
            }));
        }

        let this = self.clone();
        let text = text.to_string();
        let hint = hint.to_string();
        self.fallback_manager
            .execute_with_fallback(
                "distributed_coordinator",
                cancel,
                move || {
                    let this = this.clone();
                    let text = text.clone();
                    let hint = hint.clone();
                    async move { this.translate_with_remote_instances(&text, &hint).await }
                },
                fallbacks,
            )
            .await
    }

    /// `translateWithRemoteInstances`: dispatches through instances via the
    /// configured load-balancing strategy, tracking tried IDs to avoid
    /// duplicates within this call, up to `max_retries * len(instances)`
    /// total attempts. Each candidate is checked against the result cache,
    /// keyed on `(text, hint, provider, model)`, before the remote call.
    async fn translate_with_remote_instances(&self, text: &str, hint: &str) -> Result<String> {
        let instances = self.instances.read().await.clone();
        if instances.is_empty() {
            return Err(CoordinatorError::NoInstancesAvailable);
        }

        let max_attempts = self.max_retries.saturating_mul(instances.len() as u32).max(1);
        let mut tried: HashSet<InstanceId> = HashSet::new();
        let mut last_error = CoordinatorError::NoInstancesAvailable;

        for _ in 0..max_attempts {
            let candidate = {
                let available: Vec<RemoteLLMInstance> =
                    instances.iter().filter(|i| i.available && !tried.contains(&i.id)).cloned().collect();
                match self.selector.select(&available) {
                    Some(c) => c.clone(),
                    None => break,
                }
            };
            tried.insert(candidate.id.clone());

            let key = cache_key(text, hint, &candidate.provider, &candidate.model);
            if let Some(cached) = self.cache.get(&key) {
                return Ok(cached);
            }

            match self.attempt_translate(&candidate, text, hint).await {
                Ok(translated) => {
                    self.mark_last_used(&candidate.id).await;
                    self.cache.set(key, translated.clone());
                    return Ok(translated);
                }
                Err(CoordinatorError::RateLimited(instance_id)) => {
                    self.schedule_rate_limit_cooldown(instance_id.clone());
                    last_error = CoordinatorError::RateLimited(instance_id);
                }
                Err(e) => last_error = e,
            }
        }

        Err(last_error)
    }

    /// `TranslateBatch`: dispatches many `(text, hint)` requests through the
    /// performance layer's `BatchProcessor`, chunked at `batch_size`
    /// granularity so no more than `batch_size` remote calls for this batch
    /// are ever in flight at once; each chunk's items are translated
    /// concurrently through `translateWithRemoteInstances`. Requires at
    /// least one paired worker whose capabilities advertise
    /// `supports_batch` — otherwise callers should dispatch individually.
    pub async fn translate_batch(self: &Arc<Self>, requests: &[(String, String)]) -> Result<Vec<Result<String>>> {
        if !self.has_batch_capable_worker().await {
            return Err(CoordinatorError::NoInstancesAvailable);
        }

        let processor: Arc<BatchProcessor<(String, String), Vec<(String, String)>>> =
            BatchProcessor::new(self.batch_size, self.batch_timeout, |items| items);
        let mut chunks = Vec::new();
        for request in requests {
            if let Some(chunk) = processor.push("translate_batch", request.clone()) {
                chunks.push(chunk);
            }
        }
        chunks.extend(processor.flush_all());

        let mut results = Vec::with_capacity(requests.len());
        for chunk in chunks {
            let mut handles = Vec::with_capacity(chunk.len());
            for (text, hint) in chunk {
                let this = self.clone();
                handles.push(tokio::spawn(async move { this.translate_with_remote_instances(&text, &hint).await }));
            }
            for handle in handles {
                results.push(handle.await.unwrap_or(Err(CoordinatorError::NoInstancesAvailable)));
            }
        }
        Ok(results)
    }

    async fn has_batch_capable_worker(&self) -> bool {
        let instances = self.instances.read().await;
        for instance in instances.iter() {
            if let Some(service) = self.registry.get(&instance.worker_id).await {
                if service.capabilities.supports_batch {
                    return true;
                }
            }
        }
        false
    }

    async fn attempt_translate(&self, instance: &RemoteLLMInstance, text: &str, hint: &str) -> Result<String> {
        let service = self
            .registry
            .get(&instance.worker_id)
            .await
            .filter(|s| s.status == ServiceStatus::Paired)
            .ok_or(CoordinatorError::NoInstancesAvailable)?;

        let mut validated = service.clone();
        self.version_manager
            .validate_worker_for_work(&mut validated)
            .await
            .map_err(|source| CoordinatorError::WorkerValidationFailed { instance_id: instance.id.clone(), source })?;

        let base = base_url(&service.host, service.port, service.protocol);
        let url = format!("{base}/api/v1/translate");
        let body = TranslateRequest {
            text: text.to_string(),
            context_hint: hint.to_string(),
            provider: instance.provider.clone(),
            model: instance.model.clone(),
        };

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|source| CoordinatorError::Http { worker_id: instance.worker_id.clone(), source })?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|source| CoordinatorError::Http { worker_id: instance.worker_id.clone(), source })?;

        if looks_rate_limited(status, &response_text) {
            return Err(CoordinatorError::RateLimited(instance.id.clone()));
        }
        if !status.is_success() {
            return Err(CoordinatorError::RemoteError { instance_id: instance.id.clone(), message: response_text });
        }

        let parsed: TranslateResponse = serde_json::from_str(&response_text).map_err(|_| CoordinatorError::RemoteError {
            instance_id: instance.id.clone(),
            message: response_text,
        })?;
        Ok(parsed.translated_text)
    }

    async fn mark_last_used(&self, instance_id: &InstanceId) {
        let mut instances = self.instances.write().await;
        if let Some(instance) = instances.iter_mut().find(|i| &i.id == instance_id) {
            instance.last_used = Some(Utc::now());
        }
    }

    fn schedule_rate_limit_cooldown(self: &Arc<Self>, instance_id: InstanceId) {
        let this = self.clone();
        tokio::spawn(async move {
            {
                let mut instances = this.instances.write().await;
                if let Some(instance) = instances.iter_mut().find(|i| i.id == instance_id) {
                    instance.available = false;
                }
            }
            tokio::time::sleep(DEFAULT_RATE_LIMIT_COOLDOWN).await;
            let mut instances = this.instances.write().await;
            if let Some(instance) = instances.iter_mut().find(|i| i.id == instance_id) {
                instance.available = true;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use xlt_protocol::types::{Capabilities, Priority, Protocol, RemoteService, ServiceStatus, WorkerId};

    use super::*;
    use crate::error::LocalCoordinatorError;

    fn local_version() -> xlt_protocol::types::VersionInfo {
        xlt_protocol::types::VersionInfo {
            codebase_version: "1.0.0".into(),
            build_time: Utc::now(),
            git_commit: "abc".into(),
            runtime_version: "rustc".into(),
            components: Default::default(),
            last_updated: Utc::now(),
        }
    }

    async fn paired_service(worker_id: &str, base: &str) -> RemoteService {
        let url = reqwest::Url::parse(base).unwrap();
        RemoteService {
            worker_id: WorkerId::new(worker_id),
            host: url.host_str().unwrap().to_string(),
            port: url.port().unwrap(),
            protocol: Protocol::Http,
            status: ServiceStatus::Paired,
            capabilities: Capabilities { providers: vec![], max_concurrent: 2, supports_batch: false },
            version: Some(local_version()),
            last_seen: Utc::now(),
            paired_at: Some(Utc::now()),
        }
    }

    fn instance(worker_id: &str, idx: usize) -> RemoteLLMInstance {
        RemoteLLMInstance {
            id: InstanceId::new(format!("{worker_id}:openai:{idx}")),
            worker_id: WorkerId::new(worker_id),
            provider: "openai".into(),
            model: "gpt-4".into(),
            priority: Priority::High,
            available: true,
            last_used: None,
        }
    }

    async fn setup(mock: &MockServer) -> (Arc<DistributedCoordinator>, Arc<ServiceRegistry>) {
        let registry = ServiceRegistry::new();
        registry.insert(paired_service("w1", &mock.uri()).await).await;

        let version_manager =
            Arc::new(VersionManager::new(reqwest::Client::new(), local_version(), None));
        let fallback_manager = FallbackManager::new(xlt_fallback::FallbackManagerConfig::default(), None);

        let coordinator = DistributedCoordinator::new(
            reqwest::Client::new(),
            registry.clone(),
            version_manager,
            fallback_manager,
            &xlt_protocol::config::PerformanceConfig::default(),
            2,
            None,
            None,
        );
        *coordinator.instances.write().await = vec![instance("w1", 0)];
        (coordinator, registry)
    }

    #[tokio::test]
    async fn translates_via_the_single_available_instance() {
        let mock = MockServer::start().await;
        Mock::given(method("GET")).and(path("/api/v1/version")).respond_with(ResponseTemplate::new(200).set_body_json(&local_version())).mount(&mock).await;
        Mock::given(method("GET")).and(path("/health")).respond_with(ResponseTemplate::new(200).set_body_json(xlt_protocol::http_types::HealthResponse { status: "healthy".into() })).mount(&mock).await;
        Mock::given(method("POST")).and(path("/api/v1/translate")).respond_with(ResponseTemplate::new(200).set_body_json(TranslateResponse { translated_text: "hola".into() })).mount(&mock).await;

        let (coordinator, _registry) = setup(&mock).await;
        let result = coordinator.translate_with_remote_instances("hello", "greeting").await.unwrap();
        assert_eq!(result, "hola");
    }

    #[tokio::test]
    async fn rate_limited_instance_is_marked_unavailable() {
        let mock = MockServer::start().await;
        Mock::given(method("GET")).and(path("/api/v1/version")).respond_with(ResponseTemplate::new(200).set_body_json(&local_version())).mount(&mock).await;
        Mock::given(method("GET")).and(path("/health")).respond_with(ResponseTemplate::new(200).set_body_json(xlt_protocol::http_types::HealthResponse { status: "healthy".into() })).mount(&mock).await;
        Mock::given(method("POST")).and(path("/api/v1/translate")).respond_with(ResponseTemplate::new(429)).mount(&mock).await;

        let (coordinator, _registry) = setup(&mock).await;
        let err = coordinator.translate_with_remote_instances("hello", "greeting").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::RateLimited(_)));

        tokio::task::yield_now().await;
        let instances = coordinator.instance_snapshot().await;
        assert!(!instances[0].available);
    }

    #[tokio::test]
    async fn no_instances_available_returns_error() {
        let mock = MockServer::start().await;
        let (coordinator, _registry) = setup(&mock).await;
        coordinator.instances.write().await.clear();
        let err = coordinator.translate_with_remote_instances("hi", "x").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::NoInstancesAvailable));
    }

    struct AlwaysSucceeds;
    #[async_trait]
    impl LocalCoordinator for AlwaysSucceeds {
        async fn translate(&self, text: &str, _hint: &str) -> Result<String, LocalCoordinatorError> {
            Ok(format!("local:{text}"))
        }
    }

    #[tokio::test]
    async fn distributed_retry_falls_back_to_local_coordinator_when_no_instances() {
        let mock = MockServer::start().await;
        let (coordinator, _registry) = setup(&mock).await;
        coordinator.instances.write().await.clear();

        let coordinator = DistributedCoordinator::new(
            reqwest::Client::new(),
            ServiceRegistry::new(),
            Arc::new(VersionManager::new(reqwest::Client::new(), local_version(), None)),
            FallbackManager::new(xlt_fallback::FallbackManagerConfig::default(), None),
            &xlt_protocol::config::PerformanceConfig::default(),
            2,
            Some(Arc::new(AlwaysSucceeds)),
            None,
        );

        let cancel = CancellationToken::new();
        let result = coordinator.translate_with_distributed_retry("hi", "x", &cancel).await.unwrap();
        assert_eq!(result, "local:hi");
    }

    #[tokio::test]
    async fn translate_batch_requires_a_batch_capable_worker() {
        let mock = MockServer::start().await;
        let (coordinator, _registry) = setup(&mock).await;
        let err = coordinator
            .translate_batch(&[("hi".into(), "x".into())])
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NoInstancesAvailable));
    }

    #[tokio::test]
    async fn translate_batch_dispatches_every_request_once_a_worker_supports_it() {
        let mock = MockServer::start().await;
        Mock::given(method("GET")).and(path("/api/v1/version")).respond_with(ResponseTemplate::new(200).set_body_json(&local_version())).mount(&mock).await;
        Mock::given(method("GET")).and(path("/health")).respond_with(ResponseTemplate::new(200).set_body_json(xlt_protocol::http_types::HealthResponse { status: "healthy".into() })).mount(&mock).await;
        Mock::given(method("POST")).and(path("/api/v1/translate")).respond_with(ResponseTemplate::new(200).set_body_json(TranslateResponse { translated_text: "hola".into() })).mount(&mock).await;

        let registry = ServiceRegistry::new();
        let mut service = paired_service("w1", &mock.uri()).await;
        service.capabilities.supports_batch = true;
        registry.insert(service).await;

        let version_manager = Arc::new(VersionManager::new(reqwest::Client::new(), local_version(), None));
        let fallback_manager = FallbackManager::new(xlt_fallback::FallbackManagerConfig::default(), None);
        let coordinator = DistributedCoordinator::new(
            reqwest::Client::new(),
            registry,
            version_manager,
            fallback_manager,
            &xlt_protocol::config::PerformanceConfig::default(),
            2,
            None,
            None,
        );
        *coordinator.instances.write().await = vec![instance("w1", 0)];

        let requests = vec![("hello".to_string(), "greeting".to_string()), ("bye".to_string(), "farewell".to_string())];
        let results = coordinator.translate_batch(&requests).await.unwrap();
        assert_eq!(results.len(), 2);
        for result in results {
            assert_eq!(result.unwrap(), "hola");
        }
    }

    #[tokio::test]
    async fn a_cached_translation_skips_a_repeat_call_to_the_same_instance() {
        let mock = MockServer::start().await;
        Mock::given(method("GET")).and(path("/api/v1/version")).respond_with(ResponseTemplate::new(200).set_body_json(&local_version())).mount(&mock).await;
        Mock::given(method("GET")).and(path("/health")).respond_with(ResponseTemplate::new(200).set_body_json(xlt_protocol::http_types::HealthResponse { status: "healthy".into() })).mount(&mock).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/translate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(TranslateResponse { translated_text: "hola".into() }))
            .expect(1)
            .mount(&mock)
            .await;

        let (coordinator, _registry) = setup(&mock).await;
        let first = coordinator.translate_with_remote_instances("hello", "greeting").await.unwrap();
        assert_eq!(first, "hola");
        let second = coordinator.translate_with_remote_instances("hello", "greeting").await.unwrap();
        assert_eq!(second, "hola");

        mock.verify().await;
    }
}
