//! Distributed Manager (`spec.md` §4.10, C10): the façade composing
//! discovery/pairing (C5), version management (C6), fallback (C7),
//! performance (C8) and the distributed coordinator (C9) into one
//! lifecycle-guarded entry point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use xlt_coordinator::{DistributedCoordinator, LocalCoordinator};
use xlt_events::EventBus;
use xlt_fallback::{FallbackManager, FallbackManagerConfig};
use xlt_pairing::PairingManager;
use xlt_protocol::config::{PerformanceConfig, SecurityConfig};
use xlt_protocol::defaults::DEFAULT_HEALTH_CHECK_INTERVAL;
use xlt_protocol::types::{VersionInfo, WorkerConfig, WorkerId};
use xlt_security::{KnownHosts, TlsConfigBuilder};
use xlt_ssh::{RusshTransport, SshConnectionPool, SshConnectionPoolConfig};
use xlt_version::VersionManager;

use crate::error::{DistributedError, Result};
use crate::status::DistributedStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Ready,
    Closed,
}

struct Inner {
    state: ManagerState,
    workers: HashMap<WorkerId, WorkerConfig>,
}

/// Construction knobs the host application supplies once, mirroring
/// `xlt_protocol::config::{DistributedConfig, SecurityConfig, FallbackConfig,
/// PerformanceConfig}`.
pub struct DistributedManagerConfig {
    pub local_version: VersionInfo,
    pub workers: Vec<WorkerConfig>,
    pub known_hosts: Option<KnownHosts>,
    pub security_config: SecurityConfig,
    pub health_check_interval: Duration,
    pub max_retries: u32,
    pub fallback_config: FallbackManagerConfig,
    pub performance_config: PerformanceConfig,
    pub event_bus: Option<Arc<EventBus>>,
}

impl DistributedManagerConfig {
    pub fn new(local_version: VersionInfo, workers: Vec<WorkerConfig>) -> Self {
        Self {
            local_version,
            workers,
            known_hosts: None,
            security_config: SecurityConfig::default(),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            max_retries: 2,
            fallback_config: FallbackManagerConfig::default(),
            performance_config: PerformanceConfig::default(),
            event_bus: None,
        }
    }
}

/// Builds the data-plane HTTP client from the Security Layer's TLS policy
/// (`spec.md` §4.4/§4.5): system roots unless `tls_ca_bundle_path` overrides
/// them, optional mutual TLS, and self-signed certs accepted iff
/// `allow_self_signed` is set.
fn build_http_client(security: &SecurityConfig) -> Result<reqwest::Client> {
    let tls_config = TlsConfigBuilder::new()
        .ca_bundle(security.tls_ca_bundle_path.clone())
        .client_identity(security.tls_client_cert_path.clone(), security.tls_client_key_path.clone())
        .allow_self_signed(security.allow_self_signed)
        .build()?;
    reqwest::Client::builder()
        .use_preconfigured_tls(tls_config)
        .build()
        .map_err(DistributedError::HttpClient)
}

pub struct DistributedManager {
    inner: RwLock<Inner>,
    http_client: reqwest::Client,
    pairing: Arc<PairingManager>,
    ssh_pool: Arc<SshConnectionPool>,
    version_manager: Arc<VersionManager>,
    fallback_manager: Arc<FallbackManager>,
    coordinator: RwLock<Option<Arc<DistributedCoordinator>>>,
    performance_config: PerformanceConfig,
    max_retries: u32,
    health_check_interval: Duration,
    cancel: CancellationToken,
}

impl DistributedManager {
    pub fn new(config: DistributedManagerConfig) -> Result<Arc<Self>> {
        let http_client = build_http_client(&config.security_config)?;
        let known_hosts = Arc::new(config.known_hosts.unwrap_or_else(KnownHosts::empty));
        let transport = Arc::new(RusshTransport::new(known_hosts, config.security_config.verify_host_keys));
        let ssh_pool = SshConnectionPool::new(transport, SshConnectionPoolConfig::default());
        let pairing = PairingManager::new(http_client.clone(), ssh_pool.clone(), config.event_bus.clone());
        let version_manager =
            Arc::new(VersionManager::new(http_client.clone(), config.local_version, config.event_bus.clone()));
        let fallback_manager = FallbackManager::new(config.fallback_config, config.event_bus.clone());

        let workers = config.workers.into_iter().map(|w| (w.id.clone(), w)).collect();

        Ok(Arc::new(Self {
            inner: RwLock::new(Inner { state: ManagerState::Uninitialized, workers }),
            http_client,
            pairing,
            ssh_pool,
            version_manager,
            fallback_manager,
            coordinator: RwLock::new(None),
            performance_config: config.performance_config,
            max_retries: config.max_retries,
            health_check_interval: config.health_check_interval,
            cancel: CancellationToken::new(),
        }))
    }

    /// One-shot: builds the coordinator around `local_coordinator` (used as
    /// both the `local_fallback` and `reduced_quality` fallback slots, per
    /// `spec.md` §9) and starts the health-check loop. Fails if called
    /// twice.
    pub async fn initialize(self: &Arc<Self>, local_coordinator: Option<Arc<dyn LocalCoordinator>>) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state != ManagerState::Uninitialized {
            return Err(DistributedError::AlreadyInitialized);
        }

        let coordinator = DistributedCoordinator::new(
            self.http_client.clone(),
            self.pairing.registry(),
            self.version_manager.clone(),
            self.fallback_manager.clone(),
            &self.performance_config,
            self.max_retries,
            local_coordinator.clone(),
            local_coordinator,
        );
        *self.coordinator.write().await = Some(coordinator);
        self.pairing.start_health_loop(self.health_check_interval).await;

        inner.state = ManagerState::Ready;
        info!(worker_count = inner.workers.len(), "distributed manager initialized");
        Ok(())
    }

    /// Iterates registered workers, runs C5 discovery+pairing for each
    /// enabled one, then refreshes the C9 remote-instance list.
    pub async fn discover_and_pair_workers(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        let inner = self.inner.write().await;
        Self::ensure_ready(&inner)?;

        for worker in inner.workers.values().filter(|w| w.enabled) {
            self.pairing.discover_service(worker, cancel).await?;
            self.pairing.pair_with_service(&worker.id).await?;
        }
        drop(inner);

        let coordinator = self.coordinator_handle().await?;
        coordinator.discover_remote_instances().await.map_err(DistributedError::Discovery)?;
        Ok(())
    }

    pub async fn add_worker(self: &Arc<Self>, worker: WorkerConfig) -> Result<()> {
        let mut inner = self.inner.write().await;
        Self::ensure_ready(&inner)?;
        if inner.workers.contains_key(&worker.id) {
            return Err(DistributedError::WorkerAlreadyExists(worker.id));
        }
        inner.workers.insert(worker.id.clone(), worker);
        Ok(())
    }

    pub async fn remove_worker(self: &Arc<Self>, worker_id: &WorkerId) -> Result<()> {
        let mut inner = self.inner.write().await;
        Self::ensure_ready(&inner)?;
        if inner.workers.remove(worker_id).is_none() {
            return Err(DistributedError::WorkerNotFound(worker_id.clone()));
        }
        drop(inner);
        self.pairing.registry().remove(worker_id).await;
        self.ssh_pool.close_worker(worker_id).await;
        Ok(())
    }

    pub async fn pair_worker(self: &Arc<Self>, worker_id: &WorkerId) -> Result<()> {
        let inner = self.inner.write().await;
        Self::ensure_ready(&inner)?;
        self.pairing.pair_with_service(worker_id).await?;
        Ok(())
    }

    pub async fn unpair_worker(self: &Arc<Self>, worker_id: &WorkerId) -> Result<()> {
        let inner = self.inner.write().await;
        Self::ensure_ready(&inner)?;
        self.pairing.unpair_service(worker_id).await?;
        Ok(())
    }

    /// Thin wrapper over C9's `TranslateWithDistributedRetry`.
    pub async fn translate_distributed(
        self: &Arc<Self>,
        text: &str,
        hint: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let coordinator = self.coordinator_handle().await?;
        coordinator.translate_with_distributed_retry(text, hint, cancel).await.map_err(DistributedError::Translation)
    }

    /// Thin wrapper over C9's `TranslateBatch`.
    pub async fn translate_batch(
        self: &Arc<Self>,
        requests: &[(String, String)],
    ) -> Result<Vec<std::result::Result<String, xlt_coordinator::CoordinatorError>>> {
        let coordinator = self.coordinator_handle().await?;
        coordinator.translate_batch(requests).await.map_err(DistributedError::BatchTranslation)
    }

    pub async fn get_status(&self) -> Result<DistributedStatus> {
        let inner = self.inner.read().await;
        if inner.state == ManagerState::Uninitialized {
            return Err(DistributedError::NotInitialized);
        }
        drop(inner);

        let services = self.pairing.registry().snapshot().await;
        let remote_instance_count = match self.coordinator.read().await.as_ref() {
            Some(coordinator) => coordinator.instance_snapshot().await.len(),
            None => 0,
        };
        Ok(DistributedStatus::from_services(&services, remote_instance_count, self.fallback_manager.is_degraded()))
    }

    /// Cancels background loops, closes the SSH pool and tears down the
    /// health-check ticker.
    pub async fn close(self: &Arc<Self>) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state != ManagerState::Ready {
            return Err(DistributedError::NotInitialized);
        }
        self.cancel.cancel();
        self.pairing.shutdown();
        self.ssh_pool.shutdown();
        inner.state = ManagerState::Closed;
        warn!("distributed manager closed");
        Ok(())
    }

    fn ensure_ready(inner: &Inner) -> Result<()> {
        match inner.state {
            ManagerState::Uninitialized => Err(DistributedError::NotInitialized),
            ManagerState::Closed => Err(DistributedError::Closed),
            ManagerState::Ready => Ok(()),
        }
    }

    async fn coordinator_handle(&self) -> Result<Arc<DistributedCoordinator>> {
        self.coordinator.read().await.clone().ok_or(DistributedError::NotInitialized)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use xlt_coordinator::error::LocalCoordinatorError;
    use xlt_protocol::types::{AuthMethod, SshEndpoint};

    use super::*;

    fn worker(id: &str) -> WorkerConfig {
        WorkerConfig {
            id: WorkerId::new(id),
            name: format!("worker-{id}"),
            ssh: SshEndpoint {
                host: "127.0.0.1".into(),
                port: 22,
                user: "xlt".into(),
                auth: AuthMethod::Password { password: "secret".into() },
            },
            tags: vec![],
            max_capacity: 2,
            enabled: true,
        }
    }

    fn local_version() -> VersionInfo {
        VersionInfo {
            codebase_version: "1.0.0".into(),
            build_time: chrono::Utc::now(),
            git_commit: "abc".into(),
            runtime_version: "rustc".into(),
            components: Default::default(),
            last_updated: chrono::Utc::now(),
        }
    }

    fn manager_with(workers: Vec<WorkerConfig>) -> Arc<DistributedManager> {
        DistributedManager::new(DistributedManagerConfig::new(local_version(), workers)).unwrap()
    }

    struct AlwaysSucceeds;
    #[async_trait]
    impl LocalCoordinator for AlwaysSucceeds {
        async fn translate(&self, text: &str, _hint: &str) -> std::result::Result<String, LocalCoordinatorError> {
            Ok(format!("local:{text}"))
        }
    }

    #[test]
    fn self_signed_opt_in_builds_a_working_client() {
        let mut config = DistributedManagerConfig::new(local_version(), vec![]);
        config.security_config.allow_self_signed = true;
        assert!(DistributedManager::new(config).is_ok());
    }

    #[test]
    fn an_unreadable_ca_bundle_fails_construction() {
        let mut config = DistributedManagerConfig::new(local_version(), vec![]);
        config.security_config.tls_ca_bundle_path = Some("/nonexistent/ca.pem".to_string());
        let err = DistributedManager::new(config).unwrap_err();
        assert!(matches!(err, DistributedError::Tls(_)));
    }

    #[tokio::test]
    async fn initializing_twice_is_an_error() {
        let manager = manager_with(vec![]);
        manager.initialize(None).await.unwrap();
        let err = manager.initialize(None).await.unwrap_err();
        assert!(matches!(err, DistributedError::AlreadyInitialized));
    }

    #[tokio::test]
    async fn mutating_methods_require_initialization_first() {
        let manager = manager_with(vec![]);
        let err = manager.add_worker(worker("w1")).await.unwrap_err();
        assert!(matches!(err, DistributedError::NotInitialized));

        let err = manager.get_status().await.unwrap_err();
        assert!(matches!(err, DistributedError::NotInitialized));
    }

    #[tokio::test]
    async fn add_remove_worker_round_trips() {
        let manager = manager_with(vec![]);
        manager.initialize(None).await.unwrap();

        manager.add_worker(worker("w1")).await.unwrap();
        let err = manager.add_worker(worker("w1")).await.unwrap_err();
        assert!(matches!(err, DistributedError::WorkerAlreadyExists(_)));

        manager.remove_worker(&WorkerId::new("w1")).await.unwrap();
        let err = manager.remove_worker(&WorkerId::new("w1")).await.unwrap_err();
        assert!(matches!(err, DistributedError::WorkerNotFound(_)));
    }

    #[tokio::test]
    async fn removing_a_worker_closes_its_ssh_pool_connection() {
        let manager = manager_with(vec![]);
        manager.initialize(None).await.unwrap();
        let w1 = worker("w1");
        manager.add_worker(w1.clone()).await.unwrap();

        manager.remove_worker(&w1.id).await.unwrap();

        let cancel = CancellationToken::new();
        let err = manager.ssh_pool.execute(&w1.id, &w1.ssh, "echo hi", &cancel).await.unwrap_err();
        assert!(matches!(err, xlt_ssh::SshError::PoolClosed { .. }));
    }

    #[tokio::test]
    async fn translate_batch_without_a_batch_capable_worker_is_an_error() {
        let manager = manager_with(vec![]);
        manager.initialize(None).await.unwrap();

        let err = manager.translate_batch(&[("hi".to_string(), "x".to_string())]).await.unwrap_err();
        assert!(matches!(err, DistributedError::BatchTranslation(_)));
    }

    #[tokio::test]
    async fn translate_distributed_falls_back_to_local_coordinator() {
        let manager = manager_with(vec![]);
        manager.initialize(Some(Arc::new(AlwaysSucceeds))).await.unwrap();

        let cancel = CancellationToken::new();
        let result = manager.translate_distributed("hi", "greeting", &cancel).await.unwrap();
        assert_eq!(result, "local:hi");
    }

    #[tokio::test]
    async fn status_reports_degraded_flag_and_worker_counts() {
        let manager = manager_with(vec![]);
        manager.initialize(None).await.unwrap();
        let status = manager.get_status().await.unwrap();
        assert_eq!(status.total_workers, 0);
        assert!(!status.degraded);
    }

    #[tokio::test]
    async fn close_then_mutating_calls_fail() {
        let manager = manager_with(vec![]);
        manager.initialize(None).await.unwrap();
        manager.close().await.unwrap();

        let err = manager.add_worker(worker("w1")).await.unwrap_err();
        assert!(matches!(err, DistributedError::Closed));

        let err = manager.close().await.unwrap_err();
        assert!(matches!(err, DistributedError::NotInitialized));
    }
}
