//! Configuration knobs named in `spec.md` §6, with defaults matching
//! `defaults.rs`. Loading these from a config file is an external
//! collaborator's job (out of scope); these structs only need to be
//! `Deserialize` so a host application can populate them.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::types::WorkerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedConfig {
    pub enabled: bool,
    pub workers: HashMap<String, WorkerConfig>,
    #[serde(with = "humantime_duration")]
    pub ssh_timeout: Duration,
    pub ssh_max_retries: u32,
    #[serde(with = "humantime_duration")]
    pub health_check_interval: Duration,
    pub max_remote_instances: usize,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: HashMap::new(),
            ssh_timeout: Duration::from_secs(10),
            ssh_max_retries: defaults::DEFAULT_SSH_MAX_RETRIES,
            health_check_interval: defaults::DEFAULT_HEALTH_CHECK_INTERVAL,
            max_remote_instances: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub verify_host_keys: bool,
    pub known_hosts_path: Option<String>,
    pub allow_self_signed: bool,
    pub tls_client_cert_path: Option<String>,
    pub tls_client_key_path: Option<String>,
    pub tls_ca_bundle_path: Option<String>,
    pub allowed_networks: Vec<String>,
    pub audit_enabled: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            verify_host_keys: true,
            known_hosts_path: None,
            allow_self_signed: false,
            tls_client_cert_path: None,
            tls_client_key_path: None,
            tls_ca_bundle_path: None,
            allowed_networks: Vec::new(),
            audit_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    RoundRobin,
    LeastLoaded,
    WeightedPriority,
}

impl Default for LoadBalancingStrategy {
    fn default() -> Self {
        LoadBalancingStrategy::LeastLoaded
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_connections_per_worker: usize,
    #[serde(with = "humantime_duration")]
    pub connection_idle_timeout: Duration,
    #[serde(with = "humantime_duration")]
    pub connection_max_lifetime: Duration,
    pub batch_size: usize,
    #[serde(with = "humantime_duration")]
    pub batch_timeout: Duration,
    #[serde(with = "humantime_duration")]
    pub cache_ttl: Duration,
    pub max_cache_size: usize,
    pub load_balancing_strategy: LoadBalancingStrategy,
    pub failure_threshold: u32,
    #[serde(with = "humantime_duration")]
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_connections_per_worker: defaults::DEFAULT_MAX_CONNECTIONS_PER_WORKER,
            connection_idle_timeout: defaults::DEFAULT_SSH_MAX_IDLE_TIME,
            connection_max_lifetime: Duration::from_secs(4 * 60 * 60),
            batch_size: defaults::DEFAULT_BATCH_SIZE,
            batch_timeout: defaults::DEFAULT_BATCH_TIMEOUT,
            cache_ttl: defaults::DEFAULT_CACHE_TTL,
            max_cache_size: defaults::DEFAULT_MAX_CACHE_SIZE,
            load_balancing_strategy: LoadBalancingStrategy::default(),
            failure_threshold: defaults::DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            recovery_timeout: defaults::DEFAULT_CIRCUIT_RECOVERY_TIMEOUT,
            success_threshold: defaults::DEFAULT_CIRCUIT_SUCCESS_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub degradation_threshold: f64,
    #[serde(with = "humantime_duration")]
    pub retry_backoff_base: Duration,
    #[serde(with = "humantime_duration")]
    pub retry_backoff_max: Duration,
    pub jitter: bool,
    pub enable_local_fallback: bool,
    pub enable_reduced_quality: bool,
    pub enable_caching_fallback: bool,
    pub max_retries: u32,
    #[serde(with = "humantime_duration")]
    pub request_timeout: Duration,
    pub recovery_success_threshold: u32,
    #[serde(with = "humantime_duration")]
    pub recovery_window: Duration,
    pub failure_tracking_window: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            degradation_threshold: defaults::DEFAULT_DEGRADATION_THRESHOLD,
            retry_backoff_base: defaults::DEFAULT_RETRY_BACKOFF_BASE,
            retry_backoff_max: defaults::DEFAULT_RETRY_BACKOFF_MAX,
            jitter: true,
            enable_local_fallback: true,
            enable_reduced_quality: false,
            enable_caching_fallback: true,
            max_retries: defaults::DEFAULT_MAX_RETRIES,
            request_timeout: defaults::DEFAULT_REQUEST_TIMEOUT,
            recovery_success_threshold: defaults::DEFAULT_RECOVERY_SUCCESS_THRESHOLD,
            recovery_window: defaults::DEFAULT_RECOVERY_WINDOW,
            failure_tracking_window: defaults::DEFAULT_FAILURE_TRACKING_WINDOW,
        }
    }
}

/// `serde_with`-style helper so `Duration` fields can round-trip through
/// JSON/TOML as a count of milliseconds without pulling in `serde_with`
/// itself for one field shape.
mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
