//! Core domain entities shared across the coordination core.
//!
//! Identifiers are newtypes rather than bare `String`/`u64` so that, for
//! example, a `WorkerId` cannot be passed where a `BackupId` is expected.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Critical components whose version must match pairwise for two
/// `VersionInfo` records to be considered compatible.
pub const CRITICAL_COMPONENTS: &[&str] = &["translator", "api", "distributed"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupId(pub String);

impl BackupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for BackupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SSH credential for a worker. At least one of `key_path` / `password` must
/// be present — enforced by `WorkerConfig::validate`, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuthMethod {
    PrivateKey { key_path: String, passphrase: Option<String> },
    Password { password: String },
}

/// SSH control-plane endpoint for a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: AuthMethod,
}

/// Immutable-after-registration worker configuration.
///
/// Invariant: `id` unique within a fleet; enforced by the owning registry
/// (`xlt_distributed`), not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub id: WorkerId,
    pub name: String,
    pub ssh: SshEndpoint,
    pub tags: Vec<String>,
    pub max_capacity: u32,
    pub enabled: bool,
}

impl WorkerConfig {
    /// Checks the single data-level invariant this type owns: at least one
    /// auth credential is present and non-empty.
    pub fn validate(&self) -> Result<(), crate::error::ProtocolError> {
        let ok = match &self.ssh.auth {
            AuthMethod::PrivateKey { key_path, .. } => !key_path.is_empty(),
            AuthMethod::Password { password } => !password.is_empty(),
        };
        if !ok {
            return Err(crate::error::ProtocolError::InvalidWorkerConfig {
                worker_id: self.id.clone(),
                reason: "missing auth credential".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Unknown,
    Online,
    Offline,
    Paired,
    Updating,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCapability {
    pub name: String,
    pub models: Vec<String>,
}

/// Accepts both shapes the `/api/v1/providers` endpoint is documented to
/// return (`spec.md` §6 / §9): an object keyed by provider name, or an
/// array of `{name, models}` objects. Unknown shapes are rejected by serde
/// at deserialization time rather than probed at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProvidersPayload {
    Object {
        providers: HashMap<String, ProviderModels>,
    },
    Array {
        providers: Vec<ProviderCapability>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderModels {
    pub models: Vec<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ProvidersPayload {
    /// Normalizes either wire shape into a flat, order-stable list.
    pub fn into_capabilities(self) -> Vec<ProviderCapability> {
        match self {
            ProvidersPayload::Array { providers } => providers,
            ProvidersPayload::Object { providers } => {
                let mut names: Vec<_> = providers.into_iter().collect();
                names.sort_by(|a, b| a.0.cmp(&b.0));
                names
                    .into_iter()
                    .map(|(name, models)| ProviderCapability {
                        name,
                        models: models.models,
                    })
                    .collect()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub providers: Vec<ProviderCapability>,
    pub max_concurrent: u32,
    pub supports_batch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteService {
    pub worker_id: WorkerId,
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub status: ServiceStatus,
    pub capabilities: Capabilities,
    pub version: Option<VersionInfo>,
    pub last_seen: DateTime<Utc>,
    pub paired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Http3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub codebase_version: String,
    pub build_time: DateTime<Utc>,
    pub git_commit: String,
    pub runtime_version: String,
    pub components: HashMap<String, String>,
    pub last_updated: DateTime<Utc>,
}

/// Two versions are compatible iff `codebase_version` matches and every
/// critical component matches pairwise. A component missing from either
/// side counts as a mismatch (see DESIGN.md, Open Question 1).
pub fn versions_compatible(local: &VersionInfo, remote: &VersionInfo) -> bool {
    if local.codebase_version != remote.codebase_version {
        return false;
    }
    CRITICAL_COMPONENTS.iter().all(|component| {
        match (local.components.get(*component), remote.components.get(*component)) {
            (Some(l), Some(r)) => l == r,
            _ => false,
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low = 1,
    Medium = 5,
    High = 10,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLLMInstance {
    pub id: InstanceId,
    pub worker_id: WorkerId,
    pub provider: String,
    pub model: String,
    pub priority: Priority,
    pub available: bool,
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Created,
    Active,
    Completed,
    RolledBack,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedUpdatePackage {
    pub package_path: String,
    pub signature_path: Option<String>,
    pub public_key_path: Option<String>,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBackup {
    pub worker_id: WorkerId,
    pub backup_id: BackupId,
    pub timestamp: DateTime<Utc>,
    pub original_version: VersionInfo,
    pub backup_path: String,
    pub update_package: Option<SignedUpdatePackage>,
    pub status: BackupStatus,
}
