//! Shared data model, wire types, error taxonomy and configuration knobs for
//! the distributed translation coordination core.
//!
//! Every other `xlt_*` crate depends on this one; nothing in here depends on
//! any other `xlt_*` crate.

pub mod config;
pub mod defaults;
pub mod error;
pub mod http_types;
pub mod types;

pub use error::{ProtocolError, Result};
pub use types::{
    AuthMethod, BackupId, BackupStatus, Capabilities, InstanceId, Priority, ProviderCapability,
    ProvidersPayload, RemoteLLMInstance, RemoteService, ServiceStatus, SignedUpdatePackage,
    SshEndpoint, UpdateBackup, VersionInfo, WorkerConfig, WorkerId, versions_compatible,
};
