//! Errors raised while building or validating shared protocol types.
//!
//! This is deliberately narrow — most of the error taxonomy from `spec.md`
//! §7 lives in the crate that owns the behavior (`xlt_ssh::SshError`,
//! `xlt_version::VersionError`, etc). This enum only covers malformed data
//! at the model layer.

use thiserror::Error;

use crate::types::WorkerId;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid worker config for {worker_id}: {reason}")]
    InvalidWorkerConfig { worker_id: WorkerId, reason: String },

    #[error("malformed providers payload: {0}")]
    MalformedProvidersPayload(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
