use thiserror::Error;
use xlt_protocol::types::{BackupId, WorkerId};

pub type Result<T> = std::result::Result<T, VersionError>;

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("http request to worker {worker_id} failed: {source}")]
    Http { worker_id: WorkerId, #[source] source: reqwest::Error },

    #[error("worker {worker_id} returned a malformed version response: {source}")]
    MalformedVersion { worker_id: WorkerId, #[source] source: reqwest::Error },

    #[error("worker {0} failed health validation")]
    HealthCheckFailed(WorkerId),

    #[error("worker {0} is not up to date")]
    VersionMismatch(WorkerId),

    #[error("failed to build update package for worker {worker_id}: {source}")]
    PackageBuild { worker_id: WorkerId, #[source] source: std::io::Error },

    #[error("signing failed for worker {worker_id}'s update package: {source}")]
    Signing { worker_id: WorkerId, #[source] source: xlt_security::SecurityError },

    #[error("failed to trigger worker update for {0}")]
    ApplyFailed(WorkerId),

    #[error("update for worker {0} did not converge before the timeout")]
    UpdateTimeout(WorkerId),

    #[error("rollback for worker {worker_id} also failed: {rollback_error}; original error: {original_error}")]
    RollbackFailed { worker_id: WorkerId, rollback_error: String, original_error: String },

    #[error("no active backup found for worker {0}")]
    NoActiveBackup(WorkerId),

    #[error("backup {0} not found")]
    BackupNotFound(BackupId),
}

impl VersionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, VersionError::Http { .. })
    }

    pub fn bypasses_fallback(&self) -> bool {
        matches!(self, VersionError::Signing { .. } | VersionError::VersionMismatch(_))
    }
}
