use thiserror::Error;
use xlt_protocol::types::WorkerId;

pub type Result<T> = std::result::Result<T, PairingError>;

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("ssh probe for worker {worker_id} failed: {source}")]
    ProbeFailed { worker_id: WorkerId, #[source] source: xlt_ssh::SshError },

    #[error("no https endpoint responded for worker {worker_id}")]
    NoEndpointResponded { worker_id: WorkerId },

    #[error("http request to worker {worker_id} failed: {source}")]
    Http { worker_id: WorkerId, #[source] source: reqwest::Error },

    #[error("worker {worker_id} returned a malformed capabilities payload: {source}")]
    MalformedCapabilities { worker_id: WorkerId, #[source] source: serde_json::Error },

    #[error("worker {0} is not known to the pairing manager")]
    WorkerNotFound(WorkerId),
}

impl PairingError {
    /// Transport-class errors are recoverable by the fallback manager
    /// (`spec.md` §7 category 2); protocol-shape errors get one retry
    /// (category 3); everything else surfaces immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PairingError::Http { .. } | PairingError::NoEndpointResponded { .. })
    }

    pub fn bypasses_fallback(&self) -> bool {
        matches!(self, PairingError::WorkerNotFound(_) | PairingError::ProbeFailed { .. })
    }
}
