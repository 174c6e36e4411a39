use thiserror::Error;
use xlt_protocol::types::{InstanceId, WorkerId};

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("http request to worker {worker_id} failed: {source}")]
    Http { worker_id: WorkerId, #[source] source: reqwest::Error },

    #[error("worker {worker_id} returned a malformed providers response: {source}")]
    MalformedProviders { worker_id: WorkerId, #[source] source: reqwest::Error },

    #[error("no remote instances available for translation")]
    NoInstancesAvailable,

    #[error("instance {0} was rate limited")]
    RateLimited(InstanceId),

    #[error("instance {instance_id}'s worker failed validation: {source}")]
    WorkerValidationFailed { instance_id: InstanceId, source: xlt_version::VersionError },

    #[error("instance {instance_id} returned an error response: {message}")]
    RemoteError { instance_id: InstanceId, message: String },

    #[error("exhausted {attempts} attempts across {instance_count} instances without success")]
    AttemptsExhausted { attempts: u32, instance_count: usize },
}

impl CoordinatorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoordinatorError::Http { .. } | CoordinatorError::RateLimited(_))
    }

    /// Rate limiting and validation failures are worker-local problems, not
    /// systemic ones; they shouldn't trip the distributed-wide fallback
    /// path on their own.
    pub fn bypasses_fallback(&self) -> bool {
        matches!(self, CoordinatorError::WorkerValidationFailed { .. })
    }
}

#[derive(Debug, Error)]
pub enum LocalCoordinatorError {
    #[error("local translation failed: {0}")]
    Failed(String),
}
