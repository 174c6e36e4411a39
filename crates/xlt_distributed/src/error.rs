use thiserror::Error;
use xlt_protocol::types::WorkerId;

pub type Result<T> = std::result::Result<T, DistributedError>;

#[derive(Debug, Error)]
pub enum DistributedError {
    #[error("distributed manager was already initialized")]
    AlreadyInitialized,

    #[error("distributed manager has not been initialized")]
    NotInitialized,

    #[error("distributed manager has been closed")]
    Closed,

    #[error("worker {0} is not registered")]
    WorkerNotFound(WorkerId),

    #[error("worker {0} is already registered")]
    WorkerAlreadyExists(WorkerId),

    #[error("pairing failed: {0}")]
    Pairing(#[from] xlt_pairing::PairingError),

    #[error("remote instance discovery failed: {0}")]
    Discovery(#[source] xlt_coordinator::CoordinatorError),

    #[error("translation failed: {0}")]
    Translation(#[source] xlt_fallback::FallbackError<xlt_coordinator::CoordinatorError>),

    #[error("batch translation failed: {0}")]
    BatchTranslation(#[source] xlt_coordinator::CoordinatorError),

    #[error("failed to build TLS client configuration: {0}")]
    Tls(#[from] xlt_security::SecurityError),

    #[error("failed to build http client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

impl DistributedError {
    /// Configuration and lifecycle errors are caller mistakes, not
    /// transient failures the fallback machinery should retry around.
    pub fn bypasses_fallback(&self) -> bool {
        matches!(
            self,
            DistributedError::AlreadyInitialized
                | DistributedError::NotInitialized
                | DistributedError::Closed
                | DistributedError::WorkerNotFound(_)
                | DistributedError::WorkerAlreadyExists(_)
        )
    }
}
