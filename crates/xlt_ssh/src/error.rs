use thiserror::Error;
use xlt_protocol::types::WorkerId;

pub type Result<T> = std::result::Result<T, SshError>;

#[derive(Debug, Error)]
pub enum SshError {
    #[error("failed to connect to worker {worker_id}: {source}")]
    Connect { worker_id: WorkerId, #[source] source: russh::Error },

    #[error("authentication to worker {worker_id} failed")]
    AuthFailed { worker_id: WorkerId },

    #[error("host key for worker {worker_id} was rejected: {source}")]
    UntrustedHostKey { worker_id: WorkerId, #[source] source: xlt_security::SecurityError },

    #[error("command on worker {worker_id} exited with status {exit_status}")]
    CommandFailed { worker_id: WorkerId, exit_status: u32 },

    #[error("command on worker {worker_id} was cancelled")]
    Cancelled { worker_id: WorkerId },

    #[error("network access to worker {worker_id} was denied: {source}")]
    NetworkNotAllowed { worker_id: WorkerId, #[source] source: xlt_security::SecurityError },

    #[error("connection pool for worker {worker_id} is closed")]
    PoolClosed { worker_id: WorkerId },

    #[error("channel error: {0}")]
    Channel(#[from] russh::Error),
}
