use thiserror::Error;
use xlt_protocol::types::WorkerId;

pub type Result<T> = std::result::Result<T, SecurityError>;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("host key for {host} is not present in the known_hosts file")]
    UntrustedHostKey { host: String },

    #[error("known_hosts entry for {host} does not match the presented key")]
    HostKeyMismatch { host: String },

    #[error("worker {worker_id} address {addr} is not within an allowed network")]
    NetworkNotAllowed { worker_id: WorkerId, addr: String },

    #[error("invalid CIDR pattern {pattern}: {source}")]
    InvalidNetworkPattern { pattern: String, source: ipnet::AddrParseError },

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("rsa key error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("pkcs1 encoding error: {0}")]
    Pkcs1(#[from] rsa::pkcs1::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls configuration error: {0}")]
    Tls(String),
}
