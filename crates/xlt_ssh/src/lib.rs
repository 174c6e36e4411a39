//! SSH control-plane connection pooling and command execution
//! (`spec.md` §4.3).

pub mod error;
pub mod pool;
pub mod transport;

pub use error::{Result, SshError};
pub use pool::{SshConnectionPool, SshConnectionPoolConfig};
pub use transport::{CommandOutput, RusshTransport, SshSession, SshTransport};
