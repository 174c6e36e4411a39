//! Security primitives for the coordination core: SSH host key trust,
//! network allowlisting, TLS client configuration, update-package signing,
//! and security audit logging (`spec.md` §4.4).

pub mod acl;
pub mod audit;
pub mod error;
pub mod known_hosts;
pub mod signing;
pub mod tls;

pub use acl::NetworkAcl;
pub use audit::{AuditRecord, SecurityAuditor};
pub use error::{Result, SecurityError};
pub use known_hosts::KnownHosts;
pub use signing::KeyPair;
pub use tls::TlsConfigBuilder;
