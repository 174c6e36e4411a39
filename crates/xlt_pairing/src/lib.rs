//! Worker discovery, pairing state machine and health-check loop
//! (`spec.md` §4.5).

pub mod discovery;
pub mod error;
pub mod health;
pub mod manager;
pub mod registry;

pub use error::{PairingError, Result};
pub use manager::PairingManager;
pub use registry::ServiceRegistry;
