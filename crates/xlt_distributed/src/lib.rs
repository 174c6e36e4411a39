//! Distributed Manager (`spec.md` §4.10, C10): the single façade a host
//! application drives — initialize once, discover/pair workers, dispatch
//! translations, and close down cleanly.

pub mod error;
pub mod manager;
pub mod status;

pub use error::{DistributedError, Result};
pub use manager::{DistributedManager, DistributedManagerConfig, ManagerState};
pub use status::DistributedStatus;

pub use xlt_coordinator::LocalCoordinator;
