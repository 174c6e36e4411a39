//! Fallback Manager (`spec.md` §4.7): retry/backoff, per-component circuit
//! breaking, and graceful degradation for every remote call the
//! coordination core makes.

pub mod circuit;
pub mod error;
pub mod manager;
pub mod policy;
pub mod tracker;

pub use circuit::{CircuitBreaker, CircuitState};
pub use error::FallbackError;
pub use manager::{BoxFuture, Fallback, FallbackManager, FallbackManagerConfig};
pub use policy::SpecBackoff;
pub use tracker::{FailureTracker, RecoveryTracker};
