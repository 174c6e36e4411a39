//! Performance Layer (`spec.md` §4.8): result caching, request batching,
//! and the load-balancing strategies `xlt_coordinator` dispatches through.

pub mod balancing;
pub mod batch;
pub mod cache;

pub use balancing::{selector_for, InstanceSelector, LeastLoadedSelector, RoundRobinSelector, WeightedPrioritySelector};
pub use batch::BatchProcessor;
pub use cache::{cache_key, spawn_sweeper, ResultCache};
