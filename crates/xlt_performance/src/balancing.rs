//! Load-balancing strategies (`spec.md` §4.8), decoupled from
//! `xlt_coordinator` behind the [`InstanceSelector`] trait so the
//! coordinator never needs to know which policy is active.

use std::sync::atomic::{AtomicUsize, Ordering};

use xlt_protocol::config::LoadBalancingStrategy;
use xlt_protocol::types::RemoteLLMInstance;

/// Picks one available instance out of a candidate slice. Implementors
/// only see instances that have already passed availability/worker-health
/// filtering upstream.
pub trait InstanceSelector: Send + Sync {
    fn select<'a>(&self, candidates: &'a [RemoteLLMInstance]) -> Option<&'a RemoteLLMInstance>;
}

pub struct RoundRobinSelector {
    index: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self { index: AtomicUsize::new(0) }
    }
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceSelector for RoundRobinSelector {
    fn select<'a>(&self, candidates: &'a [RemoteLLMInstance]) -> Option<&'a RemoteLLMInstance> {
        if candidates.is_empty() {
            return None;
        }
        let i = self.index.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates.get(i)
    }
}

#[derive(Default)]
pub struct LeastLoadedSelector;

impl InstanceSelector for LeastLoadedSelector {
    fn select<'a>(&self, candidates: &'a [RemoteLLMInstance]) -> Option<&'a RemoteLLMInstance> {
        candidates.iter().min_by_key(|i| i.last_used.map(|t| t.timestamp()).unwrap_or(i64::MIN))
    }
}

#[derive(Default)]
pub struct WeightedPrioritySelector {
    round_robin: RoundRobinSelector,
}

impl InstanceSelector for WeightedPrioritySelector {
    fn select<'a>(&self, candidates: &'a [RemoteLLMInstance]) -> Option<&'a RemoteLLMInstance> {
        let highest = candidates.iter().map(|i| i.priority).max()?;
        let top_tier: Vec<&RemoteLLMInstance> = candidates.iter().filter(|i| i.priority == highest).collect();
        let i = self.round_robin.index.fetch_add(1, Ordering::Relaxed) % top_tier.len();
        top_tier.get(i).copied()
    }
}

/// Builds the selector named by a [`LoadBalancingStrategy`].
pub fn selector_for(strategy: LoadBalancingStrategy) -> Box<dyn InstanceSelector> {
    match strategy {
        LoadBalancingStrategy::RoundRobin => Box::new(RoundRobinSelector::new()),
        LoadBalancingStrategy::LeastLoaded => Box::new(LeastLoadedSelector),
        LoadBalancingStrategy::WeightedPriority => Box::new(WeightedPrioritySelector::default()),
    }
}
