//! `ExecuteWithFallback` (`spec.md` §4.7): retries the primary with the
//! spec backoff schedule, then walks the fallback list in priority order,
//! while updating the per-component circuit breaker and the process-wide
//! graceful-degradation state.
//!
//! `RequestTimeout` is enforced by the caller's own per-request client
//! timeout (every HTTP call in `xlt_coordinator`/`xlt_pairing`/`xlt_version`
//! sets `.timeout()` directly), not reimplemented here — the primary and
//! fallback closures are opaque `Future`s over a caller-chosen error type,
//! and a generic retry loop cannot synthesize a timeout error in that type.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use xlt_events::{Event, EventBus, EventPayload};
use xlt_protocol::defaults::{
    DEFAULT_CIRCUIT_FAILURE_THRESHOLD, DEFAULT_CIRCUIT_RECOVERY_TIMEOUT, DEFAULT_CIRCUIT_SUCCESS_THRESHOLD,
    DEFAULT_DEGRADATION_THRESHOLD, DEFAULT_FAILURE_TRACKING_WINDOW, DEFAULT_MAX_RETRIES,
    DEFAULT_RECOVERY_SUCCESS_THRESHOLD, DEFAULT_RECOVERY_WINDOW, DEFAULT_RETRY_BACKOFF_BASE,
    DEFAULT_RETRY_BACKOFF_MAX,
};

use crate::circuit::CircuitBreaker;
use crate::error::FallbackError;
use crate::policy::SpecBackoff;
use crate::tracker::{FailureTracker, RecoveryTracker};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A fallback candidate: a well-known name (driving `should_execute`) and
/// the operation itself.
pub struct Fallback<T, E> {
    pub name: &'static str,
    pub op: Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>,
}

impl<T, E> Fallback<T, E> {
    pub fn new<F, Fut>(name: &'static str, op: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self { name, op: Arc::new(move || Box::pin(op())) }
    }
}

#[derive(Debug, Clone)]
pub struct FallbackManagerConfig {
    pub degradation_threshold: f64,
    pub retry_backoff_base: Duration,
    pub retry_backoff_max: Duration,
    pub jitter: bool,
    pub enable_local_fallback: bool,
    pub enable_reduced_quality: bool,
    pub enable_caching_fallback: bool,
    pub max_retries: u32,
    pub recovery_success_threshold: u32,
    pub recovery_window: Duration,
    pub failure_tracking_window: usize,
    pub circuit_failure_threshold: u32,
    pub circuit_recovery_timeout: Duration,
    pub circuit_success_threshold: u32,
}

impl Default for FallbackManagerConfig {
    fn default() -> Self {
        Self {
            degradation_threshold: DEFAULT_DEGRADATION_THRESHOLD,
            retry_backoff_base: DEFAULT_RETRY_BACKOFF_BASE,
            retry_backoff_max: DEFAULT_RETRY_BACKOFF_MAX,
            jitter: true,
            enable_local_fallback: true,
            enable_reduced_quality: true,
            enable_caching_fallback: true,
            max_retries: DEFAULT_MAX_RETRIES,
            recovery_success_threshold: DEFAULT_RECOVERY_SUCCESS_THRESHOLD,
            recovery_window: DEFAULT_RECOVERY_WINDOW,
            failure_tracking_window: DEFAULT_FAILURE_TRACKING_WINDOW,
            circuit_failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            circuit_recovery_timeout: DEFAULT_CIRCUIT_RECOVERY_TIMEOUT,
            circuit_success_threshold: DEFAULT_CIRCUIT_SUCCESS_THRESHOLD,
        }
    }
}

impl From<&xlt_protocol::config::FallbackConfig> for FallbackManagerConfig {
    fn from(cfg: &xlt_protocol::config::FallbackConfig) -> Self {
        Self {
            degradation_threshold: cfg.degradation_threshold,
            retry_backoff_base: cfg.retry_backoff_base,
            retry_backoff_max: cfg.retry_backoff_max,
            jitter: cfg.jitter,
            enable_local_fallback: cfg.enable_local_fallback,
            enable_reduced_quality: cfg.enable_reduced_quality,
            enable_caching_fallback: cfg.enable_caching_fallback,
            max_retries: cfg.max_retries,
            recovery_success_threshold: cfg.recovery_success_threshold,
            recovery_window: cfg.recovery_window,
            failure_tracking_window: cfg.failure_tracking_window,
            circuit_failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            circuit_recovery_timeout: DEFAULT_CIRCUIT_RECOVERY_TIMEOUT,
            circuit_success_threshold: DEFAULT_CIRCUIT_SUCCESS_THRESHOLD,
        }
    }
}

struct ComponentState {
    tracker: FailureTracker,
    circuit: CircuitBreaker,
}

enum PrimaryOutcome<E> {
    Failed(E),
    Cancelled,
}

pub struct FallbackManager {
    config: FallbackManagerConfig,
    states: Mutex<HashMap<String, ComponentState>>,
    degraded_mode: AtomicBool,
    recovery: Mutex<RecoveryTracker>,
    event_bus: Option<Arc<EventBus>>,
}

impl FallbackManager {
    pub fn new(config: FallbackManagerConfig, event_bus: Option<Arc<EventBus>>) -> Arc<Self> {
        let recovery = RecoveryTracker::new(config.recovery_success_threshold, config.recovery_window);
        Arc::new(Self { config, states: Mutex::new(HashMap::new()), degraded_mode: AtomicBool::new(false), recovery: Mutex::new(recovery), event_bus })
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded_mode.load(Ordering::SeqCst)
    }

    fn publish(&self, payload: EventPayload) {
        if let Some(bus) = &self.event_bus {
            bus.publish(Event::new("fallback", "fallback manager state change", payload));
        }
    }

    fn should_execute_fallback(&self, name: &str) -> bool {
        let degraded = self.is_degraded();
        match name {
            "local_fallback" => self.config.enable_local_fallback || degraded,
            "reduced_quality" => self.config.enable_reduced_quality || degraded,
            "caching_fallback" => self.config.enable_caching_fallback || degraded,
            _ => true,
        }
    }

    /// `spec.md` §4.7 operation 2: attempt `primary` with backoff/retry,
    /// then walk `fallbacks` in order until one succeeds.
    pub async fn execute_with_fallback<T, E, F, Fut>(
        &self,
        component_id: &str,
        cancel: &CancellationToken,
        primary: F,
        fallbacks: Vec<Fallback<T, E>>,
    ) -> Result<T, FallbackError<E>>
    where
        T: Send + 'static,
        E: std::fmt::Display + Send + 'static,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        if cancel.is_cancelled() {
            return Err(FallbackError::Cancelled);
        }

        match self.run_primary(component_id, cancel, &primary).await {
            Ok(value) => Ok(value),
            Err(PrimaryOutcome::Cancelled) => Err(FallbackError::Cancelled),
            Err(PrimaryOutcome::Failed(primary_error)) => {
                let mut fallback_errors = Vec::new();
                for fallback in fallbacks {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if !self.should_execute_fallback(fallback.name) {
                        continue;
                    }
                    match (fallback.op)().await {
                        Ok(value) => return Ok(value),
                        Err(error) => fallback_errors.push((fallback.name.to_string(), error)),
                    }
                }
                self.publish(EventPayload::AllFallbacksFailed {
                    component_id: component_id.to_string(),
                    primary_error: primary_error.to_string(),
                });
                Err(FallbackError::AllFailed { primary_error, fallback_errors })
            }
        }
    }

    async fn run_primary<T, E, F, Fut>(
        &self,
        component_id: &str,
        cancel: &CancellationToken,
        primary: &F,
    ) -> Result<T, PrimaryOutcome<E>>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let circuit_open = {
            let mut states = self.states.lock();
            let state = self.state_for(&mut states, component_id);
            !state.circuit.allow_request(Instant::now())
        };
        let max_retries = if circuit_open { 0 } else { self.config.max_retries };
        let backoff_policy =
            SpecBackoff::new(self.config.retry_backoff_base, self.config.retry_backoff_max, self.config.jitter, max_retries);

        let retry_future = backoff::future::retry(backoff_policy, || async {
            match primary().await {
                Ok(value) => Ok(value),
                Err(e) => Err(backoff::Error::transient(e)),
            }
        });
        tokio::pin!(retry_future);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = &mut retry_future => Some(res),
        };

        match outcome {
            None => {
                self.record_outcome(component_id, false);
                Err(PrimaryOutcome::Cancelled)
            }
            Some(Ok(value)) => {
                self.record_outcome(component_id, true);
                Ok(value)
            }
            Some(Err(error)) => {
                self.record_outcome(component_id, false);
                Err(PrimaryOutcome::Failed(error))
            }
        }
    }

    fn state_for<'a>(&self, states: &'a mut HashMap<String, ComponentState>, component_id: &str) -> &'a mut ComponentState {
        states.entry(component_id.to_string()).or_insert_with(|| ComponentState {
            tracker: FailureTracker::new(self.config.failure_tracking_window),
            circuit: CircuitBreaker::new(
                self.config.circuit_failure_threshold,
                self.config.circuit_recovery_timeout,
                self.config.circuit_success_threshold,
            ),
        })
    }

    fn record_outcome(&self, component_id: &str, succeeded: bool) {
        let now = Instant::now();
        let (failure_rate, circuit_opened, circuit_closed) = {
            let mut states = self.states.lock();
            let state = self.state_for(&mut states, component_id);
            state.tracker.record(succeeded);
            let transitioned =
                if succeeded { (false, state.circuit.record_success()) } else { (state.circuit.record_failure(now), false) };
            (state.tracker.failure_rate(), transitioned.0, transitioned.1)
        };

        if circuit_opened {
            warn!(component_id, "circuit opened");
            self.publish(EventPayload::CircuitOpened { component_id: component_id.to_string() });
        }
        if circuit_closed {
            info!(component_id, "circuit closed");
            self.publish(EventPayload::CircuitClosed { component_id: component_id.to_string() });
        }

        self.update_degraded_mode(component_id, succeeded, failure_rate, now);
    }

    fn update_degraded_mode(&self, component_id: &str, succeeded: bool, failure_rate: f64, now: Instant) {
        if !self.is_degraded() {
            if failure_rate >= self.config.degradation_threshold {
                self.degraded_mode.store(true, Ordering::SeqCst);
                self.recovery.lock().reset();
                warn!(component_id, failure_rate, "entering degraded mode");
                self.publish(EventPayload::DegradedModeEntered { component_id: component_id.to_string() });
            }
        } else {
            let recovered = self.recovery.lock().record(succeeded, now);
            if recovered {
                self.degraded_mode.store(false, Ordering::SeqCst);
                info!(component_id, "exiting degraded mode");
                self.publish(EventPayload::DegradedModeExited { component_id: component_id.to_string() });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn config(max_retries: u32) -> FallbackManagerConfig {
        FallbackManagerConfig {
            degradation_threshold: 0.5,
            retry_backoff_base: Duration::from_millis(1),
            retry_backoff_max: Duration::from_millis(50),
            jitter: false,
            enable_local_fallback: false,
            enable_reduced_quality: false,
            enable_caching_fallback: false,
            max_retries,
            recovery_success_threshold: 2,
            recovery_window: Duration::from_secs(60),
            failure_tracking_window: 10,
            circuit_failure_threshold: 3,
            circuit_recovery_timeout: Duration::from_secs(30),
            circuit_success_threshold: 2,
        }
    }

    #[tokio::test]
    async fn primary_retries_until_it_succeeds() {
        let manager = FallbackManager::new(config(3), None);
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let cancel = CancellationToken::new();

        let result: Result<&str, FallbackError<String>> = manager
            .execute_with_fallback(
                "comp",
                &cancel,
                move || {
                    let attempts = attempts_clone.clone();
                    async move {
                        let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        if n < 2 {
                            Err("boom".to_string())
                        } else {
                            Ok("ok")
                        }
                    }
                },
                vec![],
            )
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn falls_back_when_primary_exhausts_retries() {
        let manager = FallbackManager::new(config(1), None);
        let cancel = CancellationToken::new();

        let result = manager
            .execute_with_fallback(
                "comp",
                &cancel,
                || async { Err::<&str, String>("primary down".to_string()) },
                vec![Fallback::new("named_fallback", || async { Ok::<&str, String>("fallback result") })],
            )
            .await;

        assert_eq!(result.unwrap(), "fallback result");
    }

    #[tokio::test]
    async fn unnamed_and_named_fallbacks_respect_enable_flags() {
        let manager = FallbackManager::new(config(0), None);
        let cancel = CancellationToken::new();

        let result = manager
            .execute_with_fallback(
                "comp",
                &cancel,
                || async { Err::<&str, String>("primary down".to_string()) },
                vec![
                    Fallback::new("local_fallback", || async { Ok::<&str, String>("should be skipped") }),
                    Fallback::new("always_on", || async { Ok::<&str, String>("ran") }),
                ],
            )
            .await;

        assert_eq!(result.unwrap(), "ran");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_without_calling_primary() {
        let manager = FallbackManager::new(config(2), None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let called = Arc::new(AtomicU32::new(0));
        let called_clone = called.clone();

        let result = manager
            .execute_with_fallback(
                "comp",
                &cancel,
                move || {
                    let called = called_clone.clone();
                    async move {
                        called.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        Ok::<&str, String>("unreachable")
                    }
                },
                vec![],
            )
            .await;

        assert!(matches!(result, Err(FallbackError::Cancelled)));
        assert_eq!(called.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn enters_and_exits_degraded_mode() {
        let manager = FallbackManager::new(config(0), None);
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let _ = manager
                .execute_with_fallback("comp", &cancel, || async { Err::<&str, String>("down".to_string()) }, vec![])
                .await;
        }
        assert!(manager.is_degraded());

        for _ in 0..2 {
            let _ = manager.execute_with_fallback("comp", &cancel, || async { Ok::<&str, String>("up") }, vec![]).await;
        }
        assert!(!manager.is_degraded());
    }
}
