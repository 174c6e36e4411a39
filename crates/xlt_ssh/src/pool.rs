//! Per-worker SSH connection pool (`spec.md` §4.3).
//!
//! Connection creation for a given worker is serialized through that
//! worker's own mutex so two concurrent callers never race to dial the same
//! endpoint twice. A background task periodically reaps sessions idle
//! longer than `max_idle_time`. `execute` retries failed commands up to
//! `max_retries` times with a fixed delay between attempts, and aborts
//! early if the caller's `CancellationToken` fires.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use xlt_protocol::defaults;
use xlt_protocol::types::{SshEndpoint, WorkerId};

use crate::error::{Result, SshError};
use crate::transport::{CommandOutput, SshSession, SshTransport};

struct PooledEntry {
    session: Arc<dyn SshSession>,
    last_used: Instant,
}

struct WorkerSlot {
    entry: Mutex<Option<PooledEntry>>,
}

pub struct SshConnectionPoolConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_idle_time: Duration,
    pub cleanup_tick: Duration,
}

impl Default for SshConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::DEFAULT_SSH_MAX_RETRIES,
            retry_delay: defaults::DEFAULT_SSH_RETRY_DELAY,
            max_idle_time: defaults::DEFAULT_SSH_MAX_IDLE_TIME,
            cleanup_tick: defaults::DEFAULT_SSH_CLEANUP_TICK,
        }
    }
}

pub struct SshConnectionPool {
    transport: Arc<dyn SshTransport>,
    config: SshConnectionPoolConfig,
    slots: Mutex<HashMap<WorkerId, Arc<WorkerSlot>>>,
    closed_workers: Mutex<HashSet<WorkerId>>,
    cancel: CancellationToken,
}

impl SshConnectionPool {
    pub fn new(transport: Arc<dyn SshTransport>, config: SshConnectionPoolConfig) -> Arc<Self> {
        let pool = Arc::new(Self {
            transport,
            config,
            slots: Mutex::new(HashMap::new()),
            closed_workers: Mutex::new(HashSet::new()),
            cancel: CancellationToken::new(),
        });
        pool.clone().spawn_reaper();
        pool
    }

    fn spawn_reaper(self: Arc<Self>) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.cleanup_tick);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.reap_idle().await,
                }
            }
        });
    }

    async fn reap_idle(&self) {
        let slots = self.slots.lock().await;
        for (worker_id, slot) in slots.iter() {
            let mut entry = slot.entry.lock().await;
            if let Some(pooled) = entry.as_ref() {
                if pooled.last_used.elapsed() >= self.config.max_idle_time {
                    info!(%worker_id, "reaping idle ssh connection");
                    *entry = None;
                }
            }
        }
    }

    async fn slot_for(&self, worker_id: &WorkerId) -> Arc<WorkerSlot> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(worker_id.clone())
            .or_insert_with(|| Arc::new(WorkerSlot { entry: Mutex::new(None) }))
            .clone()
    }

    /// Returns an existing, not-yet-reaped session for `worker_id`, or dials
    /// a new one. Connection creation is serialized per worker by the
    /// slot's own mutex, so concurrent callers for the same worker never
    /// race to connect twice.
    async fn session_for(&self, worker_id: &WorkerId, endpoint: &SshEndpoint) -> Result<Arc<dyn SshSession>> {
        if self.closed_workers.lock().await.contains(worker_id) {
            return Err(SshError::PoolClosed { worker_id: worker_id.clone() });
        }

        let slot = self.slot_for(worker_id).await;
        let mut entry = slot.entry.lock().await;

        if let Some(pooled) = entry.as_ref() {
            return Ok(pooled.session.clone());
        }

        let session: Arc<dyn SshSession> = self.transport.connect(worker_id, endpoint).await?.into();
        *entry = Some(PooledEntry { session: session.clone(), last_used: Instant::now() });
        Ok(session)
    }

    async fn touch(&self, worker_id: &WorkerId) {
        if let Some(slot) = self.slots.lock().await.get(worker_id) {
            if let Some(pooled) = slot.entry.lock().await.as_mut() {
                pooled.last_used = Instant::now();
            }
        }
    }

    async fn evict(&self, worker_id: &WorkerId) {
        if let Some(slot) = self.slots.lock().await.get(worker_id) {
            *slot.entry.lock().await = None;
        }
    }

    /// Closes `worker_id`'s pooled session and permanently blocks future
    /// dialing to it (`spec.md` §4.3: closed on worker removal). Once
    /// closed, every subsequent `execute`/`session_for` call for this
    /// worker fails with `SshError::PoolClosed` — there is no way to
    /// re-open a closed worker short of building a new pool.
    pub async fn close_worker(&self, worker_id: &WorkerId) {
        self.evict(worker_id).await;
        self.slots.lock().await.remove(worker_id);
        self.closed_workers.lock().await.insert(worker_id.clone());
    }

    /// Executes `command` on `worker_id`, retrying on transport failure up
    /// to `max_retries` additional times with a fixed delay between
    /// attempts. A failed attempt evicts the cached session so the next
    /// attempt reconnects rather than reusing a possibly broken channel.
    pub async fn execute(
        &self,
        worker_id: &WorkerId,
        endpoint: &SshEndpoint,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        if self.closed_workers.lock().await.contains(worker_id) {
            return Err(SshError::PoolClosed { worker_id: worker_id.clone() });
        }

        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(SshError::Cancelled { worker_id: worker_id.clone() });
            }

            let result = async {
                let session = self.session_for(worker_id, endpoint).await?;
                let output = session.execute(command).await;
                self.touch(worker_id).await;
                output
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SshError::Cancelled { worker_id: worker_id.clone() }),
                outcome = result => outcome,
            };

            match outcome {
                Ok(output) => return Ok(output),
                Err(err) if attempt < self.config.max_retries => {
                    warn!(%worker_id, attempt, "ssh command failed, retrying: {err}");
                    self.evict(worker_id).await;
                    attempt += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SshError::Cancelled { worker_id: worker_id.clone() }),
                        _ = tokio::time::sleep(self.config.retry_delay) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use xlt_protocol::types::AuthMethod;

    struct FlakySession {
        failures_remaining: AtomicU32,
    }

    #[async_trait]
    impl SshSession for FlakySession {
        async fn execute(&self, _command: &str) -> Result<CommandOutput> {
            if self.failures_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(SshError::CommandFailed { worker_id: WorkerId::new("w1"), exit_status: 1 });
            }
            Ok(CommandOutput { exit_status: 0, stdout: b"ok".to_vec(), stderr: Vec::new() })
        }
    }

    struct FlakyTransport {
        connect_count: AtomicU32,
        failures_before_success: u32,
    }

    #[async_trait]
    impl SshTransport for FlakyTransport {
        async fn connect(&self, _worker_id: &WorkerId, _endpoint: &SshEndpoint) -> Result<Box<dyn SshSession>> {
            self.connect_count.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FlakySession { failures_remaining: AtomicU32::new(self.failures_before_success) }))
        }
    }

    fn endpoint() -> SshEndpoint {
        SshEndpoint {
            host: "10.0.0.1".into(),
            port: 22,
            user: "xlt".into(),
            auth: AuthMethod::Password { password: "secret".into() },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn execute_retries_up_to_max_retries_then_succeeds() {
        let transport = Arc::new(FlakyTransport { connect_count: AtomicU32::new(0), failures_before_success: 2 });
        let pool = SshConnectionPool::new(
            transport,
            SshConnectionPoolConfig { max_retries: 3, retry_delay: Duration::from_millis(10), ..Default::default() },
        );

        let worker_id = WorkerId::new("w1");
        let cancel = CancellationToken::new();
        let output = pool.execute(&worker_id, &endpoint(), "echo hi", &cancel).await.unwrap();
        assert_eq!(output.stdout, b"ok");
    }

    #[tokio::test(start_paused = true)]
    async fn execute_gives_up_after_max_retries() {
        let transport = Arc::new(FlakyTransport { connect_count: AtomicU32::new(0), failures_before_success: 100 });
        let pool = SshConnectionPool::new(
            transport,
            SshConnectionPoolConfig { max_retries: 2, retry_delay: Duration::from_millis(10), ..Default::default() },
        );

        let worker_id = WorkerId::new("w1");
        let cancel = CancellationToken::new();
        let result = pool.execute(&worker_id, &endpoint(), "echo hi", &cancel).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn closed_worker_rejects_further_connections() {
        let transport = Arc::new(FlakyTransport { connect_count: AtomicU32::new(0), failures_before_success: 0 });
        let pool = SshConnectionPool::new(transport, SshConnectionPoolConfig::default());

        let worker_id = WorkerId::new("w1");
        let cancel = CancellationToken::new();
        pool.execute(&worker_id, &endpoint(), "echo hi", &cancel).await.unwrap();

        pool.close_worker(&worker_id).await;

        let result = pool.execute(&worker_id, &endpoint(), "echo hi", &cancel).await;
        assert!(matches!(result, Err(SshError::PoolClosed { .. })));
    }

    #[tokio::test]
    async fn cancellation_aborts_before_any_attempt() {
        let transport = Arc::new(FlakyTransport { connect_count: AtomicU32::new(0), failures_before_success: 0 });
        let pool = SshConnectionPool::new(transport, SshConnectionPoolConfig::default());

        let worker_id = WorkerId::new("w1");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = pool.execute(&worker_id, &endpoint(), "echo hi", &cancel).await;
        assert!(matches!(result, Err(SshError::Cancelled { .. })));
    }
}
