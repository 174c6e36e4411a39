//! Canonical default values shared across the control and data plane.
//!
//! Mirrors `spec.md` §5/§6; every constant here carries the section that
//! named it so the mapping is auditable.

use std::time::Duration;

// §6 persisted state layout
pub const DEFAULT_UPDATE_DIR: &str = "/tmp/translator-updates";
pub const DEFAULT_BACKUP_DIR: &str = "/tmp/translator-backups";

// §4.3 SSH pool
pub const DEFAULT_SSH_MAX_RETRIES: u32 = 3;
pub const DEFAULT_SSH_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_SSH_CLEANUP_TICK: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SSH_MAX_IDLE_TIME: Duration = Duration::from_secs(30 * 60);

// §4.5 pairing manager
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

// §4.6 version manager
pub const DEFAULT_UPDATE_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_UPDATE_COMPLETION_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_ROLLBACK_COMPLETION_TIMEOUT: Duration = Duration::from_secs(2 * 60);
pub const DEFAULT_BACKUP_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

// §5 HTTP client timeouts
pub const DEFAULT_PROVIDERS_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_TRANSLATE_TIMEOUT: Duration = Duration::from_secs(60);

// §4.9 distributed coordinator
pub const DEFAULT_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(30);

// §4.8 performance layer
pub const DEFAULT_MAX_CACHE_SIZE: usize = 10_000;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_BATCH_SIZE: usize = 16;
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_CONNECTIONS_PER_WORKER: usize = 4;

// §4.7 fallback manager
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_BASE: Duration = Duration::from_millis(250);
pub const DEFAULT_RETRY_BACKOFF_MAX: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DEGRADATION_THRESHOLD: f64 = 0.5;
pub const DEFAULT_FAILURE_TRACKING_WINDOW: usize = 50;
pub const DEFAULT_RECOVERY_SUCCESS_THRESHOLD: u32 = 3;
pub const DEFAULT_RECOVERY_WINDOW: Duration = Duration::from_secs(120);
pub const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_CIRCUIT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CIRCUIT_SUCCESS_THRESHOLD: u32 = 2;

// HTTP header names used by the version manager's update protocol
pub const HEADER_UPDATE_VERSION: &str = "X-Update-Version";
pub const HEADER_BACKUP_ID: &str = "X-Backup-ID";
