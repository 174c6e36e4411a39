//! In-memory backup tracking for worker updates (`spec.md` §3, §4.6).
//!
//! At most one backup per worker is `Active` at a time; anything older than
//! [`xlt_protocol::defaults::DEFAULT_BACKUP_RETENTION`] that isn't `Active`
//! is eligible for cleanup.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;
use xlt_protocol::defaults::DEFAULT_BACKUP_RETENTION;
use xlt_protocol::types::{BackupId, BackupStatus, SignedUpdatePackage, UpdateBackup, VersionInfo, WorkerId};

use crate::error::{Result, VersionError};

#[derive(Default)]
pub struct BackupStore {
    backups: HashMap<BackupId, UpdateBackup>,
}

impl BackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `Active` backup for `worker_id`. Any previously active
    /// backup for the same worker is left untouched by this call; callers
    /// transition it out of `Active` explicitly via `mark_completed` /
    /// `mark_rolled_back` before a new update begins.
    pub fn create(
        &mut self,
        worker_id: &WorkerId,
        original_version: VersionInfo,
        backup_path: String,
        update_package: Option<SignedUpdatePackage>,
    ) -> BackupId {
        let backup_id = BackupId::new(Uuid::new_v4().to_string());
        let backup = UpdateBackup {
            worker_id: worker_id.clone(),
            backup_id: backup_id.clone(),
            timestamp: Utc::now(),
            original_version,
            backup_path,
            update_package,
            status: BackupStatus::Active,
        };
        self.backups.insert(backup_id.clone(), backup);
        backup_id
    }

    pub fn get(&self, backup_id: &BackupId) -> Option<&UpdateBackup> {
        self.backups.get(backup_id)
    }

    /// The single active backup for a worker, if any (`spec.md` §3: at most
    /// one `active` backup per worker).
    pub fn active_for(&self, worker_id: &WorkerId) -> Option<&UpdateBackup> {
        self.backups
            .values()
            .find(|b| &b.worker_id == worker_id && b.status == BackupStatus::Active)
    }

    pub fn mark_completed(&mut self, backup_id: &BackupId) -> Result<()> {
        self.set_status(backup_id, BackupStatus::Completed)
    }

    pub fn mark_rolled_back(&mut self, backup_id: &BackupId) -> Result<()> {
        self.set_status(backup_id, BackupStatus::RolledBack)
    }

    fn set_status(&mut self, backup_id: &BackupId, status: BackupStatus) -> Result<()> {
        let backup = self
            .backups
            .get_mut(backup_id)
            .ok_or_else(|| VersionError::BackupNotFound(backup_id.clone()))?;
        backup.status = status;
        Ok(())
    }

    /// Backups older than the retention window that are not `Active`,
    /// eligible for cleanup (`spec.md` §4.6 final sentence). Does not
    /// remove them; callers decide how cleanup actually happens.
    pub fn cleanup_eligible(&self) -> Vec<BackupId> {
        let cutoff = Utc::now() - chrono::Duration::from_std(DEFAULT_BACKUP_RETENTION).unwrap();
        self.backups
            .values()
            .filter(|b| b.status != BackupStatus::Active && b.timestamp < cutoff)
            .map(|b| b.backup_id.clone())
            .collect()
    }

    pub fn remove(&mut self, backup_id: &BackupId) {
        self.backups.remove(backup_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version() -> VersionInfo {
        VersionInfo {
            codebase_version: "v1".into(),
            build_time: Utc::now(),
            git_commit: "deadbeef".into(),
            runtime_version: "1.0".into(),
            components: HashMap::new(),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn create_backup_is_active_and_retrievable() {
        let mut store = BackupStore::new();
        let worker = WorkerId::new("w1");
        let id = store.create(&worker, version(), "/tmp/backup".into(), None);
        let backup = store.get(&id).unwrap();
        assert_eq!(backup.status, BackupStatus::Active);
        assert_eq!(store.active_for(&worker).unwrap().backup_id, id);
    }

    #[test]
    fn marking_completed_clears_active_lookup() {
        let mut store = BackupStore::new();
        let worker = WorkerId::new("w1");
        let id = store.create(&worker, version(), "/tmp/backup".into(), None);
        store.mark_completed(&id).unwrap();
        assert!(store.active_for(&worker).is_none());
        assert_eq!(store.get(&id).unwrap().status, BackupStatus::Completed);
    }

    #[test]
    fn unknown_backup_id_is_an_error() {
        let mut store = BackupStore::new();
        let bogus = BackupId::new("missing");
        assert!(store.mark_completed(&bogus).is_err());
    }

    #[test]
    fn active_backups_are_never_cleanup_eligible() {
        let mut store = BackupStore::new();
        let worker = WorkerId::new("w1");
        let id = store.create(&worker, version(), "/tmp/backup".into(), None);
        if let Some(b) = store.backups.get_mut(&id) {
            b.timestamp = Utc::now() - chrono::Duration::hours(48);
        }
        assert!(store.cleanup_eligible().is_empty());
    }

    #[test]
    fn completed_backups_older_than_retention_are_cleanup_eligible() {
        let mut store = BackupStore::new();
        let worker = WorkerId::new("w1");
        let id = store.create(&worker, version(), "/tmp/backup".into(), None);
        store.mark_completed(&id).unwrap();
        if let Some(b) = store.backups.get_mut(&id) {
            b.timestamp = Utc::now() - chrono::Duration::hours(48);
        }
        assert_eq!(store.cleanup_eligible(), vec![id]);
    }
}
