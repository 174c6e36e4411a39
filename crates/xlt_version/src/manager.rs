//! Version Manager (`spec.md` §4.6): version checks, signed update
//! packaging, upload/apply/verify, and backup-driven rollback.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};
use xlt_events::{Event, EventBus, EventPayload};
use xlt_protocol::defaults::{
    DEFAULT_ROLLBACK_COMPLETION_TIMEOUT, DEFAULT_UPDATE_COMPLETION_TIMEOUT, DEFAULT_UPDATE_POLL_INTERVAL,
    HEADER_BACKUP_ID, HEADER_UPDATE_VERSION,
};
use xlt_protocol::http_types::VersionResponse;
use xlt_protocol::types::{versions_compatible, BackupId, RemoteService, ServiceStatus, VersionInfo, WorkerId};

use crate::backup::BackupStore;
use crate::error::{Result, VersionError};
use crate::package::build_package;

fn base_url(service: &RemoteService) -> String {
    let scheme = match service.protocol {
        xlt_protocol::types::Protocol::Https | xlt_protocol::types::Protocol::Http3 => "https",
        xlt_protocol::types::Protocol::Http => "http",
    };
    format!("{scheme}://{}:{}", service.host, service.port)
}

/// Update-package source and signing material supplied by the caller.
pub struct UpdateMaterial<'a> {
    pub source_dir: &'a Path,
    pub package_output_dir: &'a Path,
    pub signing_key: Option<&'a rsa::RsaPrivateKey>,
}

pub struct VersionManager {
    http_client: reqwest::Client,
    local_version: VersionInfo,
    event_bus: Option<std::sync::Arc<EventBus>>,
    backups: tokio::sync::Mutex<BackupStore>,
}

impl VersionManager {
    pub fn new(
        http_client: reqwest::Client,
        local_version: VersionInfo,
        event_bus: Option<std::sync::Arc<EventBus>>,
    ) -> Self {
        Self { http_client, local_version, event_bus, backups: tokio::sync::Mutex::new(BackupStore::new()) }
    }

    fn publish(&self, payload: EventPayload) {
        if let Some(bus) = &self.event_bus {
            bus.publish(Event::new("version", "version manager state change", payload));
        }
    }

    /// GETs `/api/v1/version`, compares against the local version, and
    /// returns whether the worker is up to date.
    pub async fn check_worker_version(&self, service: &mut RemoteService) -> Result<bool> {
        let remote = self.fetch_version(&service.worker_id, service).await?;
        let up_to_date = versions_compatible(&self.local_version, &remote);
        service.version = Some(remote);
        self.publish(EventPayload::VersionChecked { worker_id: service.worker_id.clone(), up_to_date });
        Ok(up_to_date)
    }

    async fn fetch_version(&self, worker_id: &WorkerId, service: &RemoteService) -> Result<VersionInfo> {
        let url = format!("{}/api/v1/version", base_url(service));
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|source| VersionError::Http { worker_id: worker_id.clone(), source })?;
        let version: VersionResponse = response
            .json()
            .await
            .map_err(|source| VersionError::MalformedVersion { worker_id: worker_id.clone(), source })?;
        Ok(version)
    }

    async fn fetch_health_ok(&self, worker_id: &WorkerId, service: &RemoteService) -> Result<bool> {
        let url = format!("{}/health", base_url(service));
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|source| VersionError::Http { worker_id: worker_id.clone(), source })?;
        Ok(response.status().is_success())
    }

    /// Requires the worker to be up to date AND healthy.
    pub async fn validate_worker_for_work(&self, service: &mut RemoteService) -> Result<()> {
        let up_to_date = self.check_worker_version(service).await?;
        if !up_to_date {
            return Err(VersionError::VersionMismatch(service.worker_id.clone()));
        }
        let healthy = self.fetch_health_ok(&service.worker_id, service).await?;
        if !healthy {
            return Err(VersionError::HealthCheckFailed(service.worker_id.clone()));
        }
        Ok(())
    }

    /// Runs the full update sequence (`spec.md` §4.6 steps 1-7). On any
    /// failure in steps 2-5, rolls the worker back and returns the
    /// *original* error (or [`VersionError::RollbackFailed`] if rollback
    /// itself fails too).
    pub async fn update_worker(&self, service: &mut RemoteService, material: UpdateMaterial<'_>) -> Result<()> {
        let worker_id = service.worker_id.clone();
        let original_version = service
            .version
            .clone()
            .unwrap_or_else(|| self.local_version.clone());

        info!(%worker_id, "starting update to {}", self.local_version.codebase_version);
        service.status = ServiceStatus::Updating;

        let backup_path = material
            .package_output_dir
            .join(format!("{worker_id}-pre-update"))
            .to_string_lossy()
            .to_string();
        let backup_id = {
            let mut backups = self.backups.lock().await;
            backups.create(&worker_id, original_version.clone(), backup_path, None)
        };

        match self.run_update_sequence(service, &worker_id, &material).await {
            Ok(()) => {
                let mut backups = self.backups.lock().await;
                backups.mark_completed(&backup_id)?;
                service.status = ServiceStatus::Paired;
                info!(%worker_id, "update completed");
                Ok(())
            }
            Err(original_error) => {
                warn!(%worker_id, error = %original_error, "update failed, rolling back");
                self.rollback_worker_update(service, &worker_id, &backup_id, &original_version, original_error)
                    .await
            }
        }
    }

    async fn run_update_sequence(
        &self,
        service: &mut RemoteService,
        worker_id: &WorkerId,
        material: &UpdateMaterial<'_>,
    ) -> Result<()> {
        let package_path: PathBuf = material.package_output_dir.join(format!("{worker_id}-update.tar.gz"));
        let package = build_package(
            worker_id,
            material.source_dir,
            &package_path,
            &self.local_version.codebase_version,
            material.signing_key,
        )?;

        self.upload_package(worker_id, service, &package.package_path, package.signature_path.as_deref(), package.public_key_path.as_deref())
            .await?;

        self.apply_update(worker_id, service).await?;

        self.poll_until_updated(worker_id, service).await
    }

    async fn upload_package(
        &self,
        worker_id: &WorkerId,
        service: &RemoteService,
        package_path: &str,
        signature_path: Option<&str>,
        public_key_path: Option<&str>,
    ) -> Result<()> {
        let bytes = std::fs::read(package_path).map_err(|source| VersionError::PackageBuild {
            worker_id: worker_id.clone(),
            source,
        })?;
        let url = format!("{}/api/v1/update/upload", base_url(service));
        let response = self
            .http_client
            .post(&url)
            .header(HEADER_UPDATE_VERSION, &self.local_version.codebase_version)
            .body(bytes)
            .send()
            .await
            .map_err(|source| VersionError::Http { worker_id: worker_id.clone(), source })?;
        if !response.status().is_success() {
            return Err(VersionError::ApplyFailed(worker_id.clone()));
        }

        if let Some(sig_path) = signature_path {
            let sig_bytes = std::fs::read(sig_path).map_err(|source| VersionError::PackageBuild {
                worker_id: worker_id.clone(),
                source,
            })?;
            let url = format!("{}/api/v1/update/upload/signature", base_url(service));
            self.http_client
                .post(&url)
                .body(sig_bytes)
                .send()
                .await
                .map_err(|source| VersionError::Http { worker_id: worker_id.clone(), source })?;
        }

        if let Some(pub_path) = public_key_path {
            let pub_bytes = std::fs::read(pub_path).map_err(|source| VersionError::PackageBuild {
                worker_id: worker_id.clone(),
                source,
            })?;
            let url = format!("{}/api/v1/update/upload/public_key", base_url(service));
            self.http_client
                .post(&url)
                .body(pub_bytes)
                .send()
                .await
                .map_err(|source| VersionError::Http { worker_id: worker_id.clone(), source })?;
        }

        Ok(())
    }

    async fn apply_update(&self, worker_id: &WorkerId, service: &RemoteService) -> Result<()> {
        let url = format!("{}/api/v1/update/apply", base_url(service));
        let response = self
            .http_client
            .post(&url)
            .send()
            .await
            .map_err(|source| VersionError::Http { worker_id: worker_id.clone(), source })?;
        if !response.status().is_success() {
            return Err(VersionError::ApplyFailed(worker_id.clone()));
        }
        Ok(())
    }

    async fn poll_until_updated(&self, worker_id: &WorkerId, service: &mut RemoteService) -> Result<()> {
        self.poll_until(worker_id, service, DEFAULT_UPDATE_COMPLETION_TIMEOUT, |local, remote| {
            versions_compatible(local, remote)
        })
        .await
        .map_err(|_| VersionError::UpdateTimeout(worker_id.clone()))
    }

    async fn poll_until_rolled_back(
        &self,
        worker_id: &WorkerId,
        service: &mut RemoteService,
        original_version: &VersionInfo,
    ) -> std::result::Result<(), ()> {
        self.poll_until(worker_id, service, DEFAULT_ROLLBACK_COMPLETION_TIMEOUT, |_local, remote| {
            remote.codebase_version == original_version.codebase_version
        })
        .await
    }

    async fn poll_until<F>(
        &self,
        worker_id: &WorkerId,
        service: &mut RemoteService,
        timeout: Duration,
        matches: F,
    ) -> std::result::Result<(), ()>
    where
        F: Fn(&VersionInfo, &VersionInfo) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(remote) = self.fetch_version(worker_id, service).await {
                let matched = matches(&self.local_version, &remote);
                service.version = Some(remote);
                if matched {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(());
            }
            tokio::time::sleep(DEFAULT_UPDATE_POLL_INTERVAL).await;
        }
    }

    async fn rollback_worker_update(
        &self,
        service: &mut RemoteService,
        worker_id: &WorkerId,
        backup_id: &BackupId,
        original_version: &VersionInfo,
        original_error: VersionError,
    ) -> Result<()> {
        let url = format!("{}/api/v1/update/rollback", base_url(service));
        let rollback_request = self
            .http_client
            .post(&url)
            .header(HEADER_BACKUP_ID, backup_id.to_string())
            .send()
            .await;

        let rollback_outcome = match rollback_request {
            Ok(response) if response.status().is_success() => {
                self.poll_until_rolled_back(worker_id, service, original_version).await
            }
            _ => Err(()),
        };

        let mut backups = self.backups.lock().await;
        match rollback_outcome {
            Ok(()) => {
                backups.mark_rolled_back(backup_id)?;
                service.version = Some(original_version.clone());
                service.status = ServiceStatus::Paired;
                self.publish(EventPayload::UpdateRolledBack {
                    worker_id: worker_id.clone(),
                    backup_id: backup_id.clone(),
                });
                Err(original_error)
            }
            Err(()) => Err(VersionError::RollbackFailed {
                worker_id: worker_id.clone(),
                rollback_error: "rollback did not converge before the timeout".to_string(),
                original_error: original_error.to_string(),
            }),
        }
    }

    pub async fn active_backup(&self, worker_id: &WorkerId) -> Result<BackupId> {
        let backups = self.backups.lock().await;
        backups
            .active_for(worker_id)
            .map(|b| b.backup_id.clone())
            .ok_or_else(|| VersionError::NoActiveBackup(worker_id.clone()))
    }

    pub async fn cleanup_eligible_backups(&self) -> Vec<BackupId> {
        self.backups.lock().await.cleanup_eligible()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use xlt_protocol::types::{Capabilities, Protocol};

    fn version(codebase: &str) -> VersionInfo {
        let mut components = HashMap::new();
        components.insert("translator".to_string(), "1.0".to_string());
        components.insert("api".to_string(), "1.0".to_string());
        components.insert("distributed".to_string(), "1.0".to_string());
        VersionInfo {
            codebase_version: codebase.to_string(),
            build_time: Utc::now(),
            git_commit: "deadbeef".into(),
            runtime_version: "1.0".into(),
            components,
            last_updated: Utc::now(),
        }
    }

    fn service(worker_id: &str, port: u16) -> RemoteService {
        RemoteService {
            worker_id: WorkerId::new(worker_id),
            host: "127.0.0.1".into(),
            port,
            protocol: Protocol::Http,
            status: ServiceStatus::Paired,
            capabilities: Capabilities { providers: vec![], max_concurrent: 1, supports_batch: true },
            version: Some(version("v0")),
            last_seen: Utc::now(),
            paired_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn check_worker_version_detects_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(version("v-remote")))
            .mount(&server)
            .await;

        let port = server.address().port();
        let mut svc = service("w1", port);
        let manager = VersionManager::new(reqwest::Client::new(), version("v-local"), None);
        let up_to_date = manager.check_worker_version(&mut svc).await.unwrap();
        assert!(!up_to_date);
        assert_eq!(svc.version.unwrap().codebase_version, "v-remote");
    }

    #[tokio::test]
    async fn update_worker_rolls_back_and_returns_original_error_on_apply_failure() {
        let server = MockServer::start().await;
        let local = version("v1");

        Mock::given(method("POST"))
            .and(path("/api/v1/update/upload"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/update/apply"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/update/rollback"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(version("v0")))
            .mount(&server)
            .await;

        let port = server.address().port();
        let mut svc = service("w1", port);
        svc.version = Some(version("v0"));

        let manager = VersionManager::new(reqwest::Client::new(), local, None);
        let source_dir = tempfile::tempdir().unwrap();
        std::fs::write(source_dir.path().join("main.rs"), "fn main() {}").unwrap();
        let output_dir = tempfile::tempdir().unwrap();

        let material = UpdateMaterial {
            source_dir: source_dir.path(),
            package_output_dir: output_dir.path(),
            signing_key: None,
        };

        let err = manager.update_worker(&mut svc, material).await.unwrap_err();
        assert!(err.to_string().contains("failed to trigger worker update"));
        assert_eq!(svc.version.unwrap().codebase_version, "v0");
        assert_eq!(svc.status, ServiceStatus::Paired);

        let backup_id = manager
            .cleanup_eligible_backups()
            .await
            .into_iter()
            .next();
        // Freshly rolled-back backups aren't old enough to be cleanup-eligible yet;
        // assert instead that no backup remains "active" for this worker.
        assert!(backup_id.is_none());
    }
}
