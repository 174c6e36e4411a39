//! `GetStatus` aggregate (`spec.md` §4.10).

use xlt_protocol::types::ServiceStatus;

#[derive(Debug, Clone)]
pub struct DistributedStatus {
    pub total_workers: usize,
    pub online_workers: usize,
    pub paired_workers: usize,
    pub remote_instance_count: usize,
    pub degraded: bool,
}

impl DistributedStatus {
    pub fn from_services(services: &[xlt_protocol::types::RemoteService], remote_instance_count: usize, degraded: bool) -> Self {
        let online_workers = services.iter().filter(|s| s.status != ServiceStatus::Unknown && s.status != ServiceStatus::Offline).count();
        let paired_workers = services.iter().filter(|s| s.status == ServiceStatus::Paired).count();
        Self { total_workers: services.len(), online_workers, paired_workers, remote_instance_count, degraded }
    }
}
