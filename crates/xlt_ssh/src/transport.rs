//! The SSH control-plane abstraction (`spec.md` §4.3) and its production
//! implementation over `russh`. Kept behind a trait so the connection pool
//! and retry logic can be exercised in tests without a real SSH server,
//! mirroring the fake-transport pattern used throughout the pack for
//! network-backed components.

use async_trait::async_trait;
use xlt_protocol::types::{SshEndpoint, WorkerId};

use crate::error::{Result, SshError};

pub struct CommandOutput {
    pub exit_status: u32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

#[async_trait]
pub trait SshSession: Send + Sync {
    async fn execute(&self, command: &str) -> Result<CommandOutput>;
}

#[async_trait]
pub trait SshTransport: Send + Sync {
    async fn connect(&self, worker_id: &WorkerId, endpoint: &SshEndpoint) -> Result<Box<dyn SshSession>>;
}

/// Verifies the presented host key against a known-hosts trust store before
/// any channel is opened.
struct TrustingHandler {
    worker_id: WorkerId,
    known_hosts: std::sync::Arc<xlt_security::KnownHosts>,
    host: String,
    resolved_ip: Option<String>,
    verify_host_keys: bool,
}

#[async_trait]
impl russh::client::Handler for TrustingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        if !self.verify_host_keys {
            return Ok(true);
        }
        let key_type = server_public_key.algorithm().as_str();
        let key_blob = server_public_key.to_bytes().map_err(|_| russh::Error::NotAuthenticated)?;
        let mut lookup_keys = vec![self.host.as_str()];
        if let Some(ip) = &self.resolved_ip {
            if ip != &self.host {
                lookup_keys.push(ip.as_str());
            }
        }
        match self.known_hosts.verify(&lookup_keys, key_type, &key_blob) {
            Ok(()) => Ok(true),
            Err(source) => {
                tracing::warn!(worker_id = %self.worker_id, host = %self.host, "rejecting host key: {source}");
                Ok(false)
            }
        }
    }
}

pub struct RusshTransport {
    pub known_hosts: std::sync::Arc<xlt_security::KnownHosts>,
    pub verify_host_keys: bool,
    /// Empty allowlist (the default) permits every address.
    pub network_acl: std::sync::Arc<xlt_security::NetworkAcl>,
    /// `None` disables audit logging entirely.
    pub auditor: Option<std::sync::Arc<xlt_security::SecurityAuditor>>,
}

impl RusshTransport {
    pub fn new(known_hosts: std::sync::Arc<xlt_security::KnownHosts>, verify_host_keys: bool) -> Self {
        Self {
            known_hosts,
            verify_host_keys,
            network_acl: std::sync::Arc::new(xlt_security::NetworkAcl::default()),
            auditor: None,
        }
    }

    fn audit(&self, decision: &'static str, allowed: bool, worker_id: &WorkerId) {
        if let Some(auditor) = &self.auditor {
            auditor.record(xlt_security::AuditRecord::new(decision, allowed).with_field("worker_id", worker_id.to_string()));
        }
    }
}

/// Resolves `host` to its first address so the host-key check can accept a
/// `known_hosts` entry keyed on either the configured hostname or the
/// address actually dialed (`spec.md` §4.4). Best-effort: an unresolvable
/// host just means only the hostname form is checked.
async fn resolve_ip(host: &str, port: u16) -> Option<String> {
    if host.parse::<std::net::IpAddr>().is_ok() {
        return Some(host.to_string());
    }
    tokio::net::lookup_host((host, port)).await.ok()?.next().map(|addr| addr.ip().to_string())
}

struct RusshSession {
    handle: tokio::sync::Mutex<russh::client::Handle<TrustingHandler>>,
    worker_id: WorkerId,
}

#[async_trait]
impl SshSession for RusshSession {
    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        let handle = self.handle.lock().await;
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|source| SshError::Connect { worker_id: self.worker_id.clone(), source })?;
        channel
            .exec(true, command)
            .await
            .map_err(|source| SshError::Connect { worker_id: self.worker_id.clone(), source })?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = 0u32;

        loop {
            match channel.wait().await {
                Some(russh::ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                Some(russh::ChannelMsg::ExtendedData { data, .. }) => stderr.extend_from_slice(&data),
                Some(russh::ChannelMsg::ExitStatus { exit_status: status }) => exit_status = status,
                Some(russh::ChannelMsg::Eof) | Some(russh::ChannelMsg::Close) | None => break,
                _ => {}
            }
        }

        Ok(CommandOutput { exit_status, stdout, stderr })
    }
}

#[async_trait]
impl SshTransport for RusshTransport {
    async fn connect(&self, worker_id: &WorkerId, endpoint: &SshEndpoint) -> Result<Box<dyn SshSession>> {
        if let Ok(addr) = endpoint.host.parse::<std::net::IpAddr>() {
            match self.network_acl.check(worker_id, addr) {
                Ok(()) => self.audit("network_acl", true, worker_id),
                Err(source) => {
                    self.audit("network_acl", false, worker_id);
                    return Err(SshError::NetworkNotAllowed { worker_id: worker_id.clone(), source });
                }
            }
        }

        let resolved_ip = resolve_ip(&endpoint.host, endpoint.port).await;

        let config = std::sync::Arc::new(russh::client::Config::default());
        let handler = TrustingHandler {
            worker_id: worker_id.clone(),
            known_hosts: self.known_hosts.clone(),
            host: endpoint.host.clone(),
            resolved_ip,
            verify_host_keys: self.verify_host_keys,
        };

        let mut handle = russh::client::connect(config, (endpoint.host.as_str(), endpoint.port), handler)
            .await
            .map_err(|source| SshError::Connect { worker_id: worker_id.clone(), source })?;

        let authenticated = match &endpoint.auth {
            xlt_protocol::types::AuthMethod::Password { password } => handle
                .authenticate_password(&endpoint.user, password)
                .await
                .map_err(|source| SshError::Connect { worker_id: worker_id.clone(), source })?,
            xlt_protocol::types::AuthMethod::PrivateKey { key_path, passphrase } => {
                let key_pair = russh::keys::load_secret_key(key_path, passphrase.as_deref())
                    .map_err(|_| SshError::AuthFailed { worker_id: worker_id.clone() })?;
                handle
                    .authenticate_publickey(&endpoint.user, std::sync::Arc::new(key_pair))
                    .await
                    .map_err(|source| SshError::Connect { worker_id: worker_id.clone(), source })?
            }
        };

        if !authenticated.success() {
            self.audit("ssh_auth", false, worker_id);
            return Err(SshError::AuthFailed { worker_id: worker_id.clone() });
        }
        self.audit("ssh_auth", true, worker_id);

        Ok(Box::new(RusshSession { handle: tokio::sync::Mutex::new(handle), worker_id: worker_id.clone() }))
    }
}
