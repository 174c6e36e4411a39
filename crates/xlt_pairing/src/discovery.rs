//! Worker discovery: SSH liveness probe, then HTTPS capability query over a
//! short endpoint list, then a `/health` supplement (`spec.md` §4.5 step 1-4).

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use xlt_protocol::http_types::HealthResponse;
use xlt_protocol::types::{Capabilities, ProviderCapability, Protocol, RemoteService, ServiceStatus, WorkerConfig, WorkerId};

use crate::error::{PairingError, Result};

const DAEMON_PROBE_COMMAND: &str = "pgrep -f translator-daemon";
const DISCOVERY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

struct CandidateEndpoint {
    protocol: Protocol,
    port: u16,
}

/// The ordered endpoint list from `spec.md` §4.5 step 2: the first `200 OK`
/// wins.
fn candidate_endpoints() -> [CandidateEndpoint; 3] {
    [
        CandidateEndpoint { protocol: Protocol::Https, port: 8443 },
        CandidateEndpoint { protocol: Protocol::Http, port: 8080 },
        CandidateEndpoint { protocol: Protocol::Http, port: 8443 },
    ]
}

fn base_url(protocol: Protocol, host: &str, port: u16) -> String {
    let scheme = match protocol {
        Protocol::Https | Protocol::Http3 => "https",
        Protocol::Http => "http",
    };
    format!("{scheme}://{host}:{port}")
}

pub async fn discover_service(
    http_client: &reqwest::Client,
    ssh_pool: &xlt_ssh::SshConnectionPool,
    worker: &WorkerConfig,
    cancel: &CancellationToken,
) -> Result<RemoteService> {
    probe_daemon(ssh_pool, worker, cancel).await?;

    for endpoint in candidate_endpoints() {
        let base = base_url(endpoint.protocol, &worker.ssh.host, endpoint.port);
        match fetch_providers(http_client, &worker.id, &base).await {
            Ok(providers) => {
                let _ = fetch_health(http_client, &worker.id, &base).await;
                let capabilities = Capabilities {
                    providers,
                    max_concurrent: worker.max_capacity,
                    supports_batch: true,
                };
                return Ok(RemoteService {
                    worker_id: worker.id.clone(),
                    host: worker.ssh.host.clone(),
                    port: endpoint.port,
                    protocol: endpoint.protocol,
                    status: ServiceStatus::Online,
                    capabilities,
                    version: None,
                    last_seen: Utc::now(),
                    paired_at: None,
                });
            }
            Err(_) => continue,
        }
    }

    Err(PairingError::NoEndpointResponded { worker_id: worker.id.clone() })
}

async fn probe_daemon(
    ssh_pool: &xlt_ssh::SshConnectionPool,
    worker: &WorkerConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let output = ssh_pool
        .execute(&worker.id, &worker.ssh, DAEMON_PROBE_COMMAND, cancel)
        .await
        .map_err(|source| PairingError::ProbeFailed { worker_id: worker.id.clone(), source })?;
    if !output.success() {
        return Err(PairingError::ProbeFailed {
            worker_id: worker.id.clone(),
            source: xlt_ssh::SshError::CommandFailed {
                worker_id: worker.id.clone(),
                exit_status: output.exit_status,
            },
        });
    }
    Ok(())
}

async fn fetch_providers(
    http_client: &reqwest::Client,
    worker_id: &WorkerId,
    base: &str,
) -> Result<Vec<ProviderCapability>> {
    let url = format!("{base}/api/v1/providers");
    let response = http_client
        .get(&url)
        .timeout(DISCOVERY_PROBE_TIMEOUT)
        .send()
        .await
        .map_err(|source| PairingError::Http { worker_id: worker_id.clone(), source })?;
    if !response.status().is_success() {
        return Err(PairingError::NoEndpointResponded { worker_id: worker_id.clone() });
    }
    let payload: xlt_protocol::types::ProvidersPayload = response
        .json()
        .await
        .map_err(|source| PairingError::Http { worker_id: worker_id.clone(), source })?;
    Ok(payload.into_capabilities())
}

async fn fetch_health(http_client: &reqwest::Client, worker_id: &WorkerId, base: &str) -> Result<bool> {
    let url = format!("{base}/health");
    let response = http_client
        .get(&url)
        .timeout(DISCOVERY_PROBE_TIMEOUT)
        .send()
        .await
        .map_err(|source| PairingError::Http { worker_id: worker_id.clone(), source })?;
    let body: HealthResponse = response
        .json()
        .await
        .map_err(|source| PairingError::Http { worker_id: worker_id.clone(), source })?;
    Ok(body.is_healthy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use async_trait::async_trait;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use xlt_protocol::types::{AuthMethod, SshEndpoint};
    use xlt_ssh::{CommandOutput, SshConnectionPool, SshConnectionPoolConfig, SshSession, SshTransport};

    struct AlwaysUpSession;

    #[async_trait]
    impl SshSession for AlwaysUpSession {
        async fn execute(&self, _command: &str) -> xlt_ssh::Result<CommandOutput> {
            Ok(CommandOutput { exit_status: 0, stdout: Vec::new(), stderr: Vec::new() })
        }
    }

    struct FakeTransport;

    #[async_trait]
    impl SshTransport for FakeTransport {
        async fn connect(
            &self,
            _worker_id: &WorkerId,
            _endpoint: &SshEndpoint,
        ) -> xlt_ssh::Result<Box<dyn SshSession>> {
            Ok(Box::new(AlwaysUpSession))
        }
    }

    /// Binds a mock server on the `http:8080` candidate port (`spec.md`
    /// §4.5 step 2) so `discover_service` walks its real candidate list
    /// instead of being told where to look.
    async fn mock_server_on_candidate_port() -> MockServer {
        let listener = std::net::TcpListener::bind("127.0.0.1:8080")
            .expect("port 8080 free for discovery test");
        MockServer::builder().listener(listener).start().await
    }

    #[tokio::test]
    async fn discover_service_wins_on_first_responding_candidate() {
        let server = mock_server_on_candidate_port().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/providers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "providers": {"openai": {"models": ["gpt-4"]}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "healthy"})))
            .mount(&server)
            .await;

        let ssh_pool = SshConnectionPool::new(Arc::new(FakeTransport), SshConnectionPoolConfig::default());
        let http_client = reqwest::Client::new();
        let worker = WorkerConfig {
            id: WorkerId::new("w1"),
            name: "worker-1".into(),
            ssh: SshEndpoint {
                host: "127.0.0.1".into(),
                port: 22,
                user: "xlt".into(),
                auth: AuthMethod::Password { password: "secret".into() },
            },
            tags: vec![],
            max_capacity: 3,
            enabled: true,
        };

        let cancel = CancellationToken::new();
        let service = discover_service(&http_client, &ssh_pool, &worker, &cancel).await.unwrap();

        assert_eq!(service.port, 8080);
        assert_eq!(service.capabilities.providers.len(), 1);
        assert_eq!(service.capabilities.providers[0].name, "openai");
    }
}
