//! TLS client configuration for the HTTPS data plane (`spec.md` §4.4).
//!
//! Builds a `rustls::ClientConfig` from a [`xlt_protocol::config::SecurityConfig`]:
//! system/webpki roots by default, an operator-supplied CA bundle when one is
//! configured, optional mutual TLS, and an explicit (never implicit)
//! opt-in to accept self-signed certificates for lab/dev fleets.

use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::ClientConfig;

use crate::error::{Result, SecurityError};

pub struct TlsConfigBuilder {
    ca_bundle_path: Option<String>,
    client_cert_path: Option<String>,
    client_key_path: Option<String>,
    allow_self_signed: bool,
}

impl TlsConfigBuilder {
    pub fn new() -> Self {
        Self {
            ca_bundle_path: None,
            client_cert_path: None,
            client_key_path: None,
            allow_self_signed: false,
        }
    }

    pub fn ca_bundle(mut self, path: Option<String>) -> Self {
        self.ca_bundle_path = path;
        self
    }

    pub fn client_identity(mut self, cert_path: Option<String>, key_path: Option<String>) -> Self {
        self.client_cert_path = cert_path;
        self.client_key_path = key_path;
        self
    }

    pub fn allow_self_signed(mut self, allow: bool) -> Self {
        self.allow_self_signed = allow;
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        let builder = ClientConfig::builder();

        let builder = if self.allow_self_signed {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        } else {
            let root_store = self.build_root_store()?;
            builder.with_root_certificates(root_store)
        };

        let config = match (&self.client_cert_path, &self.client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let certs = load_certs(cert_path)?;
                let key = load_private_key(key_path)?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| SecurityError::Tls(e.to_string()))?
            }
            _ => builder.with_no_client_auth(),
        };

        Ok(config)
    }

    fn build_root_store(&self) -> Result<rustls::RootCertStore> {
        let mut root_store = rustls::RootCertStore::empty();
        match &self.ca_bundle_path {
            Some(path) => {
                for cert in load_certs(path)? {
                    root_store
                        .add(cert)
                        .map_err(|e| SecurityError::Tls(format!("invalid CA certificate: {e}")))?;
                }
            }
            None => {
                root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }
        }
        Ok(root_store)
    }
}

impl Default for TlsConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn load_certs(path: impl AsRef<Path>) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path.as_ref())?);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SecurityError::Tls(format!("failed to parse certificate file: {e}")))
}

fn load_private_key(path: impl AsRef<Path>) -> Result<PrivateKeyDer<'static>> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path.as_ref())?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| SecurityError::Tls(format!("failed to parse private key file: {e}")))?
        .ok_or_else(|| SecurityError::Tls("no private key found in file".to_string()))
}

/// Accepts any server certificate without validation. Only reachable when an
/// operator explicitly sets `allow_self_signed = true` in [`SecurityConfig`];
/// never the default.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_builder_uses_webpki_roots_without_error() {
        let config = TlsConfigBuilder::new().build();
        assert!(config.is_ok());
    }

    #[test]
    fn self_signed_opt_in_builds_a_config() {
        let config = TlsConfigBuilder::new().allow_self_signed(true).build();
        assert!(config.is_ok());
    }

    #[test]
    fn missing_ca_bundle_file_is_an_error() {
        let config = TlsConfigBuilder::new().ca_bundle(Some("/nonexistent/ca.pem".to_string())).build();
        assert!(config.is_err());
    }
}
