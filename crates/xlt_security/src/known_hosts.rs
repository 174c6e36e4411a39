//! `known_hosts`-style host key trust store (`spec.md` §4.4 host key
//! verification). Supports both plain hostname entries and the hashed
//! `|1|salt|hash` form OpenSSH writes when `HashKnownHosts` is enabled, so a
//! file copied straight from a worker's `~/.ssh/known_hosts` is usable
//! as-is.

use std::path::Path;

use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::{Result, SecurityError};

type HmacSha1 = Hmac<Sha1>;

enum HostMatcher {
    Plain(Vec<String>),
    Hashed { salt: Vec<u8>, digest: Vec<u8> },
}

struct HostKeyEntry {
    matcher: HostMatcher,
    key_type: String,
    key_blob: Vec<u8>,
}

/// A parsed `known_hosts` file, queried by exact host and key type.
pub struct KnownHosts {
    entries: Vec<HostKeyEntry>,
}

impl KnownHosts {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(entry) = parse_line(line) {
                entries.push(entry);
            }
        }
        Self { entries }
    }

    /// True if `key_blob` (raw, not base64) is the trusted key of `key_type`
    /// recorded for any of `hosts` — callers pass both the configured
    /// hostname and the resolved IP so an entry keyed on either form is
    /// honored. A host with no entry at all is untrusted, not silently
    /// accepted.
    pub fn is_trusted(&self, hosts: &[&str], key_type: &str, key_blob: &[u8]) -> bool {
        self.entries.iter().any(|entry| {
            entry.key_type == key_type
                && entry.key_blob == key_blob
                && hosts.iter().any(|host| matches_host(&entry.matcher, host))
        })
    }

    /// Verifies trust and returns a typed error describing why the host was
    /// rejected, distinguishing "never seen this host" from "seen this host,
    /// key changed" (a more serious condition — possible MITM). `hosts` is
    /// checked as a set of equivalent lookup keys (hostname, resolved IP),
    /// not a fallback chain — an entry for either one satisfies trust.
    pub fn verify(&self, hosts: &[&str], key_type: &str, key_blob: &[u8]) -> Result<()> {
        let label = hosts.join("/");
        let host_known = self
            .entries
            .iter()
            .any(|e| hosts.iter().any(|host| matches_host(&e.matcher, host)));
        if self.is_trusted(hosts, key_type, key_blob) {
            return Ok(());
        }
        if host_known {
            return Err(SecurityError::HostKeyMismatch { host: label });
        }
        Err(SecurityError::UntrustedHostKey { host: label })
    }
}

fn parse_line(line: &str) -> Option<HostKeyEntry> {
    let mut fields = line.split_whitespace();
    let host_field = fields.next()?;
    let key_type = fields.next()?.to_string();
    let key_b64 = fields.next()?;
    let key_blob = base64::engine::general_purpose::STANDARD.decode(key_b64).ok()?;

    let matcher = if let Some(hashed) = host_field.strip_prefix("|1|") {
        let mut parts = hashed.splitn(2, '|');
        let salt_b64 = parts.next()?;
        let digest_b64 = parts.next()?;
        let salt = base64::engine::general_purpose::STANDARD.decode(salt_b64).ok()?;
        let digest = base64::engine::general_purpose::STANDARD.decode(digest_b64).ok()?;
        HostMatcher::Hashed { salt, digest }
    } else {
        HostMatcher::Plain(host_field.split(',').map(str::to_string).collect())
    };

    Some(HostKeyEntry { matcher, key_type, key_blob })
}

fn matches_host(matcher: &HostMatcher, host: &str) -> bool {
    match matcher {
        HostMatcher::Plain(patterns) => patterns.iter().any(|p| p == host || p == "*"),
        HostMatcher::Hashed { salt, digest } => {
            let mut mac = match HmacSha1::new_from_slice(salt) {
                Ok(mac) => mac,
                Err(_) => return false,
            };
            mac.update(host.as_bytes());
            mac.verify_slice(digest).is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_entry_matches_exact_host() {
        let hosts = KnownHosts::parse("worker-1.internal ssh-ed25519 QUJD\n");
        assert!(hosts.is_trusted(&["worker-1.internal"], "ssh-ed25519", b"ABC"));
    }

    #[test]
    fn unknown_host_is_rejected() {
        let hosts = KnownHosts::parse("worker-1.internal ssh-ed25519 QUJD\n");
        assert!(matches!(
            hosts.verify(&["worker-2.internal"], "ssh-ed25519", b"ABC"),
            Err(SecurityError::UntrustedHostKey { .. })
        ));
    }

    #[test]
    fn key_mismatch_is_distinguished_from_unknown_host() {
        let hosts = KnownHosts::parse("worker-1.internal ssh-ed25519 QUJD\n");
        assert!(matches!(
            hosts.verify(&["worker-1.internal"], "ssh-ed25519", b"other-key"),
            Err(SecurityError::HostKeyMismatch { .. })
        ));
    }

    #[test]
    fn hashed_entry_matches_via_hmac() {
        // Generated with: ssh-keygen -H equivalent HMAC-SHA1(salt, "worker-3.internal")
        let salt = base64::engine::general_purpose::STANDARD.encode([1u8; 20]);
        let mut mac = HmacSha1::new_from_slice(&[1u8; 20]).unwrap();
        mac.update(b"worker-3.internal");
        let digest = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
        let line = format!("|1|{}|{} ssh-ed25519 QUJD\n", salt, digest);

        let hosts = KnownHosts::parse(&line);
        assert!(hosts.is_trusted(&["worker-3.internal"], "ssh-ed25519", b"ABC"));
        assert!(!hosts.is_trusted(&["worker-4.internal"], "ssh-ed25519", b"ABC"));
    }

    #[test]
    fn entry_matches_via_either_hostname_or_resolved_ip() {
        let hosts = KnownHosts::parse("10.0.0.5 ssh-ed25519 QUJD\n");
        assert!(hosts.is_trusted(&["worker-1.internal", "10.0.0.5"], "ssh-ed25519", b"ABC"));
        assert!(!hosts.is_trusted(&["worker-1.internal", "10.0.0.9"], "ssh-ed25519", b"ABC"));
    }
}
