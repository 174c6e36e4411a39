//! CIDR-based network allowlist for worker SSH/HTTPS endpoints
//! (`spec.md` §4.4 network ACL).

use std::net::IpAddr;

use ipnet::IpNet;
use xlt_protocol::types::WorkerId;

use crate::error::{Result, SecurityError};

/// An unconfigured allowlist (`networks` empty) permits every address —
/// the ACL only restricts once an operator opts in by naming at least one
/// network.
#[derive(Debug, Clone, Default)]
pub struct NetworkAcl {
    networks: Vec<IpNet>,
}

impl NetworkAcl {
    pub fn from_patterns(patterns: &[String]) -> Result<Self> {
        let networks = patterns
            .iter()
            .map(|pattern| {
                pattern.parse::<IpNet>().map_err(|source| SecurityError::InvalidNetworkPattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { networks })
    }

    pub fn is_allowed(&self, addr: IpAddr) -> bool {
        self.networks.is_empty() || self.networks.iter().any(|net| net.contains(&addr))
    }

    pub fn check(&self, worker_id: &WorkerId, addr: IpAddr) -> Result<()> {
        if self.is_allowed(addr) {
            Ok(())
        } else {
            Err(SecurityError::NetworkNotAllowed { worker_id: worker_id.clone(), addr: addr.to_string() })
        }
    }
}
