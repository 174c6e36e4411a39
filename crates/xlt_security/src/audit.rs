//! Structured audit logging for security-relevant decisions (`spec.md`
//! §4.4, §9 Design Note on free-form audit data). Unlike the typed
//! [`xlt_events::EventPayload`] bus, audit records carry an open string map
//! because the set of fields worth recording varies by decision kind —
//! this is the one place in the core that free-form data is appropriate.

use std::collections::HashMap;

use tracing::{info, warn};

/// One security decision worth a durable trail: host key trust, network
/// ACL evaluation, signature verification, TLS identity checks.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub decision: &'static str,
    pub allowed: bool,
    pub fields: HashMap<String, String>,
}

impl AuditRecord {
    pub fn new(decision: &'static str, allowed: bool) -> Self {
        Self { decision, allowed, fields: HashMap::new() }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Emits [`AuditRecord`]s as structured tracing events when enabled.
/// Disabled auditors are a silent no-op rather than a conditional at every
/// call site.
pub struct SecurityAuditor {
    enabled: bool,
}

impl SecurityAuditor {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn record(&self, record: AuditRecord) {
        if !self.enabled {
            return;
        }
        let fields = serde_json::to_string(&record.fields).unwrap_or_default();
        if record.allowed {
            info!(decision = record.decision, allowed = true, fields = %fields, "security decision");
        } else {
            warn!(decision = record.decision, allowed = false, fields = %fields, "security decision denied");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_auditor_does_not_panic_on_record() {
        let auditor = SecurityAuditor::new(false);
        auditor.record(AuditRecord::new("host_key_check", true));
    }

    #[test]
    fn record_carries_arbitrary_fields() {
        let record = AuditRecord::new("network_acl", false).with_field("worker_id", "w1");
        assert_eq!(record.fields.get("worker_id"), Some(&"w1".to_string()));
    }
}
