//! Communication audit trail.
//!
//! The ACL reports every sent and received message here. Sinks must never block
//! or fail the caller.

use crate::protocol::AclMessage;

/// Receiver of communication audit records.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &str, msg: &AclMessage);
}

/// Writes audit records as tracing events on the `audit` target.
#[derive(Debug, Default, Clone)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, event: &str, msg: &AclMessage) {
        tracing::info!(
            target: "audit",
            event,
            sender = msg.sender,
            receiver = msg.receiver,
            protocol = msg.protocol,
            "{}",
            msg
        );
    }
}

/// Drops every record.
#[derive(Debug, Default, Clone)]
pub struct NoAudit;

impl AuditSink for NoAudit {
    fn record(&self, _event: &str, _msg: &AclMessage) {}
}
