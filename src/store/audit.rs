//! Audit sinks.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::game::events::{AuditEvent, Severity};
use crate::store::AuditSink;

/// Write an audit event to the log under the `audit` target.
pub(crate) fn trace_event(event: &AuditEvent) {
    let details = serde_json::to_string(&event.data).unwrap_or_default();
    match event.severity {
        Severity::High | Severity::Warning => warn!(
            target: "audit",
            user = %event.user_id.short(),
            event_type = event.event_type(),
            severity = ?event.severity,
            %details,
            "Audit event"
        ),
        Severity::Info => info!(
            target: "audit",
            user = %event.user_id.short(),
            event_type = event.event_type(),
            %details,
            "Audit event"
        ),
    }
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        trace_event(&event);
    }
}

/// Sink that forwards events to a bounded channel for an async writer.
///
/// A full or closed channel drops the event with a warning.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl ChannelAuditSink {
    /// Create a sink and its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn emit(&self, event: AuditEvent) {
        trace_event(&event);
        if let Err(e) = self.tx.try_send(event) {
            warn!(target: "audit", "Audit event dropped: {}", e);
        }
    }
}
