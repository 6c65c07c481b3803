//! Audit recorder - best-effort, bounded writes of audit events.
//!
//! A failed or slow audit write is logged and dropped; it never changes the
//! outcome of the operation being audited.

use std::sync::Arc;
use std::time::Duration;

use super::store::AccessStore;
use crate::models::AuditEvent;

#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AccessStore>,
    timeout: Duration,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AccessStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Write an audit event, waiting at most the configured timeout.
    pub async fn record(&self, event: AuditEvent) {
        match tokio::time::timeout(self.timeout, self.store.insert_audit_event(&event)).await {
            Ok(Ok(())) => {
                tracing::debug!(
                    event_id = %event.event_id,
                    kind = %event.event_kind_code,
                    action = %event.action,
                    "Audit event recorded"
                );
            }
            Ok(Err(e)) => {
                tracing::error!(
                    error = %e,
                    kind = %event.event_kind_code,
                    action = %event.action,
                    actor_user_id = ?event.actor_user_id,
                    "Failed to record audit event"
                );
            }
            Err(_) => {
                tracing::error!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    kind = %event.event_kind_code,
                    action = %event.action,
                    "Audit write timed out"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditEventKind;
    use crate::services::memory::MemoryStore;
    use chrono::Utc;

    #[tokio::test]
    async fn test_record_writes_event() {
        let store = Arc::new(MemoryStore::new());
        let recorder = AuditRecorder::new(store.clone(), Duration::from_secs(1));
        recorder
            .record(AuditEvent::new(AuditEventKind::Grant, "GRANT_REVOKED", None, Utc::now()))
            .await;
        assert_eq!(store.audit_events().len(), 1);
    }

    #[tokio::test]
    async fn test_record_swallows_store_failure() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_audit(true);
        let recorder = AuditRecorder::new(store.clone(), Duration::from_secs(1));
        recorder
            .record(AuditEvent::new(AuditEventKind::Grant, "GRANT_REVOKED", None, Utc::now()))
            .await;
        assert!(store.audit_events().is_empty());
    }
}
