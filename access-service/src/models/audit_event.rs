//! Audit event model - append-only record of every access decision and
//! workflow transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Audit event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    CapabilityCheck,
    Grant,
    GrantRequest,
    Impersonation,
    SecurityRequest,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::CapabilityCheck => "CAPABILITY_CHECK",
            AuditEventKind::Grant => "GRANT",
            AuditEventKind::GrantRequest => "GRANT_REQUEST",
            AuditEventKind::Impersonation => "IMPERSONATION",
            AuditEventKind::SecurityRequest => "SECURITY_REQUEST",
        }
    }
}

/// Audit event entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_kind_code: String,
    pub action: String,
    pub actor_user_id: Option<Uuid>,
    pub target_id: Option<Uuid>,
    pub cap_id: Option<Uuid>,
    pub space_id: Option<Uuid>,
    pub grant_id: Option<Uuid>,
    pub result_code: Option<String>,
    pub reason_code: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub event_data: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
}

impl AuditEvent {
    /// Start an event; the `with_*` builders fill in the rest.
    pub fn new(
        kind: AuditEventKind,
        action: impl Into<String>,
        actor_user_id: Option<Uuid>,
        created_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_kind_code: kind.as_str().to_string(),
            action: action.into(),
            actor_user_id,
            target_id: None,
            cap_id: None,
            space_id: None,
            grant_id: None,
            result_code: None,
            reason_code: None,
            ip_address: None,
            user_agent: None,
            device_id: None,
            event_data: None,
            created_utc,
        }
    }

    pub fn with_target(mut self, target_id: Uuid) -> Self {
        self.target_id = Some(target_id);
        self
    }

    pub fn with_capability(mut self, cap_id: Option<Uuid>) -> Self {
        self.cap_id = cap_id;
        self
    }

    pub fn with_space(mut self, space_id: Option<Uuid>) -> Self {
        self.space_id = space_id;
        self
    }

    pub fn with_grant(mut self, grant_id: Option<Uuid>) -> Self {
        self.grant_id = grant_id;
        self
    }

    pub fn with_result(mut self, allowed: bool, reason: &str) -> Self {
        self.result_code = Some(if allowed { "ALLOWED" } else { "DENIED" }.to_string());
        self.reason_code = Some(reason.to_string());
        self
    }

    pub fn with_client(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub fn with_device(mut self, device_id: Option<String>) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn with_data(mut self, event_data: serde_json::Value) -> Self {
        self.event_data = Some(event_data);
        self
    }

    pub fn kind_is(&self, kind: AuditEventKind) -> bool {
        self.event_kind_code == kind.as_str()
    }

    pub fn is_denied(&self) -> bool {
        self.result_code.as_deref() == Some("DENIED")
    }
}
