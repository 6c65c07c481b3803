//! Impersonation session model - a time-boxed admin session acting as
//! another user.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Lifetime of an impersonation session.
pub const SESSION_TTL_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpersonationStatus {
    Active,
    Ended,
    Expired,
}

impl ImpersonationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpersonationStatus::Active => "ACTIVE",
            ImpersonationStatus::Ended => "ENDED",
            ImpersonationStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ACTIVE" => ImpersonationStatus::Active,
            "EXPIRED" => ImpersonationStatus::Expired,
            _ => ImpersonationStatus::Ended,
        }
    }
}

/// Impersonation session entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ImpersonationSession {
    pub session_id: Uuid,
    pub impersonator_id: Uuid,
    pub impersonated_id: Uuid,
    pub justification: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub status_code: String,
    pub started_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
    pub ended_utc: Option<DateTime<Utc>>,
}

impl ImpersonationSession {
    /// Create a new ACTIVE session expiring `SESSION_TTL_MINUTES` from `now`.
    pub fn new(
        impersonator_id: Uuid,
        impersonated_id: Uuid,
        justification: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            impersonator_id,
            impersonated_id,
            justification,
            ip_address,
            user_agent,
            status_code: ImpersonationStatus::Active.as_str().to_string(),
            started_utc: now,
            expires_utc: now + Duration::minutes(SESSION_TTL_MINUTES),
            ended_utc: None,
        }
    }

    pub fn status(&self) -> ImpersonationStatus {
        ImpersonationStatus::parse(&self.status_code)
    }

    /// ACTIVE and not yet past its expiry.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status() == ImpersonationStatus::Active && now < self.expires_utc
    }
}

/// Request to start impersonating a user.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StartImpersonationRequest {
    pub impersonated_id: Uuid,
    #[validate(length(min = 10, message = "justification must be at least 10 characters"))]
    pub justification: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifetime() {
        let now = Utc::now();
        let session = ImpersonationSession::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "Customer support ticket".into(),
            None,
            None,
            now,
        );
        assert_eq!(session.expires_utc - session.started_utc, Duration::minutes(30));
        assert!(session.is_live(now + Duration::minutes(29)));
        assert!(!session.is_live(now + Duration::minutes(30)));
    }
}
