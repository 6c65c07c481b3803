//! Security request model - sensitive one-off actions (forced 2FA reset)
//! that go through request, review and execute.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityRequestType {
    #[serde(rename = "TWO_FACTOR_RESET", alias = "2FA_RESET")]
    TwoFactorReset,
}

impl SecurityRequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityRequestType::TwoFactorReset => "TWO_FACTOR_RESET",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TWO_FACTOR_RESET" | "2FA_RESET" => Some(SecurityRequestType::TwoFactorReset),
            _ => None,
        }
    }

    /// Capability a reviewer or executor must hold for this request type.
    pub fn capability_key(&self) -> &'static str {
        match self {
            SecurityRequestType::TwoFactorReset => super::capability::keys::TWO_FACTOR_RESET,
        }
    }

    /// The side effect executing a request of this type has on `target_user_id`.
    pub fn effect(&self, target_user_id: Uuid) -> SecurityEffect {
        match self {
            SecurityRequestType::TwoFactorReset => SecurityEffect::ResetTwoFactor {
                user_id: target_user_id,
            },
        }
    }
}

/// Mutation applied to a user when a security request executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEffect {
    /// Clear the TOTP secret and disable 2FA.
    ResetTwoFactor { user_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityRequestStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
}

impl SecurityRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityRequestStatus::Pending => "PENDING",
            SecurityRequestStatus::Approved => "APPROVED",
            SecurityRequestStatus::Rejected => "REJECTED",
            SecurityRequestStatus::Executed => "EXECUTED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "PENDING" => SecurityRequestStatus::Pending,
            "APPROVED" => SecurityRequestStatus::Approved,
            "EXECUTED" => SecurityRequestStatus::Executed,
            _ => SecurityRequestStatus::Rejected,
        }
    }
}

/// Security request entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SecurityRequest {
    pub request_id: Uuid,
    pub request_type_code: String,
    pub requester_id: Uuid,
    pub target_user_id: Uuid,
    pub justification: String,
    pub status_code: String,
    pub approved_by: Option<Uuid>,
    pub approved_utc: Option<DateTime<Utc>>,
    pub rejected_by: Option<Uuid>,
    pub rejected_utc: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub executed_by: Option<Uuid>,
    pub executed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl SecurityRequest {
    /// Create a new PENDING request.
    pub fn new(
        request_type: SecurityRequestType,
        requester_id: Uuid,
        target_user_id: Uuid,
        justification: String,
        created_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            request_type_code: request_type.as_str().to_string(),
            requester_id,
            target_user_id,
            justification,
            status_code: SecurityRequestStatus::Pending.as_str().to_string(),
            approved_by: None,
            approved_utc: None,
            rejected_by: None,
            rejected_utc: None,
            rejection_reason: None,
            executed_by: None,
            executed_utc: None,
            created_utc,
        }
    }

    pub fn request_type(&self) -> Option<SecurityRequestType> {
        SecurityRequestType::parse(&self.request_type_code)
    }

    pub fn status(&self) -> SecurityRequestStatus {
        SecurityRequestStatus::parse(&self.status_code)
    }
}

/// Request to open a security request.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateSecurityRequest {
    pub request_type: SecurityRequestType,
    pub target_user_id: Uuid,
    #[validate(length(min = 10, message = "justification must be at least 10 characters"))]
    pub justification: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_type_codes() {
        assert_eq!(
            SecurityRequestType::parse("2FA_RESET"),
            Some(SecurityRequestType::TwoFactorReset)
        );
        assert_eq!(SecurityRequestType::parse("PASSWORD_RESET"), None);

        let parsed: SecurityRequestType = serde_json::from_str("\"2FA_RESET\"").unwrap();
        assert_eq!(parsed, SecurityRequestType::TwoFactorReset);
    }

    #[test]
    fn test_effect_targets_user() {
        let user_id = Uuid::new_v4();
        assert_eq!(
            SecurityRequestType::TwoFactorReset.effect(user_id),
            SecurityEffect::ResetTwoFactor { user_id }
        );
    }
}
