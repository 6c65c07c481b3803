//! Grant request model - a user's ask for temporary access, reviewed by a
//! space approver.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::{AccessLevel, Grant, GrantScope, GrantType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl GrantRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantRequestStatus::Pending => "PENDING",
            GrantRequestStatus::Approved => "APPROVED",
            GrantRequestStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "PENDING" => GrantRequestStatus::Pending,
            "APPROVED" => GrantRequestStatus::Approved,
            _ => GrantRequestStatus::Rejected,
        }
    }
}

/// Grant request entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GrantRequest {
    pub request_id: Uuid,
    pub requester_id: Uuid,
    pub space_id: Option<Uuid>,
    pub cap_id: Option<Uuid>,
    pub justification: String,
    pub requested_days: i32,
    pub access_level_code: String,
    pub scope_code: String,
    pub status_code: String,
    pub approved_by: Option<Uuid>,
    pub approved_utc: Option<DateTime<Utc>>,
    pub rejected_by: Option<Uuid>,
    pub rejected_utc: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl GrantRequest {
    /// Create a new PENDING request from validated input.
    pub fn new(requester_id: Uuid, input: &CreateGrantRequest, created_utc: DateTime<Utc>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            requester_id,
            space_id: input.space_id,
            cap_id: input.cap_id,
            justification: input.justification.clone(),
            requested_days: input.requested_days,
            access_level_code: input.access_level.as_str().to_string(),
            scope_code: input.scope.as_str().to_string(),
            status_code: GrantRequestStatus::Pending.as_str().to_string(),
            approved_by: None,
            approved_utc: None,
            rejected_by: None,
            rejected_utc: None,
            rejection_reason: None,
            created_utc,
        }
    }

    pub fn status(&self) -> GrantRequestStatus {
        GrantRequestStatus::parse(&self.status_code)
    }

    /// The ADD grant an approval of this request materialises.
    pub fn to_grant(&self, approved_by: Uuid, now: DateTime<Utc>) -> Grant {
        let mut grant = Grant::new(
            self.requester_id,
            self.cap_id,
            self.space_id,
            GrantType::Add,
            AccessLevel::parse(&self.access_level_code),
            GrantScope::parse(&self.scope_code),
            approved_by,
            format!("Approved Request: {}", self.justification),
            Some(now + Duration::days(i64::from(self.requested_days))),
            now,
        );
        grant.grant_request_id = Some(self.request_id);
        grant
    }
}

fn default_access_level() -> AccessLevel {
    AccessLevel::ReadOnly
}

fn default_scope() -> GrantScope {
    GrantScope::Space
}

/// Request to open a grant request.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateGrantRequest {
    pub space_id: Option<Uuid>,
    pub cap_id: Option<Uuid>,
    #[validate(length(min = 10, message = "justification must be at least 10 characters"))]
    pub justification: String,
    #[validate(range(min = 1, max = 365, message = "requested_days must be between 1 and 365"))]
    pub requested_days: i32,
    #[serde(default = "default_access_level")]
    pub access_level: AccessLevel,
    #[serde(default = "default_scope")]
    pub scope: GrantScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewAction {
    Approve,
    Reject,
}

/// Reviewer decision on a pending request. Shared by grant and security requests.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewRequest {
    pub action: ReviewAction,
    pub reason: Option<String>,
}

impl ReviewRequest {
    pub fn approve() -> Self {
        Self {
            action: ReviewAction::Approve,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            action: ReviewAction::Reject,
            reason: Some(reason.into()),
        }
    }

    /// Non-blank rejection reason, if one was given.
    pub fn rejection_reason(&self) -> Option<&str> {
        self.reason.as_deref().map(str::trim).filter(|r| !r.is_empty())
    }
}

/// Grant request response for API.
#[derive(Debug, Serialize)]
pub struct GrantRequestResponse {
    pub request_id: Uuid,
    pub requester_id: Uuid,
    pub space_id: Option<Uuid>,
    pub cap_id: Option<Uuid>,
    pub justification: String,
    pub requested_days: i32,
    pub access_level_code: String,
    pub scope_code: String,
    pub status: GrantRequestStatus,
    pub approved_by: Option<Uuid>,
    pub approved_utc: Option<DateTime<Utc>>,
    pub rejected_by: Option<Uuid>,
    pub rejected_utc: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl From<GrantRequest> for GrantRequestResponse {
    fn from(r: GrantRequest) -> Self {
        Self {
            status: r.status(),
            request_id: r.request_id,
            requester_id: r.requester_id,
            space_id: r.space_id,
            cap_id: r.cap_id,
            justification: r.justification,
            requested_days: r.requested_days,
            access_level_code: r.access_level_code,
            scope_code: r.scope_code,
            approved_by: r.approved_by,
            approved_utc: r.approved_utc,
            rejected_by: r.rejected_by,
            rejected_utc: r.rejected_utc,
            rejection_reason: r.rejection_reason,
            created_utc: r.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(justification: &str, days: i32) -> CreateGrantRequest {
        CreateGrantRequest {
            space_id: None,
            cap_id: Some(Uuid::new_v4()),
            justification: justification.to_string(),
            requested_days: days,
            access_level: AccessLevel::ReadOnly,
            scope: GrantScope::Space,
        }
    }

    #[test]
    fn test_validation_bounds() {
        assert!(input("Quarterly audit", 7).validate().is_ok());
        assert!(input("too short", 7).validate().is_err());
        assert!(input("Quarterly audit", 0).validate().is_err());
        assert!(input("Quarterly audit", 366).validate().is_err());
        assert!(input("Quarterly audit", 365).validate().is_ok());
    }

    #[test]
    fn test_approval_grant_links_request() {
        let now = Utc::now();
        let request = GrantRequest::new(Uuid::new_v4(), &input("Quarterly audit", 7), now);
        let reviewer = Uuid::new_v4();
        let grant = request.to_grant(reviewer, now);

        assert_eq!(grant.grant_request_id, Some(request.request_id));
        assert_eq!(grant.grant_type(), GrantType::Add);
        assert_eq!(grant.user_id, request.requester_id);
        assert_eq!(grant.granted_by, reviewer);
        assert_eq!(grant.expires_utc, Some(now + Duration::days(7)));
        assert_eq!(grant.justification, "Approved Request: Quarterly audit");
    }

    #[test]
    fn test_blank_rejection_reason_is_none() {
        assert_eq!(ReviewRequest::reject("   ").rejection_reason(), None);
        assert_eq!(ReviewRequest::reject(" no ").rejection_reason(), Some("no"));
    }
}
