//! Grant model - explicit per-user ADD or DENY of a capability.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// ADD extends a user's capabilities; DENY removes them and outranks
/// everything except SUPER_ADMIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantType {
    Add,
    Deny,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::Add => "ADD",
            GrantType::Deny => "DENY",
        }
    }

    /// Unknown codes are read as DENY.
    pub fn parse(s: &str) -> Self {
        match s {
            "ADD" => GrantType::Add,
            _ => GrantType::Deny,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessLevel {
    ReadOnly,
    ReadWrite,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::ReadOnly => "READ_ONLY",
            AccessLevel::ReadWrite => "READ_WRITE",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "READ_WRITE" => AccessLevel::ReadWrite,
            _ => AccessLevel::ReadOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantScope {
    Space,
    Global,
    Tenant,
}

impl GrantScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantScope::Space => "SPACE",
            GrantScope::Global => "GLOBAL",
            GrantScope::Tenant => "TENANT",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "GLOBAL" => GrantScope::Global,
            "TENANT" => GrantScope::Tenant,
            _ => GrantScope::Space,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantStatus {
    Active,
    Expired,
    Revoked,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Active => "ACTIVE",
            GrantStatus::Expired => "EXPIRED",
            GrantStatus::Revoked => "REVOKED",
        }
    }

    /// Unknown codes are read as REVOKED so they never grant access.
    pub fn parse(s: &str) -> Self {
        match s {
            "ACTIVE" => GrantStatus::Active,
            "EXPIRED" => GrantStatus::Expired,
            _ => GrantStatus::Revoked,
        }
    }
}

/// Grant entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Grant {
    pub grant_id: Uuid,
    pub user_id: Uuid,
    pub cap_id: Option<Uuid>,
    pub space_id: Option<Uuid>,
    pub grant_type_code: String,
    pub access_level_code: String,
    pub scope_code: String,
    pub status_code: String,
    pub justification: String,
    pub granted_by: Uuid,
    pub grant_request_id: Option<Uuid>,
    pub expires_utc: Option<DateTime<Utc>>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl Grant {
    /// Create a new ACTIVE grant.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: Uuid,
        cap_id: Option<Uuid>,
        space_id: Option<Uuid>,
        grant_type: GrantType,
        access_level: AccessLevel,
        scope: GrantScope,
        granted_by: Uuid,
        justification: String,
        expires_utc: Option<DateTime<Utc>>,
        created_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            grant_id: Uuid::new_v4(),
            user_id,
            cap_id,
            space_id,
            grant_type_code: grant_type.as_str().to_string(),
            access_level_code: access_level.as_str().to_string(),
            scope_code: scope.as_str().to_string(),
            status_code: GrantStatus::Active.as_str().to_string(),
            justification,
            granted_by,
            grant_request_id: None,
            expires_utc,
            revoked_utc: None,
            created_utc,
        }
    }

    pub fn grant_type(&self) -> GrantType {
        GrantType::parse(&self.grant_type_code)
    }

    pub fn access_level(&self) -> AccessLevel {
        AccessLevel::parse(&self.access_level_code)
    }

    pub fn status(&self) -> GrantStatus {
        GrantStatus::parse(&self.status_code)
    }

    /// ACTIVE and not past its expiry, whether or not the sweep has run yet.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.status() == GrantStatus::Active && self.expires_utc.map_or(true, |exp| exp > now)
    }

    /// ACTIVE but past its expiry: a candidate for the expiry sweep.
    pub fn is_due_for_expiry(&self, now: DateTime<Utc>) -> bool {
        self.status() == GrantStatus::Active && self.expires_utc.is_some_and(|exp| exp < now)
    }
}

/// Grant response for API.
#[derive(Debug, Serialize)]
pub struct GrantResponse {
    pub grant_id: Uuid,
    pub user_id: Uuid,
    pub cap_id: Option<Uuid>,
    pub space_id: Option<Uuid>,
    pub grant_type: GrantType,
    pub access_level: AccessLevel,
    pub scope_code: String,
    pub status: GrantStatus,
    pub granted_by: Uuid,
    pub grant_request_id: Option<Uuid>,
    pub expires_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl From<Grant> for GrantResponse {
    fn from(g: Grant) -> Self {
        Self {
            grant_type: g.grant_type(),
            access_level: g.access_level(),
            status: g.status(),
            grant_id: g.grant_id,
            user_id: g.user_id,
            cap_id: g.cap_id,
            space_id: g.space_id,
            scope_code: g.scope_code,
            granted_by: g.granted_by,
            grant_request_id: g.grant_request_id,
            expires_utc: g.expires_utc,
            created_utc: g.created_utc,
        }
    }
}
