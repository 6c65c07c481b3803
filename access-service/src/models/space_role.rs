//! Space role model - roles bound to a space, carrying capabilities and an
//! optional grant-approval level.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::Sensitivity;

/// Highest sensitivity a reviewer holding this level may approve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalLevel {
    Normal,
    Sensitive,
    Critical,
}

impl ApprovalLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalLevel::Normal => "NORMAL",
            ApprovalLevel::Sensitive => "SENSITIVE",
            ApprovalLevel::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NORMAL" => Some(ApprovalLevel::Normal),
            "SENSITIVE" => Some(ApprovalLevel::Sensitive),
            "CRITICAL" => Some(ApprovalLevel::Critical),
            _ => None,
        }
    }

    pub fn ordinal(&self) -> u8 {
        match self {
            ApprovalLevel::Normal => 1,
            ApprovalLevel::Sensitive => 2,
            ApprovalLevel::Critical => 3,
        }
    }

    /// Lowest level allowed to approve access to a capability of `sensitivity`.
    pub fn required_for(sensitivity: Sensitivity) -> Self {
        match sensitivity.ordinal() {
            1 => ApprovalLevel::Normal,
            2 => ApprovalLevel::Sensitive,
            _ => ApprovalLevel::Critical,
        }
    }

    pub fn dominates(&self, sensitivity: Sensitivity) -> bool {
        self.ordinal() >= sensitivity.ordinal()
    }
}

impl std::fmt::Display for ApprovalLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Space role entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SpaceRole {
    pub role_id: Uuid,
    pub space_id: Uuid,
    pub role_label: String,
    pub can_approve_grants: bool,
    pub approve_level_code: Option<String>,
    #[sqlx(skip)]
    #[serde(default)]
    pub cap_ids: Vec<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl SpaceRole {
    /// Create a new role with no capabilities and no approval rights.
    pub fn new(space_id: Uuid, role_label: impl Into<String>) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            space_id,
            role_label: role_label.into(),
            can_approve_grants: false,
            approve_level_code: None,
            cap_ids: Vec::new(),
            created_utc: Utc::now(),
        }
    }

    pub fn with_capabilities(mut self, cap_ids: Vec<Uuid>) -> Self {
        self.cap_ids = cap_ids;
        self
    }

    pub fn with_approval(mut self, level: ApprovalLevel) -> Self {
        self.can_approve_grants = true;
        self.approve_level_code = Some(level.as_str().to_string());
        self
    }

    /// The approval level this role confers, if it may approve at all.
    pub fn approval_level(&self) -> Option<ApprovalLevel> {
        if !self.can_approve_grants {
            return None;
        }
        self.approve_level_code
            .as_deref()
            .and_then(ApprovalLevel::parse)
    }
}

/// Membership of a user in a space through a role.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserSpaceRole {
    pub user_id: Uuid,
    pub space_id: Uuid,
    pub role_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_cannot_approve_critical() {
        assert!(!ApprovalLevel::Normal.dominates(Sensitivity::Critical));
        assert!(!ApprovalLevel::Sensitive.dominates(Sensitivity::HighlySensitive));
    }

    #[test]
    fn test_critical_approves_everything() {
        for s in [
            Sensitivity::Normal,
            Sensitivity::Sensitive,
            Sensitivity::HighlySensitive,
            Sensitivity::Critical,
        ] {
            assert!(ApprovalLevel::Critical.dominates(s));
        }
    }

    #[test]
    fn test_approval_level_requires_flag() {
        let mut role = SpaceRole::new(Uuid::new_v4(), "Lead").with_approval(ApprovalLevel::Sensitive);
        assert_eq!(role.approval_level(), Some(ApprovalLevel::Sensitive));
        role.can_approve_grants = false;
        assert_eq!(role.approval_level(), None);
    }
}
