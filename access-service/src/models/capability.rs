//! Capability model - named permissions such as `tickets.read`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Capabilities the service itself checks before administrative actions.
pub mod keys {
    pub const IMPERSONATION_START: &str = "impersonation.start";
    pub const TWO_FACTOR_RESET: &str = "auth.2fa_reset";
    pub const POLICIES_READ: &str = "policies.read";
    pub const POLICIES_MANAGE: &str = "policies.manage";
    pub const DEVICES_MANAGE: &str = "devices.manage";
}

/// Sensitivity tier of a capability. Drives the approval level a reviewer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sensitivity {
    Normal,
    Sensitive,
    HighlySensitive,
    Critical,
}

impl Sensitivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensitivity::Normal => "NORMAL",
            Sensitivity::Sensitive => "SENSITIVE",
            Sensitivity::HighlySensitive => "HIGHLY_SENSITIVE",
            Sensitivity::Critical => "CRITICAL",
        }
    }

    /// Unknown codes are treated as the most sensitive tier.
    pub fn parse(s: &str) -> Self {
        match s {
            "NORMAL" => Sensitivity::Normal,
            "SENSITIVE" => Sensitivity::Sensitive,
            "HIGHLY_SENSITIVE" => Sensitivity::HighlySensitive,
            _ => Sensitivity::Critical,
        }
    }

    /// Ordinal compared against `ApprovalLevel::ordinal`.
    /// HIGHLY_SENSITIVE and CRITICAL share the top tier.
    pub fn ordinal(&self) -> u8 {
        match self {
            Sensitivity::Normal => 1,
            Sensitivity::Sensitive => 2,
            Sensitivity::HighlySensitive | Sensitivity::Critical => 3,
        }
    }
}

/// Capability entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Capability {
    pub cap_id: Uuid,
    pub cap_key: String,
    pub description: Option<String>,
    pub sensitivity_code: String,
    pub requires_mfa: bool,
    pub requires_approval: bool,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

impl Capability {
    /// Create a new active capability.
    pub fn new(cap_key: impl Into<String>, sensitivity: Sensitivity) -> Self {
        Self {
            cap_id: Uuid::new_v4(),
            cap_key: cap_key.into(),
            description: None,
            sensitivity_code: sensitivity.as_str().to_string(),
            requires_mfa: false,
            requires_approval: false,
            is_active: true,
            created_utc: Utc::now(),
        }
    }

    pub fn with_mfa(mut self) -> Self {
        self.requires_mfa = true;
        self
    }

    pub fn sensitivity(&self) -> Sensitivity {
        Sensitivity::parse(&self.sensitivity_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitivity_ordinals() {
        assert_eq!(Sensitivity::Normal.ordinal(), 1);
        assert_eq!(Sensitivity::Sensitive.ordinal(), 2);
        assert_eq!(Sensitivity::HighlySensitive.ordinal(), 3);
        assert_eq!(Sensitivity::Critical.ordinal(), 3);
    }

    #[test]
    fn test_unknown_sensitivity_is_critical() {
        assert_eq!(Sensitivity::parse("whatever"), Sensitivity::Critical);
    }
}
