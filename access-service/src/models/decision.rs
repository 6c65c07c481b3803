//! Access decision model.
//!
//! Denials are data, never errors: every check returns a `Decision` carrying
//! a machine-readable `Reason` and the English message shown to end users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccessLevel, PolicyKind};

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    SuperAdmin,
    AddGrant,
    RoleCapability,
    NoPermission,
    DenyGrant,
    CapabilityNotFound,
    CapabilityInactive,
    MfaNotEnabled,
    MfaNotVerified,
    MfaExpired,
    IpNotAllowed,
    DeviceNotTrusted,
    TimeRestriction,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::SuperAdmin => "SUPER_ADMIN",
            Reason::AddGrant => "ADD_GRANT",
            Reason::RoleCapability => "ROLE_CAPABILITY",
            Reason::NoPermission => "NO_PERMISSION",
            Reason::DenyGrant => "DENY_GRANT",
            Reason::CapabilityNotFound => "CAPABILITY_NOT_FOUND",
            Reason::CapabilityInactive => "CAPABILITY_INACTIVE",
            Reason::MfaNotEnabled => "MFA_NOT_ENABLED",
            Reason::MfaNotVerified => "MFA_NOT_VERIFIED",
            Reason::MfaExpired => "MFA_EXPIRED",
            Reason::IpNotAllowed => "IP_NOT_ALLOWED",
            Reason::DeviceNotTrusted => "DEVICE_NOT_TRUSTED",
            Reason::TimeRestriction => "TIME_RESTRICTION",
        }
    }

    /// User-facing message.
    pub fn message(&self) -> &'static str {
        match self {
            Reason::SuperAdmin => "Access granted: super administrator",
            Reason::AddGrant => "Access granted by an explicit grant",
            Reason::RoleCapability => "Access granted by your role in this space",
            Reason::NoPermission => "You do not have permission to perform this action",
            Reason::DenyGrant => "Your access to this action has been explicitly revoked",
            Reason::CapabilityNotFound => "The requested capability does not exist",
            Reason::CapabilityInactive => "This capability is currently disabled",
            Reason::MfaNotEnabled => {
                "Two-factor authentication must be enabled on your account for this action"
            }
            Reason::MfaNotVerified => "Please verify your identity with two-factor authentication",
            Reason::MfaExpired => {
                "Your two-factor verification has expired, please verify again"
            }
            Reason::IpNotAllowed => "Access is not allowed from your network location",
            Reason::DeviceNotTrusted => "This device is not trusted for this action",
            Reason::TimeRestriction => "This action is not allowed at this time",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The policy that caused a denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPolicy {
    pub policy_id: Uuid,
    pub policy_name: String,
    pub kind: PolicyKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_utc: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_mfa: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_policy: Option<FailedPolicy>,
}

/// Outcome of a capability check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Reason,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_level: Option<AccessLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: DecisionMetadata,
}

impl Decision {
    pub fn allow(reason: Reason, access_level: AccessLevel) -> Self {
        Self {
            allowed: true,
            reason,
            message: reason.message().to_string(),
            access_level: Some(access_level),
            grant_id: None,
            metadata: DecisionMetadata::default(),
        }
    }

    pub fn deny(reason: Reason) -> Self {
        Self {
            allowed: false,
            reason,
            message: reason.message().to_string(),
            access_level: None,
            grant_id: None,
            metadata: DecisionMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: DecisionMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_carries_message() {
        let d = Decision::deny(Reason::MfaNotEnabled);
        assert!(!d.allowed);
        assert_eq!(d.message, Reason::MfaNotEnabled.message());
        assert!(d.access_level.is_none());
    }

    #[test]
    fn test_reason_serializes_upper_snake() {
        let json = serde_json::to_string(&Reason::DeviceNotTrusted).unwrap();
        assert_eq!(json, "\"DEVICE_NOT_TRUSTED\"");
        assert_eq!(Reason::DeviceNotTrusted.as_str(), "DEVICE_NOT_TRUSTED");
    }
}
