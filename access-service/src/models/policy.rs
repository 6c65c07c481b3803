//! Contextual security policy model.
//!
//! A policy attaches one kind of condition (IP, device, time window, geo) to
//! a target and says what happens when the condition fails. Conditions are a
//! closed tagged union and are validated before they are stored.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::utils::network;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyKind {
    IpRestriction,
    DeviceTrust,
    TimeRestriction,
    GeoRestriction,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::IpRestriction => "IP_RESTRICTION",
            PolicyKind::DeviceTrust => "DEVICE_TRUST",
            PolicyKind::TimeRestriction => "TIME_RESTRICTION",
            PolicyKind::GeoRestriction => "GEO_RESTRICTION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyTargetType {
    Capability,
    Space,
    Tenant,
    Global,
}

impl PolicyTargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyTargetType::Capability => "CAPABILITY",
            PolicyTargetType::Space => "SPACE",
            PolicyTargetType::Tenant => "TENANT",
            PolicyTargetType::Global => "GLOBAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CAPABILITY" => Some(PolicyTargetType::Capability),
            "SPACE" => Some(PolicyTargetType::Space),
            "TENANT" => Some(PolicyTargetType::Tenant),
            "GLOBAL" => Some(PolicyTargetType::Global),
            _ => None,
        }
    }
}

/// What a failed condition does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Enforcement {
    Deny,
    Allow,
    Warn,
    RequireMfa,
}

impl Enforcement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Enforcement::Deny => "DENY",
            Enforcement::Allow => "ALLOW",
            Enforcement::Warn => "WARN",
            Enforcement::RequireMfa => "REQUIRE_MFA",
        }
    }

    /// Unknown codes enforce as DENY.
    pub fn parse(s: &str) -> Self {
        match s {
            "ALLOW" => Enforcement::Allow,
            "WARN" => Enforcement::Warn,
            "REQUIRE_MFA" => Enforcement::RequireMfa,
            _ => Enforcement::Deny,
        }
    }
}

/// Half-open hour range `[start, end)` in local hours, serialized as `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRange(pub u8, pub u8);

impl HourRange {
    pub fn contains(&self, hour: u8) -> bool {
        hour >= self.0 && hour < self.1
    }
}

fn all_days() -> Vec<u8> {
    (0..7).collect()
}

fn default_true() -> bool {
    true
}

/// Allowed hours and weekdays, evaluated at a fixed UTC offset.
/// Weekdays are numbered from Sunday = 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub allowed_hours: Vec<HourRange>,
    #[serde(default = "all_days")]
    pub allowed_days: Vec<u8>,
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl TimeWindow {
    pub fn allows(&self, at: DateTime<Utc>) -> bool {
        // An offset outside +/-24h never matches.
        let Some(offset) = self
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
        else {
            return false;
        };
        let local = at.with_timezone(&offset);
        let weekday = local.weekday().num_days_from_sunday() as u8;
        let hour = local.hour() as u8;

        self.allowed_days.contains(&weekday) && self.allowed_hours.iter().any(|r| r.contains(hour))
    }
}

/// Conditions of a policy, one variant per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyConditions {
    #[serde(alias = "IP_WHITELIST")]
    IpRestriction {
        #[serde(default)]
        allowed_ips: Vec<String>,
        #[serde(default)]
        blocked_ips: Vec<String>,
    },
    #[serde(alias = "DEVICE_RESTRICTION")]
    DeviceTrust {
        #[serde(default = "default_true")]
        require_trusted: bool,
    },
    #[serde(alias = "TIME_BASED")]
    TimeRestriction(TimeWindow),
    #[serde(alias = "GEO_LOCATION")]
    GeoRestriction {
        #[serde(default)]
        allowed_countries: Vec<String>,
        #[serde(default)]
        blocked_countries: Vec<String>,
    },
}

/// Reasons a set of conditions is rejected at write time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    EmptyIpLists,
    InvalidIpEntry(String),
    EmptyHours,
    InvalidHourRange { start: u8, end: u8 },
    EmptyDays,
    InvalidDay(u8),
    InvalidUtcOffset(i32),
    EmptyCountryLists,
    InvalidCountryCode(String),
}

impl std::fmt::Display for ConditionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionError::EmptyIpLists => {
                write!(f, "IP restriction needs at least one allowed or blocked entry")
            }
            ConditionError::InvalidIpEntry(entry) => {
                write!(f, "'{}' is not an IPv4 address or CIDR block", entry)
            }
            ConditionError::EmptyHours => write!(f, "time restriction needs at least one hour range"),
            ConditionError::InvalidHourRange { start, end } => {
                write!(f, "hour range [{}, {}) must satisfy 0 <= start < end <= 24", start, end)
            }
            ConditionError::EmptyDays => write!(f, "time restriction needs at least one allowed day"),
            ConditionError::InvalidDay(day) => write!(f, "day {} is outside 0 (Sunday) to 6", day),
            ConditionError::InvalidUtcOffset(offset) => {
                write!(f, "UTC offset of {} minutes is out of range", offset)
            }
            ConditionError::EmptyCountryLists => {
                write!(f, "geo restriction needs at least one allowed or blocked country")
            }
            ConditionError::InvalidCountryCode(code) => {
                write!(f, "'{}' is not a two-letter country code", code)
            }
        }
    }
}

impl std::error::Error for ConditionError {}

fn is_country_code(code: &str) -> bool {
    code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic())
}

impl PolicyConditions {
    pub fn kind(&self) -> PolicyKind {
        match self {
            PolicyConditions::IpRestriction { .. } => PolicyKind::IpRestriction,
            PolicyConditions::DeviceTrust { .. } => PolicyKind::DeviceTrust,
            PolicyConditions::TimeRestriction(_) => PolicyKind::TimeRestriction,
            PolicyConditions::GeoRestriction { .. } => PolicyKind::GeoRestriction,
        }
    }

    /// Check the conditions are well formed. Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConditionError> {
        match self {
            PolicyConditions::IpRestriction {
                allowed_ips,
                blocked_ips,
            } => {
                if allowed_ips.is_empty() && blocked_ips.is_empty() {
                    return Err(ConditionError::EmptyIpLists);
                }
                if let Some(bad) = allowed_ips
                    .iter()
                    .chain(blocked_ips.iter())
                    .find(|e| !network::is_valid_entry(e))
                {
                    return Err(ConditionError::InvalidIpEntry(bad.clone()));
                }
                Ok(())
            }
            PolicyConditions::DeviceTrust { .. } => Ok(()),
            PolicyConditions::TimeRestriction(window) => {
                if window.allowed_hours.is_empty() {
                    return Err(ConditionError::EmptyHours);
                }
                if let Some(r) = window
                    .allowed_hours
                    .iter()
                    .find(|r| r.0 >= r.1 || r.1 > 24)
                {
                    return Err(ConditionError::InvalidHourRange {
                        start: r.0,
                        end: r.1,
                    });
                }
                if window.allowed_days.is_empty() {
                    return Err(ConditionError::EmptyDays);
                }
                if let Some(day) = window.allowed_days.iter().find(|d| **d > 6) {
                    return Err(ConditionError::InvalidDay(*day));
                }
                if FixedOffset::east_opt(window.utc_offset_minutes.saturating_mul(60)).is_none() {
                    return Err(ConditionError::InvalidUtcOffset(window.utc_offset_minutes));
                }
                Ok(())
            }
            PolicyConditions::GeoRestriction {
                allowed_countries,
                blocked_countries,
            } => {
                if allowed_countries.is_empty() && blocked_countries.is_empty() {
                    return Err(ConditionError::EmptyCountryLists);
                }
                if let Some(bad) = allowed_countries
                    .iter()
                    .chain(blocked_countries.iter())
                    .find(|c| !is_country_code(c))
                {
                    return Err(ConditionError::InvalidCountryCode(bad.clone()));
                }
                Ok(())
            }
        }
    }
}

/// Policy entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Policy {
    pub policy_id: Uuid,
    pub policy_name: String,
    pub description: Option<String>,
    pub target_type_code: String,
    pub target_id: Option<Uuid>,
    pub enforcement_code: String,
    #[sqlx(json)]
    pub conditions: PolicyConditions,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Policy {
    /// Create a new active policy. Conditions are not validated here.
    pub fn new(
        policy_name: String,
        target_type: PolicyTargetType,
        target_id: Option<Uuid>,
        enforcement: Enforcement,
        conditions: PolicyConditions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            policy_id: Uuid::new_v4(),
            policy_name,
            description: None,
            target_type_code: target_type.as_str().to_string(),
            target_id,
            enforcement_code: enforcement.as_str().to_string(),
            conditions,
            is_active: true,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn kind(&self) -> PolicyKind {
        self.conditions.kind()
    }

    pub fn enforcement(&self) -> Enforcement {
        Enforcement::parse(&self.enforcement_code)
    }

    pub fn target_type(&self) -> Option<PolicyTargetType> {
        PolicyTargetType::parse(&self.target_type_code)
    }
}

/// Request to create a policy.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePolicyRequest {
    pub policy_name: String,
    pub description: Option<String>,
    pub target_type: PolicyTargetType,
    pub target_id: Option<Uuid>,
    pub enforcement: Enforcement,
    pub conditions: PolicyConditions,
}

/// Partial update of a policy. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePolicyRequest {
    pub policy_name: Option<String>,
    pub description: Option<String>,
    pub enforcement: Option<Enforcement>,
    pub conditions: Option<PolicyConditions>,
    pub is_active: Option<bool>,
}

/// Filter for listing policies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyFilter {
    pub target_type: Option<PolicyTargetType>,
    pub target_id: Option<Uuid>,
    pub active_only: Option<bool>,
}

impl PolicyFilter {
    pub fn matches(&self, policy: &Policy) -> bool {
        self.target_type
            .map_or(true, |t| policy.target_type_code == t.as_str())
            && self.target_id.map_or(true, |id| policy.target_id == Some(id))
            && (!self.active_only.unwrap_or(false) || policy.is_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn business_hours() -> TimeWindow {
        TimeWindow {
            allowed_hours: vec![HourRange(9, 18)],
            allowed_days: vec![1, 2, 3, 4, 5],
            utc_offset_minutes: 0,
        }
    }

    #[test]
    fn test_time_window_weekday_and_hours() {
        let window = business_hours();
        // 2024-01-09 is a Tuesday.
        let tue_14 = Utc.with_ymd_and_hms(2024, 1, 9, 14, 0, 0).unwrap();
        let tue_20 = Utc.with_ymd_and_hms(2024, 1, 9, 20, 0, 0).unwrap();
        let sat_14 = Utc.with_ymd_and_hms(2024, 1, 13, 14, 0, 0).unwrap();

        assert!(window.allows(tue_14));
        assert!(!window.allows(tue_20));
        assert!(!window.allows(sat_14));
    }

    #[test]
    fn test_time_window_end_is_exclusive() {
        let window = business_hours();
        assert!(window.allows(Utc.with_ymd_and_hms(2024, 1, 9, 9, 0, 0).unwrap()));
        assert!(!window.allows(Utc.with_ymd_and_hms(2024, 1, 9, 18, 0, 0).unwrap()));
    }

    #[test]
    fn test_time_window_applies_offset() {
        let mut window = business_hours();
        window.utc_offset_minutes = -300;
        // 14:00 UTC is 09:00 at UTC-5.
        assert!(window.allows(Utc.with_ymd_and_hms(2024, 1, 9, 14, 0, 0).unwrap()));
        // 02:00 UTC Wednesday is 21:00 Tuesday at UTC-5.
        assert!(!window.allows(Utc.with_ymd_and_hms(2024, 1, 10, 2, 0, 0).unwrap()));
    }

    #[test]
    fn test_time_window_out_of_range_offset_never_matches() {
        let mut window = business_hours();
        window.allowed_hours = vec![HourRange(0, 24)];
        window.allowed_days = all_days();
        window.utc_offset_minutes = i32::MAX;
        assert!(!window.allows(Utc.with_ymd_and_hms(2024, 1, 9, 14, 0, 0).unwrap()));

        window.utc_offset_minutes = 24 * 60;
        assert!(!window.allows(Utc.with_ymd_and_hms(2024, 1, 9, 14, 0, 0).unwrap()));
    }

    #[test]
    fn test_conditions_accept_legacy_tags() {
        let ip: PolicyConditions =
            serde_json::from_value(serde_json::json!({"type": "IP_WHITELIST", "allowed_ips": ["10.0.0.0/8"]}))
                .unwrap();
        assert_eq!(ip.kind(), PolicyKind::IpRestriction);

        let time: PolicyConditions = serde_json::from_value(serde_json::json!({
            "type": "TIME_BASED",
            "allowed_hours": [[9, 17]]
        }))
        .unwrap();
        match time {
            PolicyConditions::TimeRestriction(w) => assert_eq!(w.allowed_days, all_days()),
            other => panic!("unexpected conditions: {:?}", other),
        }

        let device: PolicyConditions =
            serde_json::from_value(serde_json::json!({"type": "DEVICE_RESTRICTION"})).unwrap();
        assert_eq!(
            device,
            PolicyConditions::DeviceTrust {
                require_trusted: true
            }
        );
    }

    #[test]
    fn test_validate_rejects_bad_conditions() {
        let bad_ip = PolicyConditions::IpRestriction {
            allowed_ips: vec!["10.0.0.0/33".into()],
            blocked_ips: vec![],
        };
        assert_eq!(
            bad_ip.validate(),
            Err(ConditionError::InvalidIpEntry("10.0.0.0/33".into()))
        );

        let empty_ip = PolicyConditions::IpRestriction {
            allowed_ips: vec![],
            blocked_ips: vec![],
        };
        assert_eq!(empty_ip.validate(), Err(ConditionError::EmptyIpLists));

        let mut window = business_hours();
        window.allowed_hours = vec![HourRange(18, 9)];
        assert_eq!(
            PolicyConditions::TimeRestriction(window).validate(),
            Err(ConditionError::InvalidHourRange { start: 18, end: 9 })
        );

        let mut window = business_hours();
        window.allowed_days = vec![7];
        assert_eq!(
            PolicyConditions::TimeRestriction(window).validate(),
            Err(ConditionError::InvalidDay(7))
        );

        let geo = PolicyConditions::GeoRestriction {
            allowed_countries: vec!["USA".into()],
            blocked_countries: vec![],
        };
        assert!(geo.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_good_conditions() {
        assert!(PolicyConditions::TimeRestriction(business_hours()).validate().is_ok());
        assert!(PolicyConditions::IpRestriction {
            allowed_ips: vec!["10.0.0.0/8".into(), "192.168.1.7".into()],
            blocked_ips: vec!["10.0.0.66".into()],
        }
        .validate()
        .is_ok());
    }
}
