//! Contextual policy evaluation on the decision path.
//!
//! Runs after a grant or role has matched. Checks MFA freshness for
//! capabilities that require it, then every active policy attached to the
//! capability. The first failing policy denies.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use super::clock::Clock;
use super::device::DeviceTracker;
use super::store::{AccessStore, StoreResult};
use crate::models::{
    Capability, Enforcement, FailedPolicy, Policy, PolicyConditions, PolicyKind, PolicyTargetType,
    Reason, RequestContext, User,
};
use crate::utils::network;

/// How long an MFA verification stays fresh.
pub const MFA_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyOutcome {
    pub allowed: bool,
    pub reason: Option<Reason>,
    pub failed_policy: Option<FailedPolicy>,
    /// Fingerprint of the client, when a device policy tracked it.
    pub device_id: Option<String>,
}

impl PolicyOutcome {
    fn pass(device_id: Option<String>) -> Self {
        Self {
            allowed: true,
            device_id,
            ..Default::default()
        }
    }

    fn fail(reason: Reason, policy: Option<&Policy>, device_id: Option<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            failed_policy: policy.map(|p| FailedPolicy {
                policy_id: p.policy_id,
                policy_name: p.policy_name.clone(),
                kind: p.kind(),
            }),
            device_id,
        }
    }
}

/// The session completed MFA within the TTL. A verification without a
/// timestamp is treated as stale.
pub fn check_mfa_session(ctx: &RequestContext, now: DateTime<Utc>) -> Result<(), Reason> {
    if !ctx.mfa_verified() {
        return Err(Reason::MfaNotVerified);
    }
    match ctx.mfa_verified_at() {
        Some(at) if now - at <= Duration::minutes(MFA_TTL_MINUTES) => Ok(()),
        _ => Err(Reason::MfaExpired),
    }
}

/// 2FA is enabled on the account and the session verified it recently.
pub fn check_mfa(user: &User, ctx: &RequestContext, now: DateTime<Utc>) -> Result<(), Reason> {
    if !user.two_factor_enabled {
        return Err(Reason::MfaNotEnabled);
    }
    check_mfa_session(ctx, now)
}

/// Blocked entries always fail; an empty whitelist admits everything not
/// blocked. A missing address never passes.
pub fn ip_permitted(ip: Option<&str>, allowed: &[String], blocked: &[String]) -> bool {
    let Some(ip) = ip else {
        return false;
    };
    if blocked.iter().any(|entry| network::ip_matches_entry(ip, entry)) {
        return false;
    }
    allowed.is_empty() || allowed.iter().any(|entry| network::ip_matches_entry(ip, entry))
}

fn denial_reason(kind: PolicyKind) -> Reason {
    match kind {
        PolicyKind::IpRestriction => Reason::IpNotAllowed,
        PolicyKind::DeviceTrust => Reason::DeviceNotTrusted,
        PolicyKind::TimeRestriction => Reason::TimeRestriction,
        PolicyKind::GeoRestriction => Reason::NoPermission,
    }
}

pub struct PolicyEvaluator {
    store: Arc<dyn AccessStore>,
    devices: Arc<DeviceTracker>,
    clock: Arc<dyn Clock>,
}

impl PolicyEvaluator {
    pub fn new(store: Arc<dyn AccessStore>, devices: Arc<DeviceTracker>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            devices,
            clock,
        }
    }

    /// Evaluate MFA and capability policies for an already-matched user.
    pub async fn validate(
        &self,
        user: &User,
        capability: &Capability,
        ctx: &RequestContext,
    ) -> StoreResult<PolicyOutcome> {
        let now = self.clock.now();

        if capability.requires_mfa {
            if let Err(reason) = check_mfa(user, ctx, now) {
                return Ok(PolicyOutcome::fail(reason, None, None));
            }
        }

        let policies = self
            .store
            .find_active_policies_for_target(PolicyTargetType::Capability, Some(capability.cap_id))
            .await?;

        let mut device_id = None;
        for policy in &policies {
            let violated = match &policy.conditions {
                PolicyConditions::IpRestriction {
                    allowed_ips,
                    blocked_ips,
                } => !ip_permitted(ctx.ip.as_deref(), allowed_ips, blocked_ips),
                PolicyConditions::DeviceTrust { require_trusted } => {
                    if !require_trusted {
                        false
                    } else if let (Some(ua), Some(ip)) = (ctx.user_agent.as_deref(), ctx.ip.as_deref()) {
                        let device = self.devices.track(user.user_id, ua, ip).await?;
                        device_id = Some(device.device_id.clone());
                        !device.is_trusted
                    } else {
                        true
                    }
                }
                PolicyConditions::TimeRestriction(window) => !window.allows(ctx.timestamp.unwrap_or(now)),
                // Geo is only evaluated by the policy dry-run service.
                PolicyConditions::GeoRestriction { .. } => false,
            };

            if !violated {
                continue;
            }

            match policy.enforcement() {
                Enforcement::Deny => {
                    return Ok(PolicyOutcome::fail(
                        denial_reason(policy.kind()),
                        Some(policy),
                        device_id,
                    ));
                }
                Enforcement::RequireMfa => {
                    if let Err(reason) = check_mfa_session(ctx, now) {
                        return Ok(PolicyOutcome::fail(reason, Some(policy), device_id));
                    }
                }
                Enforcement::Warn => {
                    tracing::warn!(
                        policy_id = %policy.policy_id,
                        kind = policy.kind().as_str(),
                        user_id = %user.user_id,
                        capability = %capability.cap_key,
                        "Policy violated under WARN enforcement"
                    );
                }
                Enforcement::Allow => {}
            }
        }

        Ok(PolicyOutcome::pass(device_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        HourRange, Sensitivity, SessionInfo, TimeWindow, UserRole,
    };
    use crate::services::clock::ManualClock;
    use crate::services::memory::MemoryStore;
    use chrono::TimeZone;

    fn mfa_user() -> User {
        let mut user = User::new(None, "ops@example.com".into(), "Ops".into(), UserRole::User);
        user.two_factor_enabled = true;
        user
    }

    #[test]
    fn test_mfa_ttl_boundary() {
        let now = Utc::now();
        let user = mfa_user();

        let fresh = RequestContext::default().with_mfa(now - Duration::minutes(15));
        assert_eq!(check_mfa(&user, &fresh, now), Ok(()));

        let stale = RequestContext::default().with_mfa(now - Duration::minutes(15) - Duration::seconds(1));
        assert_eq!(check_mfa(&user, &stale, now), Err(Reason::MfaExpired));
    }

    #[test]
    fn test_mfa_failure_order() {
        let now = Utc::now();
        let mut user = mfa_user();
        let ctx = RequestContext::default();
        assert_eq!(check_mfa(&user, &ctx, now), Err(Reason::MfaNotVerified));

        user.two_factor_enabled = false;
        let verified = RequestContext::default().with_mfa(now);
        assert_eq!(check_mfa(&user, &verified, now), Err(Reason::MfaNotEnabled));
    }

    #[test]
    fn test_verified_without_timestamp_is_stale() {
        let ctx = RequestContext {
            session: Some(SessionInfo {
                session_id: None,
                mfa_verified: true,
                mfa_verified_utc: None,
            }),
            ..Default::default()
        };
        assert_eq!(check_mfa_session(&ctx, Utc::now()), Err(Reason::MfaExpired));
    }

    #[test]
    fn test_ip_permitted() {
        let allowed = vec!["192.168.1.0/24".to_string()];
        let blocked = vec!["192.168.1.66".to_string()];
        assert!(ip_permitted(Some("192.168.1.50"), &allowed, &blocked));
        assert!(!ip_permitted(Some("192.168.1.66"), &allowed, &blocked));
        assert!(!ip_permitted(Some("10.0.0.1"), &allowed, &blocked));
        assert!(ip_permitted(Some("10.0.0.1"), &[], &blocked));
        assert!(!ip_permitted(None, &[], &[]));
    }

    #[tokio::test]
    async fn test_time_policy_uses_context_timestamp() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let devices = Arc::new(DeviceTracker::new(
            store.clone(),
            clock.clone(),
            std::time::Duration::from_secs(60),
        ));
        let evaluator = PolicyEvaluator::new(store.clone(), devices, clock.clone());

        let capability = Capability::new("reports.export", Sensitivity::Normal);
        let policy = Policy::new(
            "Business hours".into(),
            PolicyTargetType::Capability,
            Some(capability.cap_id),
            Enforcement::Deny,
            PolicyConditions::TimeRestriction(TimeWindow {
                allowed_hours: vec![HourRange(9, 18)],
                allowed_days: vec![1, 2, 3, 4, 5],
                utc_offset_minutes: 0,
            }),
            Utc::now(),
        );
        store.insert_policy(&policy).await.unwrap();
        let user = mfa_user();

        let tuesday_afternoon = RequestContext {
            timestamp: Some(Utc.with_ymd_and_hms(2024, 1, 9, 14, 0, 0).unwrap()),
            ..Default::default()
        };
        let outcome = evaluator.validate(&user, &capability, &tuesday_afternoon).await.unwrap();
        assert!(outcome.allowed);

        let saturday = RequestContext {
            timestamp: Some(Utc.with_ymd_and_hms(2024, 1, 13, 14, 0, 0).unwrap()),
            ..Default::default()
        };
        let outcome = evaluator.validate(&user, &capability, &saturday).await.unwrap();
        assert!(!outcome.allowed);
        assert_eq!(outcome.reason, Some(Reason::TimeRestriction));
        assert_eq!(
            outcome.failed_policy.map(|p| p.policy_id),
            Some(policy.policy_id)
        );
    }
}
