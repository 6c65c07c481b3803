//! Policy administration and dry-run evaluation.
//!
//! Lets administrators manage policies and test them against a sample
//! context. Dry runs look devices up but never record sightings.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::clock::Clock;
use super::device::fingerprint;
use super::error::ServiceError;
use super::policy::ip_permitted;
use super::store::AccessStore;
use crate::models::{
    CreatePolicyRequest, Enforcement, Policy, PolicyConditions, PolicyFilter, PolicyTargetType,
    RequestContext, TimeWindow, UpdatePolicyRequest,
};

/// Result of evaluating one policy, or a batch of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyEvaluation {
    pub allowed: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
}

impl PolicyEvaluation {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            policy_id: None,
            policy_name: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            ..Self::allow(reason)
        }
    }

    fn attributed_to(mut self, policy: &Policy) -> Self {
        self.policy_id = Some(policy.policy_id);
        self.policy_name = Some(policy.policy_name.clone());
        self
    }
}

pub struct PolicyService {
    store: Arc<dyn AccessStore>,
    clock: Arc<dyn Clock>,
}

impl PolicyService {
    pub fn new(store: Arc<dyn AccessStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    // ==================== Administration ====================

    pub async fn create_policy(&self, input: CreatePolicyRequest) -> Result<Policy, ServiceError> {
        if input.policy_name.trim().is_empty() {
            return Err(ServiceError::Validation("policy_name must not be empty".to_string()));
        }
        input
            .conditions
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;
        if input.target_type != PolicyTargetType::Global && input.target_id.is_none() {
            return Err(ServiceError::Validation(format!(
                "target_id is required for {} policies",
                input.target_type.as_str()
            )));
        }

        let mut policy = Policy::new(
            input.policy_name.trim().to_string(),
            input.target_type,
            input.target_id,
            input.enforcement,
            input.conditions,
            self.clock.now(),
        );
        policy.description = input.description;

        self.store.insert_policy(&policy).await?;
        tracing::info!(
            policy_id = %policy.policy_id,
            kind = policy.kind().as_str(),
            enforcement = %policy.enforcement_code,
            "Policy created"
        );
        Ok(policy)
    }

    pub async fn get_policy(&self, policy_id: Uuid) -> Result<Policy, ServiceError> {
        self.store
            .find_policy(policy_id)
            .await?
            .ok_or(ServiceError::NotFound("policy"))
    }

    pub async fn list_policies(&self, filter: &PolicyFilter) -> Result<Vec<Policy>, ServiceError> {
        Ok(self.store.list_policies(filter).await?)
    }

    /// Apply a partial update. New conditions must keep the policy's kind.
    pub async fn update_policy(
        &self,
        policy_id: Uuid,
        input: UpdatePolicyRequest,
    ) -> Result<Policy, ServiceError> {
        let mut policy = self.get_policy(policy_id).await?;

        if let Some(conditions) = input.conditions {
            if conditions.kind() != policy.kind() {
                return Err(ServiceError::Validation(format!(
                    "conditions must stay of kind {}",
                    policy.kind().as_str()
                )));
            }
            conditions
                .validate()
                .map_err(|e| ServiceError::Validation(e.to_string()))?;
            policy.conditions = conditions;
        }
        if let Some(name) = input.policy_name {
            policy.policy_name = name;
        }
        if let Some(description) = input.description {
            policy.description = Some(description);
        }
        if let Some(enforcement) = input.enforcement {
            policy.enforcement_code = enforcement.as_str().to_string();
        }
        if let Some(is_active) = input.is_active {
            policy.is_active = is_active;
        }
        policy.updated_utc = self.clock.now();

        if !self.store.update_policy(&policy).await? {
            return Err(ServiceError::NotFound("policy"));
        }
        Ok(policy)
    }

    pub async fn delete_policy(&self, policy_id: Uuid) -> Result<(), ServiceError> {
        if !self.store.delete_policy(policy_id).await? {
            return Err(ServiceError::NotFound("policy"));
        }
        tracing::info!(policy_id = %policy_id, "Policy deleted");
        Ok(())
    }

    // ==================== Dry-run evaluation ====================

    pub fn evaluate_ip_whitelist(
        &self,
        allowed_ips: &[String],
        blocked_ips: &[String],
        ctx: &RequestContext,
    ) -> PolicyEvaluation {
        let Some(ip) = ctx.ip.as_deref() else {
            return PolicyEvaluation::deny("No IP address provided");
        };
        if !ip_permitted(Some(ip), &[], blocked_ips) {
            return PolicyEvaluation::deny(format!("IP {} is blocked", ip));
        }
        if allowed_ips.is_empty() {
            return PolicyEvaluation::allow("IP not in blacklist");
        }
        if ip_permitted(Some(ip), allowed_ips, &[]) {
            PolicyEvaluation::allow(format!("IP {} is whitelisted", ip))
        } else {
            PolicyEvaluation::deny(format!("IP {} is not in whitelist", ip))
        }
    }

    pub async fn evaluate_device_trust(
        &self,
        require_trusted: bool,
        ctx: &RequestContext,
    ) -> Result<PolicyEvaluation, ServiceError> {
        let (Some(ua), Some(ip)) = (ctx.user_agent.as_deref(), ctx.ip.as_deref()) else {
            return Ok(PolicyEvaluation::deny("No device information provided"));
        };
        let Some(device) = self.store.find_device(&fingerprint(ua, ip)).await? else {
            return Ok(PolicyEvaluation::deny("Device not recognized"));
        };
        if require_trusted && !device.is_trusted {
            return Ok(PolicyEvaluation::deny("Device is not trusted"));
        }
        Ok(PolicyEvaluation::allow("Device is trusted"))
    }

    pub fn evaluate_time_window(&self, window: &TimeWindow, ctx: &RequestContext) -> PolicyEvaluation {
        let at = ctx.timestamp.unwrap_or_else(|| self.clock.now());
        if window.allows(at) {
            PolicyEvaluation::allow("Within allowed time window")
        } else {
            PolicyEvaluation::deny("Outside allowed time window")
        }
    }

    pub fn evaluate_geo(
        &self,
        allowed_countries: &[String],
        blocked_countries: &[String],
        ctx: &RequestContext,
    ) -> PolicyEvaluation {
        let Some(country) = ctx.country.as_deref() else {
            return PolicyEvaluation::deny("No country provided");
        };
        let matches = |list: &[String]| list.iter().any(|c| c.eq_ignore_ascii_case(country));
        if matches(blocked_countries) {
            return PolicyEvaluation::deny(format!("Country {} is blocked", country));
        }
        if !allowed_countries.is_empty() && !matches(allowed_countries) {
            return PolicyEvaluation::deny(format!("Country {} is not allowed", country));
        }
        PolicyEvaluation::allow(format!("Country {} is allowed", country))
    }

    /// Evaluate one policy against a context. Inactive policies allow.
    pub async fn evaluate_policy(
        &self,
        policy: &Policy,
        ctx: &RequestContext,
    ) -> Result<PolicyEvaluation, ServiceError> {
        if !policy.is_active {
            return Ok(PolicyEvaluation::allow("Policy is inactive"));
        }

        let result = match &policy.conditions {
            PolicyConditions::IpRestriction {
                allowed_ips,
                blocked_ips,
            } => self.evaluate_ip_whitelist(allowed_ips, blocked_ips, ctx),
            PolicyConditions::DeviceTrust { require_trusted } => {
                self.evaluate_device_trust(*require_trusted, ctx).await?
            }
            PolicyConditions::TimeRestriction(window) => self.evaluate_time_window(window, ctx),
            PolicyConditions::GeoRestriction {
                allowed_countries,
                blocked_countries,
            } => self.evaluate_geo(allowed_countries, blocked_countries, ctx),
        };

        let attributed = match policy.enforcement() {
            Enforcement::Deny => !result.allowed,
            Enforcement::Allow => result.allowed,
            Enforcement::Warn | Enforcement::RequireMfa => false,
        };
        Ok(if attributed {
            result.attributed_to(policy)
        } else {
            result
        })
    }

    pub async fn evaluate_policy_by_id(
        &self,
        policy_id: Uuid,
        ctx: &RequestContext,
    ) -> Result<PolicyEvaluation, ServiceError> {
        let policy = self.get_policy(policy_id).await?;
        self.evaluate_policy(&policy, ctx).await
    }

    /// Evaluate every active policy on a target: any failing DENY policy is
    /// final; if ALLOW policies exist, at least one must pass.
    pub async fn evaluate_policies(
        &self,
        target_type: PolicyTargetType,
        target_id: Option<Uuid>,
        ctx: &RequestContext,
    ) -> Result<PolicyEvaluation, ServiceError> {
        let policies = self
            .store
            .find_active_policies_for_target(target_type, target_id)
            .await?;

        for policy in policies.iter().filter(|p| p.enforcement() == Enforcement::Deny) {
            let result = self.evaluate_policy(policy, ctx).await?;
            if !result.allowed {
                return Ok(result);
            }
        }

        let allow_policies: Vec<&Policy> = policies
            .iter()
            .filter(|p| p.enforcement() == Enforcement::Allow)
            .collect();
        if !allow_policies.is_empty() {
            for policy in allow_policies {
                let result = self.evaluate_policy(policy, ctx).await?;
                if result.allowed {
                    return Ok(result);
                }
            }
            return Ok(PolicyEvaluation::deny("No ALLOW policy matched"));
        }

        Ok(PolicyEvaluation::allow("All policies passed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::SystemClock;
    use crate::services::memory::MemoryStore;

    fn service() -> (Arc<MemoryStore>, PolicyService) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), PolicyService::new(store, Arc::new(SystemClock)))
    }

    fn ip_policy(target_id: Uuid, enforcement: Enforcement, allowed: &[&str]) -> CreatePolicyRequest {
        CreatePolicyRequest {
            policy_name: format!("{} {:?}", enforcement.as_str(), allowed),
            description: None,
            target_type: PolicyTargetType::Capability,
            target_id: Some(target_id),
            enforcement,
            conditions: PolicyConditions::IpRestriction {
                allowed_ips: allowed.iter().map(|s| s.to_string()).collect(),
                blocked_ips: vec![],
            },
        }
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_conditions() {
        let (_, svc) = service();
        let err = svc
            .create_policy(ip_policy(Uuid::new_v4(), Enforcement::Deny, &["10.0.0.0/99"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_cannot_change_kind() {
        let (_, svc) = service();
        let policy = svc
            .create_policy(ip_policy(Uuid::new_v4(), Enforcement::Deny, &["10.0.0.0/8"]))
            .await
            .unwrap();
        let err = svc
            .update_policy(
                policy.policy_id,
                UpdatePolicyRequest {
                    conditions: Some(PolicyConditions::DeviceTrust {
                        require_trusted: true,
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_batch_deny_first_then_allow() {
        let (_, svc) = service();
        let target = Uuid::new_v4();
        svc.create_policy(ip_policy(target, Enforcement::Deny, &["10.0.0.0/8"]))
            .await
            .unwrap();
        svc.create_policy(ip_policy(target, Enforcement::Allow, &["10.1.0.0/16"]))
            .await
            .unwrap();

        let outside = RequestContext::with_client("192.168.1.1", "agent");
        let result = svc
            .evaluate_policies(PolicyTargetType::Capability, Some(target), &outside)
            .await
            .unwrap();
        assert!(!result.allowed);
        assert_eq!(result.reason, "IP 192.168.1.1 is not in whitelist");

        let no_allow_match = RequestContext::with_client("10.2.0.1", "agent");
        let result = svc
            .evaluate_policies(PolicyTargetType::Capability, Some(target), &no_allow_match)
            .await
            .unwrap();
        assert!(!result.allowed);
        assert_eq!(result.reason, "No ALLOW policy matched");

        let inside = RequestContext::with_client("10.1.2.3", "agent");
        let result = svc
            .evaluate_policies(PolicyTargetType::Capability, Some(target), &inside)
            .await
            .unwrap();
        assert!(result.allowed);
        assert!(result.policy_id.is_some());
    }

    #[tokio::test]
    async fn test_unknown_device_is_not_recognized() {
        let (_, svc) = service();
        let ctx = RequestContext::with_client("10.0.0.1", "agent");
        let result = svc.evaluate_device_trust(true, &ctx).await.unwrap();
        assert_eq!(result, PolicyEvaluation::deny("Device not recognized"));
    }

    #[test]
    fn test_geo_evaluation() {
        let (_, svc) = service();
        let mut ctx = RequestContext::default();
        assert!(!svc.evaluate_geo(&["BR".into()], &[], &ctx).allowed);
        ctx.country = Some("br".into());
        assert!(svc.evaluate_geo(&["BR".into()], &[], &ctx).allowed);
        assert!(!svc.evaluate_geo(&[], &["BR".into()], &ctx).allowed);
    }
}
