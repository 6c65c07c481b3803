//! Capability resolution - the single decision point for "may this user do X".
//!
//! Order of evaluation is fixed: super admin, capability state, DENY grants,
//! ADD grants, space role capabilities, default deny. Every check writes
//! exactly one audit event. A store failure anywhere on the path denies.

use serde_json::json;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use super::audit::AuditRecorder;
use super::clock::Clock;
use super::policy::{PolicyEvaluator, PolicyOutcome};
use super::store::{AccessStore, StoreResult};
use crate::models::{
    AccessLevel, AuditEvent, AuditEventKind, Capability, Decision, DecisionMetadata, GrantScope,
    GrantType, Reason, RequestContext, User,
};

/// Wildcard returned as the effective capability set of a super admin.
pub const ALL_CAPABILITIES: &str = "*";

#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub user_id: Uuid,
    pub capability: String,
    pub space_id: Option<Uuid>,
    pub scope: Option<GrantScope>,
    pub context: RequestContext,
}

impl CheckRequest {
    pub fn new(user_id: Uuid, capability: impl Into<String>) -> Self {
        Self {
            user_id,
            capability: capability.into(),
            space_id: None,
            scope: None,
            context: RequestContext::default(),
        }
    }

    pub fn in_space(mut self, space_id: Uuid) -> Self {
        self.space_id = Some(space_id);
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

/// Ids gathered while deciding, for the audit record.
#[derive(Default)]
struct Trail {
    cap_id: Option<Uuid>,
    device_id: Option<String>,
}

pub struct CapabilityResolver {
    store: Arc<dyn AccessStore>,
    policies: Arc<PolicyEvaluator>,
    audit: Arc<AuditRecorder>,
    clock: Arc<dyn Clock>,
}

impl CapabilityResolver {
    pub fn new(
        store: Arc<dyn AccessStore>,
        policies: Arc<PolicyEvaluator>,
        audit: Arc<AuditRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policies,
            audit,
            clock,
        }
    }

    /// Decide whether the user holds the capability. Never fails: store
    /// errors become a `NO_PERMISSION` denial.
    pub async fn check(&self, request: &CheckRequest) -> Decision {
        let mut trail = Trail::default();
        let decision = match self.decide(request, &mut trail).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    user_id = %request.user_id,
                    capability = %request.capability,
                    "Capability check failed, denying"
                );
                Decision::deny(Reason::NoPermission)
            }
        };

        metrics::counter!(
            "authz_decisions_total",
            "reason" => decision.reason.as_str(),
            "allowed" => if decision.allowed { "true" } else { "false" }
        )
        .increment(1);

        tracing::info!(
            user_id = %request.user_id,
            capability = %request.capability,
            allowed = decision.allowed,
            reason = %decision.reason,
            "Capability check"
        );

        let ctx = &request.context;
        let event = AuditEvent::new(
            AuditEventKind::CapabilityCheck,
            "capability.check",
            Some(request.user_id),
            self.clock.now(),
        )
        .with_target(request.user_id)
        .with_capability(trail.cap_id)
        .with_space(request.space_id)
        .with_grant(decision.grant_id.or(decision.metadata.grant_id))
        .with_result(decision.allowed, decision.reason.as_str())
        .with_client(ctx.ip.clone(), ctx.user_agent.clone())
        .with_device(trail.device_id)
        .with_data(json!({
            "capability": request.capability,
            "scope": request.scope.map(|s| s.as_str()),
            "failed_policy": decision.metadata.failed_policy,
        }));
        self.audit.record(event).await;

        decision
    }

    /// True when any of the capabilities is allowed. Each check is audited.
    pub async fn check_any(&self, request: &CheckRequest, capabilities: &[&str]) -> Option<Decision> {
        let mut last = None;
        for capability in capabilities {
            let mut single = request.clone();
            single.capability = capability.to_string();
            let decision = self.check(&single).await;
            if decision.allowed {
                return Some(decision);
            }
            last = Some(decision);
        }
        last
    }

    async fn decide(&self, request: &CheckRequest, trail: &mut Trail) -> StoreResult<Decision> {
        let now = self.clock.now();

        let Some(user) = self.store.find_user(request.user_id).await? else {
            return Ok(Decision::deny(Reason::NoPermission));
        };

        if user.is_super_admin() {
            return Ok(Decision::allow(Reason::SuperAdmin, AccessLevel::ReadWrite));
        }

        let Some(capability) = self.store.find_capability_by_key(&request.capability).await? else {
            return Ok(Decision::deny(Reason::CapabilityNotFound));
        };
        trail.cap_id = Some(capability.cap_id);

        if !capability.is_active {
            return Ok(Decision::deny(Reason::CapabilityInactive));
        }

        let (deny_grant, add_grant) = futures::join!(
            self.store
                .find_effective_grant(user.user_id, capability.cap_id, GrantType::Deny, now),
            self.store
                .find_effective_grant(user.user_id, capability.cap_id, GrantType::Add, now),
        );

        // DENY is decided before the ADD result is even looked at.
        if let Some(grant) = deny_grant? {
            return Ok(Decision::deny(Reason::DenyGrant).with_metadata(DecisionMetadata {
                grant_id: Some(grant.grant_id),
                ..Default::default()
            }));
        }

        if let Some(grant) = add_grant? {
            let outcome = self.validate_policies(&user, &capability, request, trail).await?;
            if let Some(denied) = policy_denial(outcome) {
                return Ok(denied);
            }
            let mut decision = Decision::allow(Reason::AddGrant, grant.access_level());
            decision.grant_id = Some(grant.grant_id);
            return Ok(decision.with_metadata(DecisionMetadata {
                grant_id: Some(grant.grant_id),
                expires_utc: grant.expires_utc,
                granted_by: Some(grant.granted_by),
                ..Default::default()
            }));
        }

        if let Some(space_id) = request.space_id {
            let roles = self
                .store
                .find_space_roles_for_user(user.user_id, Some(space_id))
                .await?;
            if roles.iter().any(|r| r.cap_ids.contains(&capability.cap_id)) {
                let outcome = self.validate_policies(&user, &capability, request, trail).await?;
                if let Some(denied) = policy_denial(outcome) {
                    return Ok(denied);
                }
                return Ok(
                    Decision::allow(Reason::RoleCapability, AccessLevel::ReadWrite).with_metadata(
                        DecisionMetadata {
                            requires_mfa: Some(capability.requires_mfa),
                            ..Default::default()
                        },
                    ),
                );
            }
        }

        Ok(Decision::deny(Reason::NoPermission))
    }

    async fn validate_policies(
        &self,
        user: &User,
        capability: &Capability,
        request: &CheckRequest,
        trail: &mut Trail,
    ) -> StoreResult<PolicyOutcome> {
        let outcome = self.policies.validate(user, capability, &request.context).await?;
        trail.device_id = outcome.device_id.clone();
        Ok(outcome)
    }

    /// Capability keys the user currently holds. Super admins get `{"*"}`.
    /// Unknown users and store failures yield an empty set.
    pub async fn list_effective_capabilities(
        &self,
        user_id: Uuid,
        space_id: Option<Uuid>,
    ) -> BTreeSet<String> {
        match self.effective_capabilities(user_id, space_id).await {
            Ok(set) => set,
            Err(e) => {
                tracing::error!(error = %e, user_id = %user_id, "Failed to list effective capabilities");
                BTreeSet::new()
            }
        }
    }

    async fn effective_capabilities(
        &self,
        user_id: Uuid,
        space_id: Option<Uuid>,
    ) -> StoreResult<BTreeSet<String>> {
        let Some(user) = self.store.find_user(user_id).await? else {
            return Ok(BTreeSet::new());
        };
        if user.is_super_admin() {
            return Ok(BTreeSet::from([ALL_CAPABILITIES.to_string()]));
        }

        let now = self.clock.now();
        let mut granted: HashSet<Uuid> = HashSet::new();
        let mut denied: HashSet<Uuid> = HashSet::new();

        if let Some(space_id) = space_id {
            for role in self.store.find_space_roles_for_user(user_id, Some(space_id)).await? {
                granted.extend(role.cap_ids);
            }
        }

        for grant in self.store.find_effective_grants(user_id, now).await? {
            let Some(cap_id) = grant.cap_id else { continue };
            match grant.grant_type() {
                GrantType::Add => granted.insert(cap_id),
                GrantType::Deny => denied.insert(cap_id),
            };
        }

        let cap_ids: Vec<Uuid> = granted.difference(&denied).copied().collect();
        let capabilities = self.store.find_capabilities(&cap_ids).await?;
        Ok(capabilities
            .into_iter()
            .filter(|c| c.is_active)
            .map(|c| c.cap_key)
            .collect())
    }
}

fn policy_denial(outcome: PolicyOutcome) -> Option<Decision> {
    if outcome.allowed {
        return None;
    }
    let reason = outcome.reason.unwrap_or(Reason::NoPermission);
    Some(Decision::deny(reason).with_metadata(DecisionMetadata {
        failed_policy: outcome.failed_policy,
        ..Default::default()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Sensitivity, UserRole};
    use crate::services::clock::SystemClock;
    use crate::services::device::DeviceTracker;
    use crate::services::memory::MemoryStore;
    use std::time::Duration;

    fn resolver(store: Arc<MemoryStore>) -> CapabilityResolver {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let devices = Arc::new(DeviceTracker::new(store.clone(), clock.clone(), Duration::from_secs(60)));
        let policies = Arc::new(PolicyEvaluator::new(store.clone(), devices, clock.clone()));
        let audit = Arc::new(AuditRecorder::new(store.clone(), Duration::from_millis(500)));
        CapabilityResolver::new(store, policies, audit, clock)
    }

    #[tokio::test]
    async fn test_unknown_user_denied_and_audited() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(store.clone());

        let decision = resolver.check(&CheckRequest::new(Uuid::new_v4(), "invoices.read")).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Reason::NoPermission);
        assert_eq!(store.audit_events().len(), 1);
    }

    #[tokio::test]
    async fn test_super_admin_gets_wildcard() {
        let store = Arc::new(MemoryStore::new());
        let admin = User::new(None, "root@example.com".into(), "Root".into(), UserRole::SuperAdmin);
        store.insert_user(admin.clone()).unwrap();
        let resolver = resolver(store);

        let caps = resolver.list_effective_capabilities(admin.user_id, None).await;
        assert_eq!(caps, BTreeSet::from(["*".to_string()]));
    }

    #[tokio::test]
    async fn test_store_failure_denies() {
        let store = Arc::new(MemoryStore::new());
        let user = User::new(None, "a@example.com".into(), "A".into(), UserRole::User);
        store.insert_user(user.clone()).unwrap();
        store
            .insert_capability(Capability::new("invoices.read", Sensitivity::Normal))
            .unwrap();
        store.set_fail_reads(true);
        let resolver = resolver(store.clone());

        let decision = resolver.check(&CheckRequest::new(user.user_id, "invoices.read")).await;
        assert_eq!(decision.reason, Reason::NoPermission);
        assert!(resolver
            .list_effective_capabilities(user.user_id, None)
            .await
            .is_empty());
        assert_eq!(store.audit_events().len(), 1);
    }
}
