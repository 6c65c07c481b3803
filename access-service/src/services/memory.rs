//! In-process `AccessStore` used by tests and local runs.
//!
//! All state sits behind one mutex so each guarded transition is atomic,
//! the same guarantee the Postgres store gets from transactions. Failure
//! switches let tests exercise the fail-secure paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::store::{AccessStore, StoreError, StoreResult};
use crate::models::{
    AuditEvent, AuditEventKind, Capability, DeviceRecord, Grant, GrantRequest, GrantRequestStatus,
    GrantStatus, GrantType, ImpersonationSession, ImpersonationStatus, Policy, PolicyFilter,
    PolicyTargetType, SecurityEffect, SecurityRequest, SecurityRequestStatus, SpaceRole, User,
    UserRole, UserSpaceRole,
};

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    capabilities: HashMap<Uuid, Capability>,
    space_roles: HashMap<Uuid, SpaceRole>,
    memberships: Vec<UserSpaceRole>,
    grants: HashMap<Uuid, Grant>,
    grant_requests: HashMap<Uuid, GrantRequest>,
    policies: HashMap<Uuid, Policy>,
    devices: HashMap<String, DeviceRecord>,
    sessions: HashMap<Uuid, ImpersonationSession>,
    security_requests: HashMap<Uuid, SecurityRequest>,
    audit_events: Vec<AuditEvent>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_audit: AtomicBool,
}

fn sorted_by_created<T, F>(mut items: Vec<T>, created: F) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    items.sort_by_key(|i| std::cmp::Reverse(created(i)));
    items
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".to_string()))
    }

    fn read(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        self.state()
    }

    fn write(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        self.state()
    }

    // ==================== Failure injection ====================

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_audit(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    // ==================== Seeding ====================

    pub fn insert_user(&self, user: User) -> StoreResult<()> {
        self.state()?.users.insert(user.user_id, user);
        Ok(())
    }

    pub fn insert_capability(&self, capability: Capability) -> StoreResult<()> {
        self.state()?.capabilities.insert(capability.cap_id, capability);
        Ok(())
    }

    pub fn insert_space_role(&self, role: SpaceRole) -> StoreResult<()> {
        self.state()?.space_roles.insert(role.role_id, role);
        Ok(())
    }

    pub fn assign_space_role(&self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        let mut state = self.state()?;
        let space_id = state
            .space_roles
            .get(&role_id)
            .map(|r| r.space_id)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown space role {}", role_id)))?;
        state.memberships.push(UserSpaceRole {
            user_id,
            space_id,
            role_id,
        });
        Ok(())
    }

    // ==================== Inspection ====================

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.state()
            .map(|s| s.audit_events.clone())
            .unwrap_or_default()
    }

    pub fn grants(&self) -> Vec<Grant> {
        self.state()
            .map(|s| s.grants.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn impersonation_sessions(&self) -> Vec<ImpersonationSession> {
        self.state()
            .map(|s| s.sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn user(&self, user_id: Uuid) -> Option<User> {
        self.state().ok().and_then(|s| s.users.get(&user_id).cloned())
    }
}

#[async_trait]
impl AccessStore for MemoryStore {
    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.read()?.users.get(&user_id).cloned())
    }

    async fn find_users_by_role(&self, role: UserRole) -> StoreResult<Vec<User>> {
        Ok(self
            .read()?
            .users
            .values()
            .filter(|u| u.role() == role)
            .cloned()
            .collect())
    }

    async fn find_capability_by_key(&self, cap_key: &str) -> StoreResult<Option<Capability>> {
        Ok(self
            .read()?
            .capabilities
            .values()
            .find(|c| c.cap_key == cap_key)
            .cloned())
    }

    async fn find_capability(&self, cap_id: Uuid) -> StoreResult<Option<Capability>> {
        Ok(self.read()?.capabilities.get(&cap_id).cloned())
    }

    async fn find_capabilities(&self, cap_ids: &[Uuid]) -> StoreResult<Vec<Capability>> {
        let state = self.read()?;
        Ok(cap_ids
            .iter()
            .filter_map(|id| state.capabilities.get(id).cloned())
            .collect())
    }

    async fn find_space_roles_for_user(
        &self,
        user_id: Uuid,
        space_id: Option<Uuid>,
    ) -> StoreResult<Vec<SpaceRole>> {
        let state = self.read()?;
        Ok(state
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id && space_id.map_or(true, |s| m.space_id == s))
            .filter_map(|m| state.space_roles.get(&m.role_id).cloned())
            .collect())
    }

    async fn find_effective_grant(
        &self,
        user_id: Uuid,
        cap_id: Uuid,
        grant_type: GrantType,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Grant>> {
        let state = self.read()?;
        let found = state
            .grants
            .values()
            .filter(|g| {
                g.user_id == user_id
                    && g.cap_id == Some(cap_id)
                    && g.grant_type() == grant_type
                    && g.is_effective(now)
            })
            .max_by_key(|g| g.created_utc)
            .cloned();
        Ok(found)
    }

    async fn find_effective_grants(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<Vec<Grant>> {
        Ok(self
            .read()?
            .grants
            .values()
            .filter(|g| g.user_id == user_id && g.is_effective(now))
            .cloned()
            .collect())
    }

    async fn find_grant(&self, grant_id: Uuid) -> StoreResult<Option<Grant>> {
        Ok(self.read()?.grants.get(&grant_id).cloned())
    }

    async fn insert_grant(&self, grant: &Grant) -> StoreResult<()> {
        self.write()?.grants.insert(grant.grant_id, grant.clone());
        Ok(())
    }

    async fn revoke_grant(&self, grant_id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Grant>> {
        let mut state = self.write()?;
        match state.grants.get_mut(&grant_id) {
            Some(grant) if grant.status() == GrantStatus::Active => {
                grant.status_code = GrantStatus::Revoked.as_str().to_string();
                grant.revoked_utc = Some(now);
                Ok(Some(grant.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn expire_due_grants(&self, now: DateTime<Utc>) -> StoreResult<Vec<Grant>> {
        let mut state = self.write()?;
        let mut expired = Vec::new();
        for grant in state.grants.values_mut() {
            if grant.is_due_for_expiry(now) {
                grant.status_code = GrantStatus::Expired.as_str().to_string();
                expired.push(grant.clone());
            }
        }
        Ok(expired)
    }

    async fn count_effective_grants(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        Ok(self
            .read()?
            .grants
            .values()
            .filter(|g| g.is_effective(now))
            .count() as u64)
    }

    async fn insert_grant_request(&self, request: &GrantRequest) -> StoreResult<()> {
        self.write()?
            .grant_requests
            .insert(request.request_id, request.clone());
        Ok(())
    }

    async fn find_grant_request(&self, request_id: Uuid) -> StoreResult<Option<GrantRequest>> {
        Ok(self.read()?.grant_requests.get(&request_id).cloned())
    }

    async fn find_grant_requests_by_requester(&self, requester_id: Uuid) -> StoreResult<Vec<GrantRequest>> {
        let requests: Vec<_> = self
            .read()?
            .grant_requests
            .values()
            .filter(|r| r.requester_id == requester_id)
            .cloned()
            .collect();
        Ok(sorted_by_created(requests, |r: &GrantRequest| r.created_utc))
    }

    async fn find_pending_grant_requests(&self, space_id: Option<Uuid>) -> StoreResult<Vec<GrantRequest>> {
        let requests: Vec<_> = self
            .read()?
            .grant_requests
            .values()
            .filter(|r| {
                r.status() == GrantRequestStatus::Pending
                    && space_id.map_or(true, |s| r.space_id == Some(s))
            })
            .cloned()
            .collect();
        Ok(sorted_by_created(requests, |r: &GrantRequest| r.created_utc))
    }

    async fn approve_grant_request(
        &self,
        request_id: Uuid,
        reviewer_id: Uuid,
        now: DateTime<Utc>,
        grant: &Grant,
    ) -> StoreResult<Option<GrantRequest>> {
        let mut state = self.write()?;
        let approved = match state.grant_requests.get_mut(&request_id) {
            Some(request) if request.status() == GrantRequestStatus::Pending => {
                request.status_code = GrantRequestStatus::Approved.as_str().to_string();
                request.approved_by = Some(reviewer_id);
                request.approved_utc = Some(now);
                request.clone()
            }
            _ => return Ok(None),
        };
        state.grants.insert(grant.grant_id, grant.clone());
        Ok(Some(approved))
    }

    async fn reject_grant_request(
        &self,
        request_id: Uuid,
        reviewer_id: Uuid,
        now: DateTime<Utc>,
        reason: &str,
    ) -> StoreResult<Option<GrantRequest>> {
        let mut state = self.write()?;
        match state.grant_requests.get_mut(&request_id) {
            Some(request) if request.status() == GrantRequestStatus::Pending => {
                request.status_code = GrantRequestStatus::Rejected.as_str().to_string();
                request.rejected_by = Some(reviewer_id);
                request.rejected_utc = Some(now);
                request.rejection_reason = Some(reason.to_string());
                Ok(Some(request.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn count_grant_requests_since(&self, since: DateTime<Utc>) -> StoreResult<u64> {
        Ok(self
            .read()?
            .grant_requests
            .values()
            .filter(|r| r.created_utc >= since)
            .count() as u64)
    }

    async fn find_active_policies_for_target(
        &self,
        target_type: PolicyTargetType,
        target_id: Option<Uuid>,
    ) -> StoreResult<Vec<Policy>> {
        let policies: Vec<_> = self
            .read()?
            .policies
            .values()
            .filter(|p| {
                p.is_active && p.target_type_code == target_type.as_str() && p.target_id == target_id
            })
            .cloned()
            .collect();
        Ok(sorted_by_created(policies, |p: &Policy| p.created_utc))
    }

    async fn find_policy(&self, policy_id: Uuid) -> StoreResult<Option<Policy>> {
        Ok(self.read()?.policies.get(&policy_id).cloned())
    }

    async fn list_policies(&self, filter: &PolicyFilter) -> StoreResult<Vec<Policy>> {
        let policies: Vec<_> = self
            .read()?
            .policies
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        Ok(sorted_by_created(policies, |p: &Policy| p.created_utc))
    }

    async fn insert_policy(&self, policy: &Policy) -> StoreResult<()> {
        self.write()?.policies.insert(policy.policy_id, policy.clone());
        Ok(())
    }

    async fn update_policy(&self, policy: &Policy) -> StoreResult<bool> {
        let mut state = self.write()?;
        match state.policies.get_mut(&policy.policy_id) {
            Some(existing) => {
                *existing = policy.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_policy(&self, policy_id: Uuid) -> StoreResult<bool> {
        Ok(self.write()?.policies.remove(&policy_id).is_some())
    }

    async fn find_device(&self, device_id: &str) -> StoreResult<Option<DeviceRecord>> {
        Ok(self.read()?.devices.get(device_id).cloned())
    }

    async fn record_device_sighting(&self, device: &DeviceRecord) -> StoreResult<DeviceRecord> {
        let mut state = self.write()?;
        let stored = state
            .devices
            .entry(device.device_id.clone())
            .and_modify(|d| d.last_seen_utc = device.last_seen_utc)
            .or_insert_with(|| device.clone());
        Ok(stored.clone())
    }

    async fn set_device_trust(&self, device_id: &str, trusted: bool) -> StoreResult<bool> {
        let mut state = self.write()?;
        match state.devices.get_mut(device_id) {
            Some(device) => {
                device.is_trusted = trusted;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn start_impersonation_session(&self, session: &ImpersonationSession) -> StoreResult<u64> {
        let mut state = self.write()?;
        let mut ended = 0;
        for existing in state.sessions.values_mut() {
            if existing.impersonator_id == session.impersonator_id
                && existing.status() == ImpersonationStatus::Active
            {
                existing.status_code = ImpersonationStatus::Ended.as_str().to_string();
                existing.ended_utc = Some(session.started_utc);
                ended += 1;
            }
        }
        state.sessions.insert(session.session_id, session.clone());
        Ok(ended)
    }

    async fn find_impersonation_session(&self, session_id: Uuid) -> StoreResult<Option<ImpersonationSession>> {
        Ok(self.read()?.sessions.get(&session_id).cloned())
    }

    async fn find_active_impersonation_session(
        &self,
        impersonator_id: Uuid,
    ) -> StoreResult<Option<ImpersonationSession>> {
        Ok(self
            .read()?
            .sessions
            .values()
            .find(|s| s.impersonator_id == impersonator_id && s.status() == ImpersonationStatus::Active)
            .cloned())
    }

    async fn end_impersonation_session(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ImpersonationSession>> {
        let mut state = self.write()?;
        match state.sessions.get_mut(&session_id) {
            Some(session) if session.status() == ImpersonationStatus::Active => {
                session.status_code = ImpersonationStatus::Ended.as_str().to_string();
                session.ended_utc = Some(now);
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn expire_impersonation_session(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ImpersonationSession>> {
        let mut state = self.write()?;
        match state.sessions.get_mut(&session_id) {
            Some(session) if session.status() == ImpersonationStatus::Active => {
                session.status_code = ImpersonationStatus::Expired.as_str().to_string();
                session.ended_utc = Some(now);
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn expire_due_impersonation_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ImpersonationSession>> {
        let mut state = self.write()?;
        let mut expired = Vec::new();
        for session in state.sessions.values_mut() {
            if session.status() == ImpersonationStatus::Active && session.expires_utc <= now {
                session.status_code = ImpersonationStatus::Expired.as_str().to_string();
                session.ended_utc = Some(now);
                expired.push(session.clone());
            }
        }
        Ok(expired)
    }

    async fn count_impersonation_sessions_since(&self, since: DateTime<Utc>) -> StoreResult<u64> {
        Ok(self
            .read()?
            .sessions
            .values()
            .filter(|s| s.started_utc >= since)
            .count() as u64)
    }

    async fn insert_security_request(&self, request: &SecurityRequest) -> StoreResult<()> {
        self.write()?
            .security_requests
            .insert(request.request_id, request.clone());
        Ok(())
    }

    async fn find_security_request(&self, request_id: Uuid) -> StoreResult<Option<SecurityRequest>> {
        Ok(self.read()?.security_requests.get(&request_id).cloned())
    }

    async fn find_pending_security_requests(&self) -> StoreResult<Vec<SecurityRequest>> {
        let requests: Vec<_> = self
            .read()?
            .security_requests
            .values()
            .filter(|r| r.status() == SecurityRequestStatus::Pending)
            .cloned()
            .collect();
        Ok(sorted_by_created(requests, |r: &SecurityRequest| r.created_utc))
    }

    async fn approve_security_request(
        &self,
        request_id: Uuid,
        reviewer_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SecurityRequest>> {
        let mut state = self.write()?;
        match state.security_requests.get_mut(&request_id) {
            Some(request) if request.status() == SecurityRequestStatus::Pending => {
                request.status_code = SecurityRequestStatus::Approved.as_str().to_string();
                request.approved_by = Some(reviewer_id);
                request.approved_utc = Some(now);
                Ok(Some(request.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn reject_security_request(
        &self,
        request_id: Uuid,
        reviewer_id: Uuid,
        now: DateTime<Utc>,
        reason: &str,
    ) -> StoreResult<Option<SecurityRequest>> {
        let mut state = self.write()?;
        match state.security_requests.get_mut(&request_id) {
            Some(request) if request.status() == SecurityRequestStatus::Pending => {
                request.status_code = SecurityRequestStatus::Rejected.as_str().to_string();
                request.rejected_by = Some(reviewer_id);
                request.rejected_utc = Some(now);
                request.rejection_reason = Some(reason.to_string());
                Ok(Some(request.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn execute_security_request(
        &self,
        request_id: Uuid,
        executor_id: Uuid,
        now: DateTime<Utc>,
        effect: SecurityEffect,
    ) -> StoreResult<Option<SecurityRequest>> {
        let mut state = self.write()?;
        let approved = state
            .security_requests
            .get(&request_id)
            .is_some_and(|r| r.status() == SecurityRequestStatus::Approved);
        if !approved {
            return Ok(None);
        }

        match effect {
            SecurityEffect::ResetTwoFactor { user_id } => {
                let user = state
                    .users
                    .get_mut(&user_id)
                    .ok_or_else(|| StoreError::Corrupt(format!("target user {} missing", user_id)))?;
                user.two_factor_enabled = false;
                user.two_factor_secret = None;
            }
        }

        let request = state
            .security_requests
            .get_mut(&request_id)
            .ok_or_else(|| StoreError::Corrupt(format!("security request {} vanished", request_id)))?;
        request.status_code = SecurityRequestStatus::Executed.as_str().to_string();
        request.executed_by = Some(executor_id);
        request.executed_utc = Some(now);
        Ok(Some(request.clone()))
    }

    async fn insert_audit_event(&self, event: &AuditEvent) -> StoreResult<()> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected audit failure".to_string()));
        }
        self.state()?.audit_events.push(event.clone());
        Ok(())
    }

    async fn count_denied_checks_since(&self, since: DateTime<Utc>) -> StoreResult<u64> {
        Ok(self
            .read()?
            .audit_events
            .iter()
            .filter(|e| {
                e.kind_is(AuditEventKind::CapabilityCheck) && e.is_denied() && e.created_utc >= since
            })
            .count() as u64)
    }
}
