//! Persistence port for access-control state.
//!
//! Every state transition that must be atomic (request approval, 2FA reset
//! execution, impersonation start) is a single method here, guarded by a
//! status compare-and-swap inside the implementation. Methods returning
//! `Option` yield `None` when the guarded precondition did not hold.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AuditEvent, Capability, DeviceRecord, Grant, GrantRequest, GrantType, ImpersonationSession,
    Policy, PolicyFilter, PolicyTargetType, SecurityEffect, SecurityRequest, SpaceRole, User,
    UserRole,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored record is malformed: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait AccessStore: Send + Sync {
    // ==================== Users & Capabilities ====================

    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>>;

    async fn find_users_by_role(&self, role: UserRole) -> StoreResult<Vec<User>>;

    async fn find_capability_by_key(&self, cap_key: &str) -> StoreResult<Option<Capability>>;

    async fn find_capability(&self, cap_id: Uuid) -> StoreResult<Option<Capability>>;

    async fn find_capabilities(&self, cap_ids: &[Uuid]) -> StoreResult<Vec<Capability>>;

    // ==================== Space Roles ====================

    /// Roles the user holds, with their capability ids. `space_id` narrows to one space.
    async fn find_space_roles_for_user(
        &self,
        user_id: Uuid,
        space_id: Option<Uuid>,
    ) -> StoreResult<Vec<SpaceRole>>;

    // ==================== Grants ====================

    /// An ACTIVE, unexpired grant of `grant_type` for the user and capability.
    async fn find_effective_grant(
        &self,
        user_id: Uuid,
        cap_id: Uuid,
        grant_type: GrantType,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Grant>>;

    /// All ACTIVE, unexpired grants of the user.
    async fn find_effective_grants(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<Vec<Grant>>;

    async fn find_grant(&self, grant_id: Uuid) -> StoreResult<Option<Grant>>;

    async fn insert_grant(&self, grant: &Grant) -> StoreResult<()>;

    /// ACTIVE -> REVOKED.
    async fn revoke_grant(&self, grant_id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Grant>>;

    /// ACTIVE grants with `expires_utc < now` -> EXPIRED. Returns the grants moved.
    async fn expire_due_grants(&self, now: DateTime<Utc>) -> StoreResult<Vec<Grant>>;

    async fn count_effective_grants(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    // ==================== Grant Requests ====================

    async fn insert_grant_request(&self, request: &GrantRequest) -> StoreResult<()>;

    async fn find_grant_request(&self, request_id: Uuid) -> StoreResult<Option<GrantRequest>>;

    async fn find_grant_requests_by_requester(&self, requester_id: Uuid) -> StoreResult<Vec<GrantRequest>>;

    async fn find_pending_grant_requests(&self, space_id: Option<Uuid>) -> StoreResult<Vec<GrantRequest>>;

    /// PENDING -> APPROVED and insert `grant`, in one transaction.
    async fn approve_grant_request(
        &self,
        request_id: Uuid,
        reviewer_id: Uuid,
        now: DateTime<Utc>,
        grant: &Grant,
    ) -> StoreResult<Option<GrantRequest>>;

    /// PENDING -> REJECTED.
    async fn reject_grant_request(
        &self,
        request_id: Uuid,
        reviewer_id: Uuid,
        now: DateTime<Utc>,
        reason: &str,
    ) -> StoreResult<Option<GrantRequest>>;

    async fn count_grant_requests_since(&self, since: DateTime<Utc>) -> StoreResult<u64>;

    // ==================== Policies ====================

    async fn find_active_policies_for_target(
        &self,
        target_type: PolicyTargetType,
        target_id: Option<Uuid>,
    ) -> StoreResult<Vec<Policy>>;

    async fn find_policy(&self, policy_id: Uuid) -> StoreResult<Option<Policy>>;

    async fn list_policies(&self, filter: &PolicyFilter) -> StoreResult<Vec<Policy>>;

    async fn insert_policy(&self, policy: &Policy) -> StoreResult<()>;

    /// Returns false when the policy does not exist.
    async fn update_policy(&self, policy: &Policy) -> StoreResult<bool>;

    async fn delete_policy(&self, policy_id: Uuid) -> StoreResult<bool>;

    // ==================== Devices ====================

    async fn find_device(&self, device_id: &str) -> StoreResult<Option<DeviceRecord>>;

    /// Insert the device if unseen, otherwise bump `last_seen_utc`. Returns the stored record.
    async fn record_device_sighting(&self, device: &DeviceRecord) -> StoreResult<DeviceRecord>;

    async fn set_device_trust(&self, device_id: &str, trusted: bool) -> StoreResult<bool>;

    // ==================== Impersonation ====================

    /// End every ACTIVE session of the impersonator (ENDED, `ended_utc` =
    /// session start) and insert `session`, in one transaction.
    /// Returns the number of sessions ended.
    async fn start_impersonation_session(&self, session: &ImpersonationSession) -> StoreResult<u64>;

    async fn find_impersonation_session(&self, session_id: Uuid) -> StoreResult<Option<ImpersonationSession>>;

    /// The ACTIVE session of the impersonator, whether or not it is past expiry.
    async fn find_active_impersonation_session(
        &self,
        impersonator_id: Uuid,
    ) -> StoreResult<Option<ImpersonationSession>>;

    /// ACTIVE -> ENDED.
    async fn end_impersonation_session(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ImpersonationSession>>;

    /// ACTIVE -> EXPIRED.
    async fn expire_impersonation_session(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ImpersonationSession>>;

    /// ACTIVE sessions with `expires_utc <= now` -> EXPIRED.
    async fn expire_due_impersonation_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ImpersonationSession>>;

    async fn count_impersonation_sessions_since(&self, since: DateTime<Utc>) -> StoreResult<u64>;

    // ==================== Security Requests ====================

    async fn insert_security_request(&self, request: &SecurityRequest) -> StoreResult<()>;

    async fn find_security_request(&self, request_id: Uuid) -> StoreResult<Option<SecurityRequest>>;

    async fn find_pending_security_requests(&self) -> StoreResult<Vec<SecurityRequest>>;

    /// PENDING -> APPROVED.
    async fn approve_security_request(
        &self,
        request_id: Uuid,
        reviewer_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SecurityRequest>>;

    /// PENDING -> REJECTED.
    async fn reject_security_request(
        &self,
        request_id: Uuid,
        reviewer_id: Uuid,
        now: DateTime<Utc>,
        reason: &str,
    ) -> StoreResult<Option<SecurityRequest>>;

    /// APPROVED -> EXECUTED and apply `effect`, in one transaction.
    async fn execute_security_request(
        &self,
        request_id: Uuid,
        executor_id: Uuid,
        now: DateTime<Utc>,
        effect: SecurityEffect,
    ) -> StoreResult<Option<SecurityRequest>>;

    // ==================== Audit ====================

    async fn insert_audit_event(&self, event: &AuditEvent) -> StoreResult<()>;

    async fn count_denied_checks_since(&self, since: DateTime<Utc>) -> StoreResult<u64>;
}
