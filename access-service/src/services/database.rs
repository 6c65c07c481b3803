//! PostgreSQL implementation of `AccessStore`.
//!
//! Guarded transitions are `UPDATE ... WHERE status_code = <expected>
//! RETURNING *` so a lost race returns no row instead of double-applying.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPool};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::Postgres;
use uuid::Uuid;

use super::store::{AccessStore, StoreError, StoreResult};
use crate::models::{
    AuditEvent, Capability, DeviceRecord, Grant, GrantRequest, GrantType, ImpersonationSession,
    Policy, PolicyFilter, PolicyTargetType, SecurityEffect, SecurityRequest, SpaceRole, User,
    UserRole,
};

/// PostgreSQL store.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

fn count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

fn insert_grant_query(grant: &Grant) -> Query<'_, Postgres, PgArguments> {
    sqlx::query(
        r#"
        INSERT INTO grants (grant_id, user_id, cap_id, space_id, grant_type_code, access_level_code,
                            scope_code, status_code, justification, granted_by, grant_request_id,
                            expires_utc, revoked_utc, created_utc)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(grant.grant_id)
    .bind(grant.user_id)
    .bind(grant.cap_id)
    .bind(grant.space_id)
    .bind(&grant.grant_type_code)
    .bind(&grant.access_level_code)
    .bind(&grant.scope_code)
    .bind(&grant.status_code)
    .bind(&grant.justification)
    .bind(grant.granted_by)
    .bind(grant.grant_request_id)
    .bind(grant.expires_utc)
    .bind(grant.revoked_utc)
    .bind(grant.created_utc)
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check - ping the database.
    pub async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!(error = %e, "Database health check failed");
            StoreError::Database(e)
        })?;
        Ok(())
    }
}

#[async_trait]
impl AccessStore for Database {
    // ==================== Users & Capabilities ====================

    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_users_by_role(&self, role: UserRole) -> StoreResult<Vec<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE role_code = $1")
            .bind(role.as_str())
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_capability_by_key(&self, cap_key: &str) -> StoreResult<Option<Capability>> {
        Ok(
            sqlx::query_as::<_, Capability>("SELECT * FROM capabilities WHERE cap_key = $1")
                .bind(cap_key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_capability(&self, cap_id: Uuid) -> StoreResult<Option<Capability>> {
        Ok(
            sqlx::query_as::<_, Capability>("SELECT * FROM capabilities WHERE cap_id = $1")
                .bind(cap_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_capabilities(&self, cap_ids: &[Uuid]) -> StoreResult<Vec<Capability>> {
        Ok(
            sqlx::query_as::<_, Capability>("SELECT * FROM capabilities WHERE cap_id = ANY($1)")
                .bind(cap_ids)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    // ==================== Space Roles ====================

    async fn find_space_roles_for_user(
        &self,
        user_id: Uuid,
        space_id: Option<Uuid>,
    ) -> StoreResult<Vec<SpaceRole>> {
        let mut roles = sqlx::query_as::<_, SpaceRole>(
            r#"
            SELECT DISTINCT r.*
            FROM space_roles r
            JOIN user_space_roles m ON m.role_id = r.role_id
            WHERE m.user_id = $1 AND ($2::uuid IS NULL OR m.space_id = $2)
            "#,
        )
        .bind(user_id)
        .bind(space_id)
        .fetch_all(&self.pool)
        .await?;

        if roles.is_empty() {
            return Ok(roles);
        }

        let role_ids: Vec<Uuid> = roles.iter().map(|r| r.role_id).collect();
        let mappings = sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT role_id, cap_id FROM space_role_capabilities WHERE role_id = ANY($1)",
        )
        .bind(&role_ids[..])
        .fetch_all(&self.pool)
        .await?;

        for role in roles.iter_mut() {
            role.cap_ids = mappings
                .iter()
                .filter(|(role_id, _)| *role_id == role.role_id)
                .map(|(_, cap_id)| *cap_id)
                .collect();
        }
        Ok(roles)
    }

    // ==================== Grants ====================

    async fn find_effective_grant(
        &self,
        user_id: Uuid,
        cap_id: Uuid,
        grant_type: GrantType,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Grant>> {
        Ok(sqlx::query_as::<_, Grant>(
            r#"
            SELECT * FROM grants
            WHERE user_id = $1 AND cap_id = $2 AND grant_type_code = $3
              AND status_code = 'ACTIVE'
              AND (expires_utc IS NULL OR expires_utc > $4)
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(cap_id)
        .bind(grant_type.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_effective_grants(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<Vec<Grant>> {
        Ok(sqlx::query_as::<_, Grant>(
            r#"
            SELECT * FROM grants
            WHERE user_id = $1 AND status_code = 'ACTIVE'
              AND (expires_utc IS NULL OR expires_utc > $2)
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_grant(&self, grant_id: Uuid) -> StoreResult<Option<Grant>> {
        Ok(sqlx::query_as::<_, Grant>("SELECT * FROM grants WHERE grant_id = $1")
            .bind(grant_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn insert_grant(&self, grant: &Grant) -> StoreResult<()> {
        insert_grant_query(grant).execute(&self.pool).await?;
        Ok(())
    }

    async fn revoke_grant(&self, grant_id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Grant>> {
        Ok(sqlx::query_as::<_, Grant>(
            r#"
            UPDATE grants SET status_code = 'REVOKED', revoked_utc = $2
            WHERE grant_id = $1 AND status_code = 'ACTIVE'
            RETURNING *
            "#,
        )
        .bind(grant_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn expire_due_grants(&self, now: DateTime<Utc>) -> StoreResult<Vec<Grant>> {
        Ok(sqlx::query_as::<_, Grant>(
            r#"
            UPDATE grants SET status_code = 'EXPIRED'
            WHERE status_code = 'ACTIVE' AND expires_utc < $1
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn count_effective_grants(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let n: i64 = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM grants
            WHERE status_code = 'ACTIVE' AND (expires_utc IS NULL OR expires_utc > $1)
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count(n))
    }

    // ==================== Grant Requests ====================

    async fn insert_grant_request(&self, request: &GrantRequest) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO grant_requests (request_id, requester_id, space_id, cap_id, justification,
                                        requested_days, access_level_code, scope_code, status_code,
                                        created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(request.request_id)
        .bind(request.requester_id)
        .bind(request.space_id)
        .bind(request.cap_id)
        .bind(&request.justification)
        .bind(request.requested_days)
        .bind(&request.access_level_code)
        .bind(&request.scope_code)
        .bind(&request.status_code)
        .bind(request.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_grant_request(&self, request_id: Uuid) -> StoreResult<Option<GrantRequest>> {
        Ok(
            sqlx::query_as::<_, GrantRequest>("SELECT * FROM grant_requests WHERE request_id = $1")
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_grant_requests_by_requester(&self, requester_id: Uuid) -> StoreResult<Vec<GrantRequest>> {
        Ok(sqlx::query_as::<_, GrantRequest>(
            "SELECT * FROM grant_requests WHERE requester_id = $1 ORDER BY created_utc DESC",
        )
        .bind(requester_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_pending_grant_requests(&self, space_id: Option<Uuid>) -> StoreResult<Vec<GrantRequest>> {
        Ok(sqlx::query_as::<_, GrantRequest>(
            r#"
            SELECT * FROM grant_requests
            WHERE status_code = 'PENDING' AND ($1::uuid IS NULL OR space_id = $1)
            ORDER BY created_utc DESC
            "#,
        )
        .bind(space_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn approve_grant_request(
        &self,
        request_id: Uuid,
        reviewer_id: Uuid,
        now: DateTime<Utc>,
        grant: &Grant,
    ) -> StoreResult<Option<GrantRequest>> {
        let mut tx = self.pool.begin().await?;

        let approved = sqlx::query_as::<_, GrantRequest>(
            r#"
            UPDATE grant_requests
            SET status_code = 'APPROVED', approved_by = $2, approved_utc = $3
            WHERE request_id = $1 AND status_code = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(request_id)
        .bind(reviewer_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(approved) = approved else {
            tx.rollback().await?;
            return Ok(None);
        };

        insert_grant_query(grant).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(Some(approved))
    }

    async fn reject_grant_request(
        &self,
        request_id: Uuid,
        reviewer_id: Uuid,
        now: DateTime<Utc>,
        reason: &str,
    ) -> StoreResult<Option<GrantRequest>> {
        Ok(sqlx::query_as::<_, GrantRequest>(
            r#"
            UPDATE grant_requests
            SET status_code = 'REJECTED', rejected_by = $2, rejected_utc = $3, rejection_reason = $4
            WHERE request_id = $1 AND status_code = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(request_id)
        .bind(reviewer_id)
        .bind(now)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn count_grant_requests_since(&self, since: DateTime<Utc>) -> StoreResult<u64> {
        let n: i64 = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM grant_requests WHERE created_utc >= $1")
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
        Ok(count(n))
    }

    // ==================== Policies ====================

    async fn find_active_policies_for_target(
        &self,
        target_type: PolicyTargetType,
        target_id: Option<Uuid>,
    ) -> StoreResult<Vec<Policy>> {
        Ok(sqlx::query_as::<_, Policy>(
            r#"
            SELECT * FROM policies
            WHERE is_active AND target_type_code = $1 AND target_id IS NOT DISTINCT FROM $2
            ORDER BY created_utc DESC
            "#,
        )
        .bind(target_type.as_str())
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_policy(&self, policy_id: Uuid) -> StoreResult<Option<Policy>> {
        Ok(sqlx::query_as::<_, Policy>("SELECT * FROM policies WHERE policy_id = $1")
            .bind(policy_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_policies(&self, filter: &PolicyFilter) -> StoreResult<Vec<Policy>> {
        Ok(sqlx::query_as::<_, Policy>(
            r#"
            SELECT * FROM policies
            WHERE ($1::text IS NULL OR target_type_code = $1)
              AND ($2::uuid IS NULL OR target_id = $2)
              AND (NOT $3 OR is_active)
            ORDER BY created_utc DESC
            "#,
        )
        .bind(filter.target_type.map(|t| t.as_str()))
        .bind(filter.target_id)
        .bind(filter.active_only.unwrap_or(false))
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_policy(&self, policy: &Policy) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO policies (policy_id, policy_name, description, kind_code, target_type_code,
                                  target_id, enforcement_code, conditions, is_active, created_utc,
                                  updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(policy.policy_id)
        .bind(&policy.policy_name)
        .bind(&policy.description)
        .bind(policy.kind().as_str())
        .bind(&policy.target_type_code)
        .bind(policy.target_id)
        .bind(&policy.enforcement_code)
        .bind(Json(&policy.conditions))
        .bind(policy.is_active)
        .bind(policy.created_utc)
        .bind(policy.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_policy(&self, policy: &Policy) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE policies
            SET policy_name = $2, description = $3, kind_code = $4, enforcement_code = $5,
                conditions = $6, is_active = $7, updated_utc = $8
            WHERE policy_id = $1
            "#,
        )
        .bind(policy.policy_id)
        .bind(&policy.policy_name)
        .bind(&policy.description)
        .bind(policy.kind().as_str())
        .bind(&policy.enforcement_code)
        .bind(Json(&policy.conditions))
        .bind(policy.is_active)
        .bind(policy.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_policy(&self, policy_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM policies WHERE policy_id = $1")
            .bind(policy_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ==================== Devices ====================

    async fn find_device(&self, device_id: &str) -> StoreResult<Option<DeviceRecord>> {
        Ok(sqlx::query_as::<_, DeviceRecord>("SELECT * FROM devices WHERE device_id = $1")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn record_device_sighting(&self, device: &DeviceRecord) -> StoreResult<DeviceRecord> {
        Ok(sqlx::query_as::<_, DeviceRecord>(
            r#"
            INSERT INTO devices (device_id, user_id, device_name, device_type_code, is_trusted,
                                 first_seen_utc, last_seen_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (device_id) DO UPDATE SET last_seen_utc = EXCLUDED.last_seen_utc
            RETURNING *
            "#,
        )
        .bind(&device.device_id)
        .bind(device.user_id)
        .bind(&device.device_name)
        .bind(&device.device_type_code)
        .bind(device.is_trusted)
        .bind(device.first_seen_utc)
        .bind(device.last_seen_utc)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn set_device_trust(&self, device_id: &str, trusted: bool) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE devices SET is_trusted = $2 WHERE device_id = $1")
            .bind(device_id)
            .bind(trusted)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ==================== Impersonation ====================

    async fn start_impersonation_session(&self, session: &ImpersonationSession) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        // Serialises concurrent starts by the same impersonator across instances.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(session.impersonator_id)
            .execute(&mut *tx)
            .await?;

        let ended = sqlx::query(
            r#"
            UPDATE impersonation_sessions SET status_code = 'ENDED', ended_utc = $2
            WHERE impersonator_id = $1 AND status_code = 'ACTIVE'
            "#,
        )
        .bind(session.impersonator_id)
        .bind(session.started_utc)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            r#"
            INSERT INTO impersonation_sessions (session_id, impersonator_id, impersonated_id,
                                                justification, ip_address, user_agent, status_code,
                                                started_utc, expires_utc, ended_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(session.session_id)
        .bind(session.impersonator_id)
        .bind(session.impersonated_id)
        .bind(&session.justification)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(&session.status_code)
        .bind(session.started_utc)
        .bind(session.expires_utc)
        .bind(session.ended_utc)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ended)
    }

    async fn find_impersonation_session(&self, session_id: Uuid) -> StoreResult<Option<ImpersonationSession>> {
        Ok(sqlx::query_as::<_, ImpersonationSession>(
            "SELECT * FROM impersonation_sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_active_impersonation_session(
        &self,
        impersonator_id: Uuid,
    ) -> StoreResult<Option<ImpersonationSession>> {
        Ok(sqlx::query_as::<_, ImpersonationSession>(
            r#"
            SELECT * FROM impersonation_sessions
            WHERE impersonator_id = $1 AND status_code = 'ACTIVE'
            ORDER BY started_utc DESC
            LIMIT 1
            "#,
        )
        .bind(impersonator_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn end_impersonation_session(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ImpersonationSession>> {
        Ok(sqlx::query_as::<_, ImpersonationSession>(
            r#"
            UPDATE impersonation_sessions SET status_code = 'ENDED', ended_utc = $2
            WHERE session_id = $1 AND status_code = 'ACTIVE'
            RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn expire_impersonation_session(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ImpersonationSession>> {
        Ok(sqlx::query_as::<_, ImpersonationSession>(
            r#"
            UPDATE impersonation_sessions SET status_code = 'EXPIRED', ended_utc = $2
            WHERE session_id = $1 AND status_code = 'ACTIVE'
            RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn expire_due_impersonation_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ImpersonationSession>> {
        Ok(sqlx::query_as::<_, ImpersonationSession>(
            r#"
            UPDATE impersonation_sessions SET status_code = 'EXPIRED', ended_utc = $1
            WHERE status_code = 'ACTIVE' AND expires_utc <= $1
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn count_impersonation_sessions_since(&self, since: DateTime<Utc>) -> StoreResult<u64> {
        let n: i64 =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM impersonation_sessions WHERE started_utc >= $1")
                .bind(since)
                .fetch_one(&self.pool)
                .await?;
        Ok(count(n))
    }

    // ==================== Security Requests ====================

    async fn insert_security_request(&self, request: &SecurityRequest) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO security_requests (request_id, request_type_code, requester_id,
                                           target_user_id, justification, status_code, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(request.request_id)
        .bind(&request.request_type_code)
        .bind(request.requester_id)
        .bind(request.target_user_id)
        .bind(&request.justification)
        .bind(&request.status_code)
        .bind(request.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_security_request(&self, request_id: Uuid) -> StoreResult<Option<SecurityRequest>> {
        Ok(sqlx::query_as::<_, SecurityRequest>(
            "SELECT * FROM security_requests WHERE request_id = $1",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_pending_security_requests(&self) -> StoreResult<Vec<SecurityRequest>> {
        Ok(sqlx::query_as::<_, SecurityRequest>(
            "SELECT * FROM security_requests WHERE status_code = 'PENDING' ORDER BY created_utc DESC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn approve_security_request(
        &self,
        request_id: Uuid,
        reviewer_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SecurityRequest>> {
        Ok(sqlx::query_as::<_, SecurityRequest>(
            r#"
            UPDATE security_requests
            SET status_code = 'APPROVED', approved_by = $2, approved_utc = $3
            WHERE request_id = $1 AND status_code = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(request_id)
        .bind(reviewer_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn reject_security_request(
        &self,
        request_id: Uuid,
        reviewer_id: Uuid,
        now: DateTime<Utc>,
        reason: &str,
    ) -> StoreResult<Option<SecurityRequest>> {
        Ok(sqlx::query_as::<_, SecurityRequest>(
            r#"
            UPDATE security_requests
            SET status_code = 'REJECTED', rejected_by = $2, rejected_utc = $3, rejection_reason = $4
            WHERE request_id = $1 AND status_code = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(request_id)
        .bind(reviewer_id)
        .bind(now)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn execute_security_request(
        &self,
        request_id: Uuid,
        executor_id: Uuid,
        now: DateTime<Utc>,
        effect: SecurityEffect,
    ) -> StoreResult<Option<SecurityRequest>> {
        let mut tx = self.pool.begin().await?;

        let executed = sqlx::query_as::<_, SecurityRequest>(
            r#"
            UPDATE security_requests
            SET status_code = 'EXECUTED', executed_by = $2, executed_utc = $3
            WHERE request_id = $1 AND status_code = 'APPROVED'
            RETURNING *
            "#,
        )
        .bind(request_id)
        .bind(executor_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(executed) = executed else {
            tx.rollback().await?;
            return Ok(None);
        };

        match effect {
            SecurityEffect::ResetTwoFactor { user_id } => {
                let updated = sqlx::query(
                    r#"
                    UPDATE users SET two_factor_enabled = FALSE, two_factor_secret = NULL
                    WHERE user_id = $1
                    "#,
                )
                .bind(user_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if updated == 0 {
                    tx.rollback().await?;
                    return Err(StoreError::Corrupt(format!("target user {} missing", user_id)));
                }
            }
        }

        tx.commit().await?;
        Ok(Some(executed))
    }

    // ==================== Audit ====================

    async fn insert_audit_event(&self, event: &AuditEvent) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (event_id, event_kind_code, action, actor_user_id, target_id,
                                      cap_id, space_id, grant_id, result_code, reason_code,
                                      ip_address, user_agent, device_id, event_data, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(event.event_id)
        .bind(&event.event_kind_code)
        .bind(&event.action)
        .bind(event.actor_user_id)
        .bind(event.target_id)
        .bind(event.cap_id)
        .bind(event.space_id)
        .bind(event.grant_id)
        .bind(&event.result_code)
        .bind(&event.reason_code)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&event.device_id)
        .bind(&event.event_data)
        .bind(event.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_denied_checks_since(&self, since: DateTime<Utc>) -> StoreResult<u64> {
        let n: i64 = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM audit_events
            WHERE event_kind_code = 'CAPABILITY_CHECK' AND result_code = 'DENIED'
              AND created_utc >= $1
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count(n))
    }
}
