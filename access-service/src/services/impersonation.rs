//! Impersonation sessions - time-boxed, audited "act as" sessions.
//!
//! An impersonator has at most one ACTIVE session. Starts for the same
//! impersonator are serialised in-process by a keyed async mutex; the store
//! transition itself ends prior sessions and inserts the new one atomically.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;
use validator::Validate;

use super::audit::AuditRecorder;
use super::clock::Clock;
use super::error::ServiceError;
use super::store::AccessStore;
use crate::models::{
    AuditEvent, AuditEventKind, ImpersonationSession, ImpersonationStatus, RequestContext,
    StartImpersonationRequest,
};

pub struct ImpersonationSessionManager {
    store: Arc<dyn AccessStore>,
    audit: Arc<AuditRecorder>,
    clock: Arc<dyn Clock>,
    start_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ImpersonationSessionManager {
    pub fn new(store: Arc<dyn AccessStore>, audit: Arc<AuditRecorder>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            audit,
            clock,
            start_locks: DashMap::new(),
        }
    }

    fn start_lock(&self, impersonator_id: Uuid) -> Arc<Mutex<()>> {
        self.start_locks
            .entry(impersonator_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn start_session(
        &self,
        impersonator_id: Uuid,
        input: StartImpersonationRequest,
        ctx: &RequestContext,
    ) -> Result<ImpersonationSession, ServiceError> {
        input.validate()?;
        if input.impersonated_id == impersonator_id {
            return Err(ServiceError::Validation("cannot impersonate yourself".to_string()));
        }
        if self.store.find_user(input.impersonated_id).await?.is_none() {
            return Err(ServiceError::NotFound("user"));
        }

        let lock = self.start_lock(impersonator_id);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let session = ImpersonationSession::new(
            impersonator_id,
            input.impersonated_id,
            input.justification,
            ctx.ip.clone(),
            ctx.user_agent.clone(),
            now,
        );
        let ended = self.store.start_impersonation_session(&session).await?;

        tracing::warn!(
            session_id = %session.session_id,
            impersonator_id = %impersonator_id,
            impersonated_id = %session.impersonated_id,
            ended_previous = ended,
            "Impersonation session started"
        );
        self.audit
            .record(
                AuditEvent::new(AuditEventKind::Impersonation, "impersonation.start", Some(impersonator_id), now)
                    .with_target(session.impersonated_id)
                    .with_client(ctx.ip.clone(), ctx.user_agent.clone())
                    .with_data(json!({
                        "session_id": session.session_id,
                        "justification": session.justification,
                        "expires_utc": session.expires_utc,
                        "ended_previous": ended,
                    })),
            )
            .await;

        Ok(session)
    }

    /// End an ACTIVE session. Only its impersonator may end it.
    pub async fn stop_session(
        &self,
        actor_id: Uuid,
        session_id: Uuid,
    ) -> Result<ImpersonationSession, ServiceError> {
        let session = self
            .store
            .find_impersonation_session(session_id)
            .await?
            .ok_or(ServiceError::NotFound("impersonation session"))?;
        if session.impersonator_id != actor_id {
            return Err(ServiceError::Forbidden(
                "only the impersonator can end this session".to_string(),
            ));
        }
        if session.status() != ImpersonationStatus::Active {
            return Err(ServiceError::InvalidState(format!(
                "impersonation session is already {}",
                session.status_code
            )));
        }

        let now = self.clock.now();
        let ended = self
            .store
            .end_impersonation_session(session_id, now)
            .await?
            .ok_or_else(|| ServiceError::InvalidState("impersonation session is no longer active".to_string()))?;

        tracing::info!(
            session_id = %session_id,
            impersonator_id = %ended.impersonator_id,
            "Impersonation session ended"
        );
        self.audit
            .record(
                AuditEvent::new(
                    AuditEventKind::Impersonation,
                    "impersonation.stop",
                    Some(ended.impersonator_id),
                    now,
                )
                .with_target(ended.impersonated_id)
                .with_data(json!({ "session_id": session_id })),
            )
            .await;

        Ok(ended)
    }

    /// The impersonator's live session. A session found past its expiry is
    /// flagged EXPIRED on the spot and not returned.
    pub async fn get_active_session(
        &self,
        impersonator_id: Uuid,
    ) -> Result<Option<ImpersonationSession>, ServiceError> {
        match self.store.find_active_impersonation_session(impersonator_id).await? {
            Some(session) => self.live_or_expire(session).await,
            None => Ok(None),
        }
    }

    /// Look a session up by id, applying the same lazy expiry.
    pub async fn validate_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<ImpersonationSession>, ServiceError> {
        match self.store.find_impersonation_session(session_id).await? {
            Some(session) => self.live_or_expire(session).await,
            None => Ok(None),
        }
    }

    async fn live_or_expire(
        &self,
        session: ImpersonationSession,
    ) -> Result<Option<ImpersonationSession>, ServiceError> {
        let now = self.clock.now();
        if session.is_live(now) {
            return Ok(Some(session));
        }
        if session.status() == ImpersonationStatus::Active {
            if let Some(expired) = self
                .store
                .expire_impersonation_session(session.session_id, now)
                .await?
            {
                self.audit_expiry(&expired, now).await;
            }
        }
        Ok(None)
    }

    async fn audit_expiry(&self, session: &ImpersonationSession, now: DateTime<Utc>) {
        self.audit
            .record(
                AuditEvent::new(
                    AuditEventKind::Impersonation,
                    "impersonation.expire",
                    Some(session.impersonator_id),
                    now,
                )
                .with_target(session.impersonated_id)
                .with_data(json!({ "session_id": session.session_id })),
            )
            .await;
    }

    /// Flag every ACTIVE session past its expiry as EXPIRED. Safe to re-run.
    pub async fn expire_due_sessions(&self) -> Result<Vec<ImpersonationSession>, ServiceError> {
        let now = self.clock.now();
        let expired = self.store.expire_due_impersonation_sessions(now).await?;
        for session in &expired {
            self.audit_expiry(session, now).await;
        }
        if !expired.is_empty() {
            metrics::counter!("impersonation_sessions_expired_total").increment(expired.len() as u64);
            tracing::info!(count = expired.len(), "Expired impersonation sessions");
        }
        Ok(expired)
    }
}
