//! Security request workflow - request, review, execute for sensitive
//! account actions such as a forced 2FA reset.
//!
//! Reviewers and executors are authorised through the capability resolver
//! against the capability the request type names. Execution applies the side
//! effect and the APPROVED -> EXECUTED transition in one store call, so a
//! request executes at most once.

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::audit::AuditRecorder;
use super::clock::Clock;
use super::error::ServiceError;
use super::notifier::{notify_best_effort, Notification, NotificationType, Notifier, Priority};
use super::resolver::{CapabilityResolver, CheckRequest};
use super::store::AccessStore;
use crate::models::{
    AuditEvent, AuditEventKind, CreateSecurityRequest, RequestContext, ReviewAction, ReviewRequest,
    SecurityRequest, SecurityRequestStatus, SecurityRequestType, UserRole,
};

pub struct SecurityRequestWorkflow {
    store: Arc<dyn AccessStore>,
    resolver: Arc<CapabilityResolver>,
    audit: Arc<AuditRecorder>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl SecurityRequestWorkflow {
    pub fn new(
        store: Arc<dyn AccessStore>,
        resolver: Arc<CapabilityResolver>,
        audit: Arc<AuditRecorder>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            resolver,
            audit,
            notifier,
            clock,
        }
    }

    pub async fn create(
        &self,
        requester_id: Uuid,
        input: CreateSecurityRequest,
    ) -> Result<SecurityRequest, ServiceError> {
        input.validate()?;
        let target = self
            .store
            .find_user(input.target_user_id)
            .await?
            .ok_or(ServiceError::NotFound("user"))?;

        let now = self.clock.now();
        let request = SecurityRequest::new(
            input.request_type,
            requester_id,
            target.user_id,
            input.justification,
            now,
        );
        self.store.insert_security_request(&request).await?;

        tracing::info!(
            request_id = %request.request_id,
            request_type = %request.request_type_code,
            requester_id = %requester_id,
            target_user_id = %target.user_id,
            "Security request created"
        );
        self.audit
            .record(
                AuditEvent::new(AuditEventKind::SecurityRequest, "security_request.create", Some(requester_id), now)
                    .with_target(target.user_id)
                    .with_data(json!({
                        "request_id": request.request_id,
                        "request_type": request.request_type_code,
                    })),
            )
            .await;

        match self.store.find_users_by_role(UserRole::SuperAdmin).await {
            Ok(admins) => {
                for admin in admins {
                    let notification = Notification::new(
                        admin.user_id,
                        NotificationType::Security,
                        Priority::High,
                        "Security request pending review",
                        format!(
                            "{} requested for {}",
                            input.request_type.as_str(),
                            target.email
                        ),
                    )
                    .with_action_url("/security/requests");
                    notify_best_effort(self.notifier.as_ref(), notification).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, request_id = %request.request_id, "Could not load super admins");
            }
        }

        Ok(request)
    }

    /// Check `actor_id` holds the capability the request type requires.
    async fn require_capability(
        &self,
        actor_id: Uuid,
        request_type: SecurityRequestType,
        ctx: &RequestContext,
    ) -> Result<(), ServiceError> {
        let decision = self
            .resolver
            .check(&CheckRequest::new(actor_id, request_type.capability_key()).with_context(ctx.clone()))
            .await;
        if decision.allowed {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(decision.message))
        }
    }

    async fn load(&self, request_id: Uuid) -> Result<(SecurityRequest, SecurityRequestType), ServiceError> {
        let request = self
            .store
            .find_security_request(request_id)
            .await?
            .ok_or(ServiceError::NotFound("security request"))?;
        let request_type = request.request_type().ok_or_else(|| {
            ServiceError::InvalidState(format!("unsupported request type {}", request.request_type_code))
        })?;
        Ok((request, request_type))
    }

    pub async fn review(
        &self,
        reviewer_id: Uuid,
        request_id: Uuid,
        review: &ReviewRequest,
        ctx: &RequestContext,
    ) -> Result<SecurityRequest, ServiceError> {
        let (request, request_type) = self.load(request_id).await?;
        if request.status() != SecurityRequestStatus::Pending {
            return Err(ServiceError::InvalidState(format!(
                "security request is already {}",
                request.status_code
            )));
        }
        if request.requester_id == reviewer_id {
            return Err(ServiceError::Forbidden(
                "requesters cannot review their own security request".to_string(),
            ));
        }
        let rejection_reason = match review.action {
            ReviewAction::Reject => Some(review.rejection_reason().ok_or_else(|| {
                ServiceError::Validation("a reason is required to reject a request".to_string())
            })?),
            ReviewAction::Approve => None,
        };
        self.require_capability(reviewer_id, request_type, ctx).await?;

        let now = self.clock.now();
        let reviewed = match rejection_reason {
            None => self.store.approve_security_request(request_id, reviewer_id, now).await?,
            Some(reason) => {
                self.store
                    .reject_security_request(request_id, reviewer_id, now, reason)
                    .await?
            }
        }
        .ok_or_else(|| ServiceError::InvalidState("security request is no longer pending".to_string()))?;

        let action = if rejection_reason.is_some() {
            "security_request.reject"
        } else {
            "security_request.approve"
        };
        tracing::info!(request_id = %request_id, reviewer_id = %reviewer_id, action, "Security request reviewed");
        self.audit
            .record(
                AuditEvent::new(AuditEventKind::SecurityRequest, action, Some(reviewer_id), now)
                    .with_target(reviewed.target_user_id)
                    .with_client(ctx.ip.clone(), ctx.user_agent.clone())
                    .with_data(json!({ "request_id": request_id, "reason": rejection_reason })),
            )
            .await;
        notify_best_effort(
            self.notifier.as_ref(),
            Notification::new(
                reviewed.requester_id,
                NotificationType::Security,
                Priority::High,
                "Security request reviewed",
                format!("Your {} request is now {}", reviewed.request_type_code, reviewed.status_code),
            ),
        )
        .await;

        Ok(reviewed)
    }

    pub async fn execute(
        &self,
        executor_id: Uuid,
        request_id: Uuid,
        ctx: &RequestContext,
    ) -> Result<SecurityRequest, ServiceError> {
        let (request, request_type) = self.load(request_id).await?;
        if request.status() != SecurityRequestStatus::Approved {
            return Err(ServiceError::InvalidState(format!(
                "only approved requests can be executed, request is {}",
                request.status_code
            )));
        }
        self.require_capability(executor_id, request_type, ctx).await?;

        let now = self.clock.now();
        let executed = self
            .store
            .execute_security_request(
                request_id,
                executor_id,
                now,
                request_type.effect(request.target_user_id),
            )
            .await?
            .ok_or_else(|| ServiceError::InvalidState("security request is no longer approved".to_string()))?;

        tracing::warn!(
            request_id = %request_id,
            executor_id = %executor_id,
            target_user_id = %executed.target_user_id,
            request_type = %executed.request_type_code,
            "Security request executed"
        );
        self.audit
            .record(
                AuditEvent::new(AuditEventKind::SecurityRequest, "security_request.execute", Some(executor_id), now)
                    .with_target(executed.target_user_id)
                    .with_client(ctx.ip.clone(), ctx.user_agent.clone())
                    .with_data(json!({ "request_id": request_id, "request_type": executed.request_type_code })),
            )
            .await;
        notify_best_effort(
            self.notifier.as_ref(),
            Notification::new(
                executed.target_user_id,
                NotificationType::Security,
                Priority::High,
                "Two-factor authentication reset",
                "Two-factor authentication was reset on your account. Set it up again at next sign-in.",
            ),
        )
        .await;

        Ok(executed)
    }

    pub async fn list_pending(&self) -> Result<Vec<SecurityRequest>, ServiceError> {
        Ok(self.store.find_pending_security_requests().await?)
    }
}
