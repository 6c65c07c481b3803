//! Grant lifecycle - request, review, approval into a grant, revocation and
//! expiry.
//!
//! Approval is one store transition: the request leaves PENDING and its ADD
//! grant is inserted together, or neither happens.

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::audit::AuditRecorder;
use super::clock::Clock;
use super::error::ServiceError;
use super::notifier::{notify_best_effort, Notification, NotificationType, Notifier, Priority};
use super::store::AccessStore;
use crate::models::{
    ApprovalLevel, AuditEvent, AuditEventKind, CreateGrantRequest, Grant, GrantRequest,
    GrantRequestStatus, GrantStatus, ReviewAction, ReviewRequest, Sensitivity, User, UserRole,
};

#[derive(Debug, Clone)]
pub enum ReviewOutcome {
    Approved { request: GrantRequest, grant: Grant },
    Rejected { request: GrantRequest },
}

impl ReviewOutcome {
    pub fn request(&self) -> &GrantRequest {
        match self {
            ReviewOutcome::Approved { request, .. } | ReviewOutcome::Rejected { request } => request,
        }
    }
}

pub struct GrantLifecycleManager {
    store: Arc<dyn AccessStore>,
    audit: Arc<AuditRecorder>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl GrantLifecycleManager {
    pub fn new(
        store: Arc<dyn AccessStore>,
        audit: Arc<AuditRecorder>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            audit,
            notifier,
            clock,
        }
    }

    pub async fn create_request(
        &self,
        requester_id: Uuid,
        input: CreateGrantRequest,
    ) -> Result<GrantRequest, ServiceError> {
        input.validate()?;

        if self.store.find_user(requester_id).await?.is_none() {
            return Err(ServiceError::NotFound("user"));
        }
        let capability = match input.cap_id {
            Some(cap_id) => Some(
                self.store
                    .find_capability(cap_id)
                    .await?
                    .ok_or(ServiceError::NotFound("capability"))?,
            ),
            None => None,
        };

        let now = self.clock.now();
        let request = GrantRequest::new(requester_id, &input, now);
        self.store.insert_grant_request(&request).await?;

        tracing::info!(
            request_id = %request.request_id,
            requester_id = %requester_id,
            requested_days = request.requested_days,
            "Grant request created"
        );

        self.audit
            .record(
                AuditEvent::new(AuditEventKind::GrantRequest, "grant_request.create", Some(requester_id), now)
                    .with_target(request.request_id)
                    .with_capability(request.cap_id)
                    .with_space(request.space_id)
                    .with_data(json!({
                        "requested_days": request.requested_days,
                        "access_level": request.access_level_code,
                    })),
            )
            .await;

        let subject = capability
            .as_ref()
            .map_or_else(|| "space access".to_string(), |c| c.cap_key.clone());
        self.notify_reviewers(&request, &subject).await;

        Ok(request)
    }

    async fn notify_reviewers(&self, request: &GrantRequest, subject: &str) {
        let reviewers = match self.store.find_users_by_role(UserRole::SuperAdmin).await {
            Ok(users) => users,
            Err(e) => {
                tracing::warn!(error = %e, request_id = %request.request_id, "Could not load reviewers");
                return;
            }
        };
        for reviewer in reviewers {
            let notification = Notification::new(
                reviewer.user_id,
                NotificationType::Access,
                Priority::Medium,
                "New access request",
                format!(
                    "Access to {} requested for {} days",
                    subject, request.requested_days
                ),
            )
            .with_action_url("/grant-requests/pending");
            notify_best_effort(self.notifier.as_ref(), notification).await;
        }
    }

    /// Check that `reviewer` may approve access to `cap_id` within `space_id`.
    ///
    /// Super admins always may. Anyone else needs a role, in the space when
    /// one is given, whose approval level covers the capability's sensitivity.
    pub async fn authorize_reviewer(
        &self,
        reviewer: &User,
        space_id: Option<Uuid>,
        cap_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        if reviewer.is_super_admin() {
            return Ok(());
        }

        let sensitivity = match cap_id {
            // A capability that has since disappeared is treated as the most sensitive.
            Some(cap_id) => self
                .store
                .find_capability(cap_id)
                .await?
                .map_or(Sensitivity::Critical, |c| c.sensitivity()),
            None => Sensitivity::Normal,
        };

        let held = self
            .store
            .find_space_roles_for_user(reviewer.user_id, space_id)
            .await?
            .iter()
            .filter_map(|role| role.approval_level())
            .max();

        match held {
            Some(level) if level.dominates(sensitivity) => Ok(()),
            _ => Err(ServiceError::InsufficientApprovalLevel {
                required: ApprovalLevel::required_for(sensitivity),
                held,
            }),
        }
    }

    pub async fn review(
        &self,
        reviewer_id: Uuid,
        request_id: Uuid,
        review: &ReviewRequest,
    ) -> Result<ReviewOutcome, ServiceError> {
        let request = self
            .store
            .find_grant_request(request_id)
            .await?
            .ok_or(ServiceError::NotFound("grant request"))?;

        if request.status() != GrantRequestStatus::Pending {
            return Err(ServiceError::InvalidState(format!(
                "grant request is already {}",
                request.status_code
            )));
        }
        if request.requester_id == reviewer_id {
            return Err(ServiceError::Forbidden(
                "requesters cannot review their own grant request".to_string(),
            ));
        }

        let rejection_reason = match review.action {
            ReviewAction::Reject => Some(review.rejection_reason().ok_or_else(|| {
                ServiceError::Validation("a reason is required to reject a request".to_string())
            })?),
            ReviewAction::Approve => None,
        };

        let reviewer = self
            .store
            .find_user(reviewer_id)
            .await?
            .ok_or_else(|| ServiceError::Forbidden("reviewer is not a known user".to_string()))?;
        self.authorize_reviewer(&reviewer, request.space_id, request.cap_id)
            .await?;

        let now = self.clock.now();
        let outcome = match rejection_reason {
            None => {
                let grant = request.to_grant(reviewer_id, now);
                let approved = self
                    .store
                    .approve_grant_request(request_id, reviewer_id, now, &grant)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InvalidState("grant request is no longer pending".to_string())
                    })?;
                ReviewOutcome::Approved {
                    request: approved,
                    grant,
                }
            }
            Some(reason) => {
                let rejected = self
                    .store
                    .reject_grant_request(request_id, reviewer_id, now, reason)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InvalidState("grant request is no longer pending".to_string())
                    })?;
                ReviewOutcome::Rejected { request: rejected }
            }
        };

        let (action, grant_id) = match &outcome {
            ReviewOutcome::Approved { grant, .. } => ("grant_request.approve", Some(grant.grant_id)),
            ReviewOutcome::Rejected { .. } => ("grant_request.reject", None),
        };
        tracing::info!(
            request_id = %request_id,
            reviewer_id = %reviewer_id,
            action,
            "Grant request reviewed"
        );
        self.audit
            .record(
                AuditEvent::new(AuditEventKind::GrantRequest, action, Some(reviewer_id), now)
                    .with_target(request_id)
                    .with_capability(request.cap_id)
                    .with_space(request.space_id)
                    .with_grant(grant_id)
                    .with_data(json!({ "reason": rejection_reason })),
            )
            .await;

        let notification = match &outcome {
            ReviewOutcome::Approved { grant, .. } => Notification::new(
                request.requester_id,
                NotificationType::Access,
                Priority::Medium,
                "Access request approved",
                format!(
                    "Your access request was approved until {}",
                    grant
                        .expires_utc
                        .map_or_else(|| "further notice".to_string(), |e| e.to_rfc3339())
                ),
            ),
            ReviewOutcome::Rejected { .. } => Notification::new(
                request.requester_id,
                NotificationType::Access,
                Priority::Medium,
                "Access request rejected",
                format!(
                    "Your access request was rejected: {}",
                    rejection_reason.unwrap_or_default()
                ),
            ),
        };
        notify_best_effort(self.notifier.as_ref(), notification).await;

        Ok(outcome)
    }

    pub async fn list_my_requests(&self, requester_id: Uuid) -> Result<Vec<GrantRequest>, ServiceError> {
        Ok(self.store.find_grant_requests_by_requester(requester_id).await?)
    }

    pub async fn list_pending(&self, space_id: Option<Uuid>) -> Result<Vec<GrantRequest>, ServiceError> {
        Ok(self.store.find_pending_grant_requests(space_id).await?)
    }

    /// Revoke an ACTIVE grant. The actor needs the same approval rights a
    /// reviewer of that grant would.
    pub async fn revoke_grant(&self, actor_id: Uuid, grant_id: Uuid) -> Result<Grant, ServiceError> {
        let grant = self
            .store
            .find_grant(grant_id)
            .await?
            .ok_or(ServiceError::NotFound("grant"))?;
        if grant.status() != GrantStatus::Active {
            return Err(ServiceError::InvalidState(format!(
                "grant is already {}",
                grant.status_code
            )));
        }

        let actor = self
            .store
            .find_user(actor_id)
            .await?
            .ok_or_else(|| ServiceError::Forbidden("actor is not a known user".to_string()))?;
        self.authorize_reviewer(&actor, grant.space_id, grant.cap_id).await?;

        let now = self.clock.now();
        let revoked = self
            .store
            .revoke_grant(grant_id, now)
            .await?
            .ok_or_else(|| ServiceError::InvalidState("grant is no longer active".to_string()))?;

        tracing::info!(grant_id = %grant_id, actor_id = %actor_id, "Grant revoked");
        self.audit
            .record(
                AuditEvent::new(AuditEventKind::Grant, "grant.revoke", Some(actor_id), now)
                    .with_target(revoked.user_id)
                    .with_capability(revoked.cap_id)
                    .with_space(revoked.space_id)
                    .with_grant(Some(grant_id)),
            )
            .await;
        notify_best_effort(
            self.notifier.as_ref(),
            Notification::new(
                revoked.user_id,
                NotificationType::Access,
                Priority::Medium,
                "Access revoked",
                "One of your access grants was revoked",
            ),
        )
        .await;

        Ok(revoked)
    }

    /// Move every ACTIVE grant past its expiry to EXPIRED. Safe to re-run.
    pub async fn expire_due_grants(&self) -> Result<Vec<Grant>, ServiceError> {
        let now = self.clock.now();
        let expired = self.store.expire_due_grants(now).await?;

        for grant in &expired {
            self.audit
                .record(
                    AuditEvent::new(AuditEventKind::Grant, "grant.expire", None, now)
                        .with_target(grant.user_id)
                        .with_capability(grant.cap_id)
                        .with_space(grant.space_id)
                        .with_grant(Some(grant.grant_id)),
                )
                .await;
            notify_best_effort(
                self.notifier.as_ref(),
                Notification::new(
                    grant.user_id,
                    NotificationType::Access,
                    Priority::Low,
                    "Access expired",
                    "A temporary access grant has expired",
                ),
            )
            .await;
        }

        if !expired.is_empty() {
            metrics::counter!("grants_expired_total").increment(expired.len() as u64);
            tracing::info!(count = expired.len(), "Expired grants");
        }
        Ok(expired)
    }
}
