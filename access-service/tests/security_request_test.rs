mod common;

use access_service::models::{
    keys, CreateSecurityRequest, RequestContext, ReviewRequest, SecurityRequestStatus,
    SecurityRequestType, Sensitivity, UserRole,
};
use access_service::services::ServiceError;
use common::TestApp;
use uuid::Uuid;

fn reset_for(target: Uuid) -> CreateSecurityRequest {
    CreateSecurityRequest {
        request_type: SecurityRequestType::TwoFactorReset,
        target_user_id: target,
        justification: "User lost their authenticator device".into(),
    }
}

#[tokio::test]
async fn test_approved_reset_disables_two_factor_once() {
    // Arrange
    let app = TestApp::new();
    let helpdesk = app.user(UserRole::User);
    let admin = app.user(UserRole::SuperAdmin);
    let target = app.user_with_2fa();
    let ctx = RequestContext::default();
    let workflow = &app.engine.security_requests;
    let request = workflow.create(helpdesk.user_id, reset_for(target.user_id)).await.unwrap();

    // Act
    let approved = workflow
        .review(admin.user_id, request.request_id, &ReviewRequest::approve(), &ctx)
        .await
        .unwrap();
    let executed = workflow.execute(admin.user_id, request.request_id, &ctx).await.unwrap();
    let again = workflow.execute(admin.user_id, request.request_id, &ctx).await;

    // Assert
    assert_eq!(approved.status(), SecurityRequestStatus::Approved);
    assert_eq!(executed.status(), SecurityRequestStatus::Executed);
    assert_eq!(executed.executed_by, Some(admin.user_id));
    assert!(matches!(again, Err(ServiceError::InvalidState(_))));

    let user = app.store.user(target.user_id).unwrap();
    assert!(!user.two_factor_enabled);
    assert!(user.two_factor_secret.is_none());
    assert_eq!(app.notifier.sent_to(target.user_id).len(), 1);
}

#[tokio::test]
async fn test_pending_request_cannot_be_executed() {
    let app = TestApp::new();
    let admin = app.user(UserRole::SuperAdmin);
    let requester = app.user(UserRole::User);
    let target = app.user_with_2fa();
    let workflow = &app.engine.security_requests;
    let request = workflow.create(requester.user_id, reset_for(target.user_id)).await.unwrap();

    let result = workflow
        .execute(admin.user_id, request.request_id, &RequestContext::default())
        .await;

    assert!(matches!(result, Err(ServiceError::InvalidState(_))));
    assert!(app.store.user(target.user_id).unwrap().two_factor_enabled);
}

#[tokio::test]
async fn test_reviewer_needs_the_reset_capability() {
    // Arrange
    let app = TestApp::new();
    let requester = app.user(UserRole::User);
    let reviewer = app.user(UserRole::User);
    let target = app.user_with_2fa();
    let workflow = &app.engine.security_requests;
    let request = workflow.create(requester.user_id, reset_for(target.user_id)).await.unwrap();

    // Act
    let without = workflow
        .review(reviewer.user_id, request.request_id, &ReviewRequest::approve(), &RequestContext::default())
        .await;
    let capability = app.capability(keys::TWO_FACTOR_RESET, Sensitivity::Critical);
    app.add_grant(reviewer.user_id, capability.cap_id).await;
    let with = workflow
        .review(reviewer.user_id, request.request_id, &ReviewRequest::approve(), &RequestContext::default())
        .await;

    // Assert
    assert!(matches!(without, Err(ServiceError::Forbidden(_))));
    assert!(with.is_ok());
}

#[tokio::test]
async fn test_requester_cannot_review_their_own_request() {
    let app = TestApp::new();
    let admin = app.user(UserRole::SuperAdmin);
    let target = app.user_with_2fa();
    let workflow = &app.engine.security_requests;
    let request = workflow.create(admin.user_id, reset_for(target.user_id)).await.unwrap();

    let result = workflow
        .review(admin.user_id, request.request_id, &ReviewRequest::approve(), &RequestContext::default())
        .await;

    assert!(matches!(result, Err(ServiceError::Forbidden(_))));
}

#[tokio::test]
async fn test_rejected_request_leaves_the_pending_list() {
    // Arrange
    let app = TestApp::new();
    let admin = app.user(UserRole::SuperAdmin);
    let requester = app.user(UserRole::User);
    let target = app.user_with_2fa();
    let workflow = &app.engine.security_requests;
    let request = workflow.create(requester.user_id, reset_for(target.user_id)).await.unwrap();
    assert_eq!(workflow.list_pending().await.unwrap().len(), 1);

    // Act
    let no_reason = workflow
        .review(admin.user_id, request.request_id, &ReviewRequest::reject(""), &RequestContext::default())
        .await;
    let rejected = workflow
        .review(
            admin.user_id,
            request.request_id,
            &ReviewRequest::reject("Identity not verified"),
            &RequestContext::default(),
        )
        .await
        .unwrap();

    // Assert
    assert!(matches!(no_reason, Err(ServiceError::Validation(_))));
    assert_eq!(rejected.status(), SecurityRequestStatus::Rejected);
    assert!(workflow.list_pending().await.unwrap().is_empty());
    let sent = app.notifier.sent_to(requester.user_id);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].message.contains("REJECTED"));
}

#[tokio::test]
async fn test_creating_a_request_for_unknown_user_fails() {
    let app = TestApp::new();
    let requester = app.user(UserRole::User);

    let result = app
        .engine
        .security_requests
        .create(requester.user_id, reset_for(Uuid::new_v4()))
        .await;

    assert!(matches!(result, Err(ServiceError::NotFound("user"))));
}
