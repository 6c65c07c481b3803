mod common;

use access_service::models::{
    AuditEventKind, ImpersonationStatus, RequestContext, StartImpersonationRequest, UserRole,
};
use access_service::services::ServiceError;
use chrono::Duration;
use common::TestApp;
use uuid::Uuid;

fn start_request(target: Uuid) -> StartImpersonationRequest {
    StartImpersonationRequest {
        impersonated_id: target,
        justification: "Reproducing support ticket 4411".into(),
    }
}

#[tokio::test]
async fn test_start_creates_a_thirty_minute_session() {
    // Arrange
    let app = TestApp::new();
    let admin = app.user(UserRole::SuperAdmin);
    let target = app.user(UserRole::User);
    let ctx = RequestContext::with_client("198.51.100.4", "support-console");

    // Act
    let session = app
        .engine
        .impersonation
        .start_session(admin.user_id, start_request(target.user_id), &ctx)
        .await
        .unwrap();

    // Assert
    assert_eq!(session.status(), ImpersonationStatus::Active);
    assert_eq!(session.expires_utc - session.started_utc, Duration::minutes(30));
    assert_eq!(session.ip_address.as_deref(), Some("198.51.100.4"));
    let audited: Vec<_> = app
        .store
        .audit_events()
        .into_iter()
        .filter(|e| e.kind_is(AuditEventKind::Impersonation))
        .collect();
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0].action, "impersonation.start");
    assert_eq!(audited[0].target_id, Some(target.user_id));
}

#[tokio::test]
async fn test_starting_again_ends_the_previous_session() {
    // Arrange
    let app = TestApp::new();
    let admin = app.user(UserRole::SuperAdmin);
    let first_target = app.user(UserRole::User);
    let second_target = app.user(UserRole::User);
    let ctx = RequestContext::default();
    let first = app
        .engine
        .impersonation
        .start_session(admin.user_id, start_request(first_target.user_id), &ctx)
        .await
        .unwrap();

    // Act
    let second = app
        .engine
        .impersonation
        .start_session(admin.user_id, start_request(second_target.user_id), &ctx)
        .await
        .unwrap();

    // Assert
    let sessions = app.store.impersonation_sessions();
    let previous = sessions.iter().find(|s| s.session_id == first.session_id).unwrap();
    assert_eq!(previous.status(), ImpersonationStatus::Ended);
    let active = app
        .engine
        .impersonation
        .get_active_session(admin.user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.session_id, second.session_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_leave_one_active_session() {
    // Arrange
    let app = TestApp::new();
    let admin = app.user(UserRole::SuperAdmin);
    let targets: Vec<_> = (0..8).map(|_| app.user(UserRole::User)).collect();

    // Act
    let mut handles = Vec::new();
    for target in &targets {
        let sessions = app.engine.impersonation.clone();
        let request = start_request(target.user_id);
        let impersonator = admin.user_id;
        handles.push(tokio::spawn(async move {
            sessions
                .start_session(impersonator, request, &RequestContext::default())
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Assert
    let active = app
        .store
        .impersonation_sessions()
        .into_iter()
        .filter(|s| s.impersonator_id == admin.user_id && s.status() == ImpersonationStatus::Active)
        .count();
    assert_eq!(active, 1);
    assert_eq!(app.store.impersonation_sessions().len(), targets.len());
}

#[tokio::test]
async fn test_self_impersonation_and_unknown_targets_are_rejected() {
    let app = TestApp::new();
    let admin = app.user(UserRole::SuperAdmin);
    let ctx = RequestContext::default();

    let own = app
        .engine
        .impersonation
        .start_session(admin.user_id, start_request(admin.user_id), &ctx)
        .await;
    let unknown = app
        .engine
        .impersonation
        .start_session(admin.user_id, start_request(Uuid::new_v4()), &ctx)
        .await;
    let mut vague = start_request(admin.user_id);
    vague.justification = "because".into();
    let vague = app.engine.impersonation.start_session(Uuid::new_v4(), vague, &ctx).await;

    assert!(matches!(own, Err(ServiceError::Validation(_))));
    assert!(matches!(unknown, Err(ServiceError::NotFound("user"))));
    assert!(matches!(vague, Err(ServiceError::InvalidInput(_))));
}

#[tokio::test]
async fn test_session_expires_lazily_on_lookup() {
    // Arrange
    let app = TestApp::new();
    let admin = app.user(UserRole::SuperAdmin);
    let target = app.user(UserRole::User);
    let session = app
        .engine
        .impersonation
        .start_session(admin.user_id, start_request(target.user_id), &RequestContext::default())
        .await
        .unwrap();

    // Act
    app.advance(Duration::minutes(29));
    let still_live = app.engine.impersonation.validate_session(session.session_id).await.unwrap();
    app.advance(Duration::minutes(1));
    let expired = app.engine.impersonation.get_active_session(admin.user_id).await.unwrap();

    // Assert
    assert!(still_live.is_some());
    assert!(expired.is_none());
    let stored = app.store.impersonation_sessions();
    assert_eq!(stored[0].status(), ImpersonationStatus::Expired);
    let expiry_events = app
        .store
        .audit_events()
        .into_iter()
        .filter(|e| e.action == "impersonation.expire")
        .count();
    assert_eq!(expiry_events, 1);

    // A later sweep finds nothing left to do.
    assert!(app.engine.impersonation.expire_due_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sweep_expires_sessions_nobody_looked_up() {
    let app = TestApp::new();
    let admin = app.user(UserRole::SuperAdmin);
    let target = app.user(UserRole::User);
    app.engine
        .impersonation
        .start_session(admin.user_id, start_request(target.user_id), &RequestContext::default())
        .await
        .unwrap();

    app.advance(Duration::minutes(30));
    let first = app.engine.impersonation.expire_due_sessions().await.unwrap();
    let second = app.engine.impersonation.expire_due_sessions().await.unwrap();

    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
}

#[tokio::test]
async fn test_only_the_impersonator_can_stop_a_session() {
    // Arrange
    let app = TestApp::new();
    let admin = app.user(UserRole::SuperAdmin);
    let other_admin = app.user(UserRole::SuperAdmin);
    let target = app.user(UserRole::User);
    let session = app
        .engine
        .impersonation
        .start_session(admin.user_id, start_request(target.user_id), &RequestContext::default())
        .await
        .unwrap();

    // Act
    let by_other = app
        .engine
        .impersonation
        .stop_session(other_admin.user_id, session.session_id)
        .await;
    let by_owner = app
        .engine
        .impersonation
        .stop_session(admin.user_id, session.session_id)
        .await
        .unwrap();
    let again = app
        .engine
        .impersonation
        .stop_session(admin.user_id, session.session_id)
        .await;

    // Assert
    assert!(matches!(by_other, Err(ServiceError::Forbidden(_))));
    assert_eq!(by_owner.status(), ImpersonationStatus::Ended);
    assert_eq!(by_owner.ended_utc, Some(app.now()));
    assert!(matches!(again, Err(ServiceError::InvalidState(_))));
}
