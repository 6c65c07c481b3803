mod common;

use access_service::models::{
    AccessLevel, GrantStatus, GrantType, ImpersonationStatus, RequestContext,
    StartImpersonationRequest, Sensitivity, UserRole,
};
use access_service::services::JobIntervals;
use chrono::Duration;
use common::TestApp;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_access_review_report_counts_recent_activity() {
    // Arrange
    let app = TestApp::new();
    let admin = app.user(UserRole::SuperAdmin);
    let user = app.user(UserRole::User);
    let capability = app.capability("ledger.view", Sensitivity::Normal);
    app.add_grant(user.user_id, capability.cap_id).await;
    app.grant(user.user_id, capability.cap_id, GrantType::Add, AccessLevel::ReadOnly, Some(Duration::minutes(1)))
        .await;
    app.check(user.user_id, "ledger.missing").await;
    app.check(user.user_id, "ledger.view").await;
    app.engine
        .impersonation
        .start_session(
            admin.user_id,
            StartImpersonationRequest {
                impersonated_id: user.user_id,
                justification: "Investigating billing report".into(),
            },
            &RequestContext::default(),
        )
        .await
        .unwrap();
    app.advance(Duration::hours(1));

    // Act
    let report = app.engine.jobs.run_access_review_report().await.unwrap();

    // Assert
    assert_eq!(report.period_end_utc, app.now());
    assert_eq!(report.period_end_utc - report.period_start_utc, Duration::days(14));
    assert_eq!(report.active_grants, 1);
    assert_eq!(report.denied_checks, 1);
    assert_eq!(report.impersonation_sessions, 1);
    let sent = app.notifier.sent_to(admin.user_id);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].message, report.summary());
}

#[tokio::test]
async fn test_job_runners_report_how_much_they_swept() {
    let app = TestApp::new();
    let user = app.user(UserRole::User);
    let capability = app.capability("ledger.view", Sensitivity::Normal);
    app.add_grant(user.user_id, capability.cap_id).await;
    app.add_grant(user.user_id, capability.cap_id).await;

    app.advance(Duration::days(8));

    assert_eq!(app.engine.jobs.run_grant_expiry().await.unwrap(), 2);
    assert_eq!(app.engine.jobs.run_grant_expiry().await.unwrap(), 0);
    assert_eq!(app.engine.jobs.run_impersonation_cleanup().await.unwrap(), 0);
}

#[tokio::test]
async fn test_spawned_jobs_sweep_and_stop_on_shutdown() {
    // Arrange
    let app = TestApp::new();
    let admin = app.user(UserRole::SuperAdmin);
    let user = app.user(UserRole::User);
    let capability = app.capability("ledger.view", Sensitivity::Normal);
    app.add_grant(user.user_id, capability.cap_id).await;
    app.engine
        .impersonation
        .start_session(
            admin.user_id,
            StartImpersonationRequest {
                impersonated_id: user.user_id,
                justification: "Investigating billing report".into(),
            },
            &RequestContext::default(),
        )
        .await
        .unwrap();
    app.advance(Duration::days(8));

    let intervals = JobIntervals {
        grant_expiry: StdDuration::from_millis(20),
        impersonation_cleanup: StdDuration::from_millis(20),
        access_review: StdDuration::from_secs(3600),
    };
    let shutdown = CancellationToken::new();

    // Act
    let handles = app.engine.jobs.spawn_all(intervals, shutdown.clone());
    tokio::time::sleep(StdDuration::from_millis(150)).await;
    shutdown.cancel();
    for handle in handles {
        tokio::time::timeout(StdDuration::from_secs(1), handle)
            .await
            .expect("job did not stop")
            .unwrap();
    }

    // Assert
    assert_eq!(app.store.grants()[0].status(), GrantStatus::Expired);
    assert_eq!(
        app.store.impersonation_sessions()[0].status(),
        ImpersonationStatus::Expired
    );
}
