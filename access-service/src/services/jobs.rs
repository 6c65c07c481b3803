//! Scheduled security jobs.
//!
//! Each job is a plain async method so it can be driven directly in tests;
//! `spawn_all` only wires them to interval loops that stop on shutdown.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::clock::Clock;
use super::error::ServiceError;
use super::grants::GrantLifecycleManager;
use super::impersonation::ImpersonationSessionManager;
use super::notifier::{notify_best_effort, Notification, NotificationType, Notifier, Priority};
use super::store::AccessStore;
use crate::models::UserRole;

/// Look-back window of the access review report.
pub const ACCESS_REVIEW_DAYS: i64 = 14;

#[derive(Debug, Clone, Copy)]
pub struct JobIntervals {
    pub grant_expiry: Duration,
    pub impersonation_cleanup: Duration,
    pub access_review: Duration,
}

impl Default for JobIntervals {
    fn default() -> Self {
        Self {
            grant_expiry: Duration::from_secs(60 * 60),
            impersonation_cleanup: Duration::from_secs(15 * 60),
            access_review: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Governance summary sent to super admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessReviewReport {
    pub period_start_utc: DateTime<Utc>,
    pub period_end_utc: DateTime<Utc>,
    pub active_grants: u64,
    pub grant_requests: u64,
    pub denied_checks: u64,
    pub impersonation_sessions: u64,
}

impl AccessReviewReport {
    pub fn summary(&self) -> String {
        format!(
            "Last {} days: {} active grants, {} grant requests, {} denied capability checks, {} impersonation sessions",
            ACCESS_REVIEW_DAYS,
            self.active_grants,
            self.grant_requests,
            self.denied_checks,
            self.impersonation_sessions
        )
    }
}

pub struct SecurityJobs {
    store: Arc<dyn AccessStore>,
    grants: Arc<GrantLifecycleManager>,
    sessions: Arc<ImpersonationSessionManager>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl SecurityJobs {
    pub fn new(
        store: Arc<dyn AccessStore>,
        grants: Arc<GrantLifecycleManager>,
        sessions: Arc<ImpersonationSessionManager>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            grants,
            sessions,
            notifier,
            clock,
        }
    }

    /// Returns the number of grants expired.
    pub async fn run_grant_expiry(&self) -> Result<usize, ServiceError> {
        Ok(self.grants.expire_due_grants().await?.len())
    }

    /// Returns the number of sessions expired.
    pub async fn run_impersonation_cleanup(&self) -> Result<usize, ServiceError> {
        Ok(self.sessions.expire_due_sessions().await?.len())
    }

    pub async fn run_access_review_report(&self) -> Result<AccessReviewReport, ServiceError> {
        let now = self.clock.now();
        let since = now - ChronoDuration::days(ACCESS_REVIEW_DAYS);

        let report = AccessReviewReport {
            period_start_utc: since,
            period_end_utc: now,
            active_grants: self.store.count_effective_grants(now).await?,
            grant_requests: self.store.count_grant_requests_since(since).await?,
            denied_checks: self.store.count_denied_checks_since(since).await?,
            impersonation_sessions: self.store.count_impersonation_sessions_since(since).await?,
        };

        tracing::info!(
            active_grants = report.active_grants,
            grant_requests = report.grant_requests,
            denied_checks = report.denied_checks,
            impersonation_sessions = report.impersonation_sessions,
            "Access review report generated"
        );

        for admin in self.store.find_users_by_role(UserRole::SuperAdmin).await? {
            let notification = Notification::new(
                admin.user_id,
                NotificationType::Report,
                Priority::Low,
                "Access review report",
                report.summary(),
            );
            notify_best_effort(self.notifier.as_ref(), notification).await;
        }

        Ok(report)
    }

    /// Start one interval loop per job. Loops exit when `shutdown` is cancelled.
    pub fn spawn_all(
        self: &Arc<Self>,
        intervals: JobIntervals,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        tracing::info!(
            grant_expiry_secs = intervals.grant_expiry.as_secs(),
            impersonation_cleanup_secs = intervals.impersonation_cleanup.as_secs(),
            access_review_secs = intervals.access_review.as_secs(),
            "Starting security jobs"
        );

        let jobs = Arc::clone(self);
        let grant_expiry = spawn_job("grant_expiry", intervals.grant_expiry, shutdown.clone(), move || {
            let jobs = jobs.clone();
            async move { jobs.run_grant_expiry().await.map(|_| ()) }
        });

        let jobs = Arc::clone(self);
        let cleanup = spawn_job(
            "impersonation_cleanup",
            intervals.impersonation_cleanup,
            shutdown.clone(),
            move || {
                let jobs = jobs.clone();
                async move { jobs.run_impersonation_cleanup().await.map(|_| ()) }
            },
        );

        let jobs = Arc::clone(self);
        let review = spawn_job("access_review", intervals.access_review, shutdown, move || {
            let jobs = jobs.clone();
            async move { jobs.run_access_review_report().await.map(|_| ()) }
        });

        vec![grant_expiry, cleanup, review]
    }
}

fn spawn_job<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut run: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so jobs start one period after boot.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(job = name, "Security job shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = run().await {
                        tracing::error!(job = name, error = %e, "Security job failed");
                    }
                }
            }
        }
    })
}
