//! Test helper module for access-service integration tests.
//!
//! Builds the full engine on the in-memory store with a manual clock and a
//! recording notifier, plus seeding helpers for users, capabilities, roles
//! and grants.

#![allow(dead_code)]

use access_service::{
    build_router,
    models::{
        AccessLevel, ApprovalLevel, Capability, Decision, Grant, GrantScope, GrantType,
        RequestContext, Sensitivity, SpaceRole, User, UserRole,
    },
    services::{
        AccessEngine, AccessStore, CheckRequest, EngineSettings, ManualClock, MemoryStore,
        RecordingNotifier,
    },
    AppState,
};
use axum::{body::Body, http::Request, Router};
use chrono::{DateTime, Duration, TimeZone, Utc};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

/// Tuesday 2024-01-09 10:00 UTC.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 9, 10, 0, 0).unwrap()
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: AccessEngine,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let notifier = RecordingNotifier::new();
        let engine = AccessEngine::new(
            store.clone(),
            notifier.clone(),
            clock.clone(),
            EngineSettings::default(),
        );
        Self {
            store,
            clock,
            notifier,
            engine,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        use access_service::services::Clock;
        self.clock.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    // ==================== Seeding ====================

    pub fn user(&self, role: UserRole) -> User {
        let id = Uuid::new_v4();
        let user = User::new(
            None,
            format!("{}@example.com", id.simple()),
            format!("User {}", id.simple()),
            role,
        );
        self.store.insert_user(user.clone()).unwrap();
        user
    }

    pub fn user_with_2fa(&self) -> User {
        let mut user = User::new(None, "secure@example.com".into(), "Secure".into(), UserRole::User);
        user.two_factor_enabled = true;
        user.two_factor_secret = Some("JBSWY3DPEHPK3PXP".into());
        self.store.insert_user(user.clone()).unwrap();
        user
    }

    pub fn capability(&self, key: &str, sensitivity: Sensitivity) -> Capability {
        let capability = Capability::new(key, sensitivity);
        self.store.insert_capability(capability.clone()).unwrap();
        capability
    }

    pub fn mfa_capability(&self, key: &str, sensitivity: Sensitivity) -> Capability {
        let capability = Capability::new(key, sensitivity).with_mfa();
        self.store.insert_capability(capability.clone()).unwrap();
        capability
    }

    /// Give `user_id` a role in `space_id` carrying `cap_ids`.
    pub fn role_in_space(&self, user_id: Uuid, space_id: Uuid, cap_ids: &[Uuid]) -> SpaceRole {
        let role = SpaceRole::new(space_id, "member").with_capabilities(cap_ids.to_vec());
        self.store.insert_space_role(role.clone()).unwrap();
        self.store.assign_space_role(user_id, role.role_id).unwrap();
        role
    }

    /// Give `user_id` an approver role in `space_id`.
    pub fn approver_in_space(&self, user_id: Uuid, space_id: Uuid, level: ApprovalLevel) -> SpaceRole {
        let role = SpaceRole::new(space_id, "approver").with_approval(level);
        self.store.insert_space_role(role.clone()).unwrap();
        self.store.assign_space_role(user_id, role.role_id).unwrap();
        role
    }

    pub async fn grant(
        &self,
        user_id: Uuid,
        cap_id: Uuid,
        grant_type: GrantType,
        access_level: AccessLevel,
        expires_in: Option<Duration>,
    ) -> Grant {
        let now = self.now();
        let grant = Grant::new(
            user_id,
            Some(cap_id),
            None,
            grant_type,
            access_level,
            GrantScope::Global,
            Uuid::new_v4(),
            "Seeded for test".into(),
            expires_in.map(|d| now + d),
            now,
        );
        self.store.insert_grant(&grant).await.unwrap();
        grant
    }

    pub async fn add_grant(&self, user_id: Uuid, cap_id: Uuid) -> Grant {
        self.grant(user_id, cap_id, GrantType::Add, AccessLevel::ReadWrite, Some(Duration::days(7)))
            .await
    }

    // ==================== Checks ====================

    pub async fn check(&self, user_id: Uuid, capability: &str) -> Decision {
        self.engine
            .resolver
            .check(&CheckRequest::new(user_id, capability))
            .await
    }

    pub async fn check_with(
        &self,
        user_id: Uuid,
        capability: &str,
        space_id: Option<Uuid>,
        context: RequestContext,
    ) -> Decision {
        let mut request = CheckRequest::new(user_id, capability).with_context(context);
        request.space_id = space_id;
        self.engine.resolver.check(&request).await
    }

    // ==================== HTTP ====================

    pub async fn router(&self) -> Router {
        build_router(AppState::new(self.engine.clone())).await.unwrap()
    }

    /// Send a request through the router and return status and JSON body.
    pub async fn send(&self, request: Request<Body>) -> (u16, serde_json::Value) {
        let response = self.router().await.oneshot(request).await.unwrap();
        let status = response.status().as_u16();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, body)
    }
}

pub fn json_request(method: &str, uri: &str, user_id: Option<Uuid>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user_id) = user_id {
        builder = builder.header("x-user-id", user_id.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, user_id: Option<Uuid>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user_id) = user_id {
        builder = builder.header("x-user-id", user_id.to_string());
    }
    builder.body(Body::empty()).unwrap()
}
