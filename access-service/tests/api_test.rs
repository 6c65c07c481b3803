mod common;

use access_service::models::{keys, AccessLevel, GrantType, Sensitivity, UserRole};
use chrono::Duration;
use common::{get_request, json_request, TestApp};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_health_check_reports_memory_store() {
    // Arrange
    let app = TestApp::new();

    // Act
    let (status, body) = app.send(get_request("/health", None)).await;

    // Assert
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "access-service");
    assert_eq!(body["checks"]["store"], "memory");
}

#[tokio::test]
async fn test_check_without_identity_is_unauthorized() {
    let app = TestApp::new();

    let (status, _) = app
        .send(json_request("POST", "/authz/check", None, json!({ "capability": "x" })))
        .await;

    assert_eq!(status, 401);
}

#[tokio::test]
async fn test_check_returns_decision_with_status() {
    // Arrange
    let app = TestApp::new();
    let user = app.user(UserRole::User);
    let capability = app.capability("ledger.view", Sensitivity::Normal);
    app.add_grant(user.user_id, capability.cap_id).await;

    // Act
    let (allowed_status, allowed) = app
        .send(json_request(
            "POST",
            "/authz/check",
            Some(user.user_id),
            json!({ "capability": "ledger.view" }),
        ))
        .await;
    let (denied_status, denied) = app
        .send(json_request(
            "POST",
            "/authz/check",
            Some(user.user_id),
            json!({ "capability": "ledger.edit" }),
        ))
        .await;

    // Assert
    assert_eq!(allowed_status, 200);
    assert_eq!(allowed["allowed"], true);
    assert_eq!(allowed["reason"], "ADD_GRANT");
    assert_eq!(allowed["access_level"], "READ_WRITE");
    assert_eq!(denied_status, 403);
    assert_eq!(denied["allowed"], false);
    assert_eq!(denied["reason"], "CAPABILITY_NOT_FOUND");
}

#[tokio::test]
async fn test_read_only_grant_cannot_satisfy_a_write_check() {
    // Arrange
    let app = TestApp::new();
    let user = app.user(UserRole::User);
    let capability = app.capability("ledger.view", Sensitivity::Normal);
    app.grant(user.user_id, capability.cap_id, GrantType::Add, AccessLevel::ReadOnly, None)
        .await;

    // Act
    let (read_status, _) = app
        .send(json_request(
            "POST",
            "/authz/check",
            Some(user.user_id),
            json!({ "capability": "ledger.view" }),
        ))
        .await;
    let (write_status, body) = app
        .send(json_request(
            "POST",
            "/authz/check",
            Some(user.user_id),
            json!({ "capability": "ledger.view", "require_write": true }),
        ))
        .await;

    // Assert
    assert_eq!(read_status, 200);
    assert_eq!(write_status, 403);
    assert_eq!(body["error"], "Read-only access: this action requires write access");
}

#[tokio::test]
async fn test_effective_capabilities_endpoint_lists_keys() {
    let app = TestApp::new();
    let admin = app.user(UserRole::SuperAdmin);

    let (status, body) = app
        .send(get_request("/authz/capabilities", Some(admin.user_id)))
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["capabilities"], json!(["*"]));
}

#[tokio::test]
async fn test_grant_request_flow_over_http() {
    // Arrange
    let app = TestApp::new();
    let requester = app.user(UserRole::User);
    let admin = app.user(UserRole::SuperAdmin);
    let capability = app.capability("invoices.approve", Sensitivity::Normal);

    // Act
    let (created_status, created) = app
        .send(json_request(
            "POST",
            "/grant-requests",
            Some(requester.user_id),
            json!({
                "cap_id": capability.cap_id,
                "space_id": Uuid::new_v4(),
                "justification": "Covering for a colleague on leave",
                "requested_days": 5,
                "access_level": "READ_WRITE",
            }),
        ))
        .await;
    let request_id = created["request_id"].as_str().unwrap().to_string();
    let (reject_status, _) = app
        .send(json_request(
            "POST",
            &format!("/grant-requests/{}/review", request_id),
            Some(admin.user_id),
            json!({ "action": "REJECT" }),
        ))
        .await;
    let (review_status, reviewed) = app
        .send(json_request(
            "POST",
            &format!("/grant-requests/{}/review", request_id),
            Some(admin.user_id),
            json!({ "action": "APPROVE" }),
        ))
        .await;
    let (again_status, _) = app
        .send(json_request(
            "POST",
            &format!("/grant-requests/{}/review", request_id),
            Some(admin.user_id),
            json!({ "action": "APPROVE" }),
        ))
        .await;

    // Assert
    assert_eq!(created_status, 201);
    assert_eq!(created["status"], "PENDING");
    assert_eq!(reject_status, 400);
    assert_eq!(review_status, 200);
    assert_eq!(reviewed["request"]["status"], "APPROVED");
    assert_eq!(reviewed["grant"]["grant_request_id"], request_id.as_str());
    assert_eq!(again_status, 409);
}

#[tokio::test]
async fn test_pending_grant_requests_need_approval_rights() {
    let app = TestApp::new();
    let user = app.user(UserRole::User);
    let admin = app.user(UserRole::SuperAdmin);

    let (user_status, _) = app
        .send(get_request("/grant-requests/pending", Some(user.user_id)))
        .await;
    let (admin_status, body) = app
        .send(get_request("/grant-requests/pending", Some(admin.user_id)))
        .await;

    assert_eq!(user_status, 403);
    assert_eq!(admin_status, 200);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_impersonation_requires_the_start_capability() {
    // Arrange
    let app = TestApp::new();
    let operator = app.user(UserRole::User);
    let target = app.user(UserRole::User);
    let body = json!({
        "impersonated_id": target.user_id,
        "justification": "Reproducing support ticket 981",
    });

    // Act
    let (denied_status, _) = app
        .send(json_request("POST", "/impersonation", Some(operator.user_id), body.clone()))
        .await;
    let capability = app.capability(keys::IMPERSONATION_START, Sensitivity::Critical);
    app.add_grant(operator.user_id, capability.cap_id).await;
    let (started_status, started) = app
        .send(json_request("POST", "/impersonation", Some(operator.user_id), body))
        .await;
    let (active_status, active) = app
        .send(get_request("/impersonation/active", Some(operator.user_id)))
        .await;

    // Assert
    assert_eq!(denied_status, 403);
    assert_eq!(started_status, 201);
    assert_eq!(active_status, 200);
    assert_eq!(active["session_id"], started["session_id"]);
}

#[tokio::test]
async fn test_policy_administration_requires_policies_manage() {
    // Arrange
    let app = TestApp::new();
    let user = app.user(UserRole::User);
    let admin = app.user(UserRole::SuperAdmin);
    let body = json!({
        "policy_name": "Office network",
        "target_type": "GLOBAL",
        "enforcement": "DENY",
        "conditions": {
            "type": "IP_RESTRICTION",
            "allowed_ips": ["10.0.0.0/8"],
        },
    });

    // Act
    let (user_status, _) = app
        .send(json_request("POST", "/policies", Some(user.user_id), body.clone()))
        .await;
    let (created_status, created) = app
        .send(json_request("POST", "/policies", Some(admin.user_id), body))
        .await;
    let policy_id = created["policy_id"].as_str().unwrap().to_string();
    let mut evaluate = json_request(
        "POST",
        &format!("/policies/{}/evaluate", policy_id),
        Some(admin.user_id),
        json!({ "context": { "ip": "192.168.1.1" } }),
    );
    evaluate
        .headers_mut()
        .insert("x-forwarded-for", "10.0.0.1".parse().unwrap());
    let (eval_status, evaluation) = app.send(evaluate).await;
    let (delete_status, _) = app
        .send(json_request(
            "DELETE",
            &format!("/policies/{}", policy_id),
            Some(admin.user_id),
            json!({}),
        ))
        .await;
    let (gone_status, _) = app
        .send(get_request(&format!("/policies/{}", policy_id), Some(admin.user_id)))
        .await;

    // Assert
    assert_eq!(user_status, 403);
    assert_eq!(created_status, 201);
    assert_eq!(eval_status, 200);
    assert_eq!(evaluation["allowed"], false);
    assert_eq!(evaluation["policy_id"], policy_id.as_str());
    assert_eq!(delete_status, 204);
    assert_eq!(gone_status, 404);
}

#[tokio::test]
async fn test_policy_auditor_can_read_and_evaluate_but_not_write() {
    // Arrange
    let app = TestApp::new();
    let admin = app.user(UserRole::SuperAdmin);
    let auditor = app.user(UserRole::User);
    let read = app.capability(keys::POLICIES_READ, Sensitivity::Sensitive);
    app.grant(
        auditor.user_id,
        read.cap_id,
        GrantType::Add,
        AccessLevel::ReadOnly,
        Some(Duration::days(7)),
    )
    .await;
    let body = json!({
        "policy_name": "Treasury office",
        "target_type": "CAPABILITY",
        "target_id": Uuid::new_v4(),
        "enforcement": "DENY",
        "conditions": {
            "type": "IP_RESTRICTION",
            "allowed_ips": ["10.0.0.0/8"],
        },
    });
    let (_, created) = app
        .send(json_request("POST", "/policies", Some(admin.user_id), body.clone()))
        .await;
    let policy_id = created["policy_id"].as_str().unwrap().to_string();

    // Act
    let (get_status, fetched) = app
        .send(get_request(&format!("/policies/{}", policy_id), Some(auditor.user_id)))
        .await;
    let (list_status, _) = app
        .send(get_request("/policies", Some(auditor.user_id)))
        .await;
    let (eval_status, evaluation) = app
        .send(json_request(
            "POST",
            &format!("/policies/{}/evaluate", policy_id),
            Some(auditor.user_id),
            json!({ "context": { "ip": "10.1.2.3" } }),
        ))
        .await;
    let (create_status, _) = app
        .send(json_request("POST", "/policies", Some(auditor.user_id), body))
        .await;
    let (delete_status, _) = app
        .send(json_request(
            "DELETE",
            &format!("/policies/{}", policy_id),
            Some(auditor.user_id),
            json!({}),
        ))
        .await;

    // Assert
    assert_eq!(get_status, 200);
    assert_eq!(fetched["policy_id"], policy_id.as_str());
    assert_eq!(list_status, 200);
    assert_eq!(eval_status, 200);
    assert_eq!(evaluation["allowed"], true);
    assert_eq!(create_status, 403);
    assert_eq!(delete_status, 403);
}

#[tokio::test]
async fn test_invalid_policy_conditions_are_bad_requests() {
    let app = TestApp::new();
    let admin = app.user(UserRole::SuperAdmin);

    let (status, _) = app
        .send(json_request(
            "POST",
            "/policies",
            Some(admin.user_id),
            json!({
                "policy_name": "Broken",
                "target_type": "GLOBAL",
                "enforcement": "DENY",
                "conditions": { "type": "IP_RESTRICTION", "allowed_ips": ["10.0.0.0/40"] },
            }),
        ))
        .await;

    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_device_trust_endpoint_returns_not_found_for_unknown_device() {
    let app = TestApp::new();
    let admin = app.user(UserRole::SuperAdmin);

    let (status, _) = app
        .send(json_request(
            "PUT",
            "/devices/abc123/trust",
            Some(admin.user_id),
            json!({ "trusted": true }),
        ))
        .await;

    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_responses_carry_security_headers_and_request_id() {
    let app = TestApp::new();

    let response = tower::ServiceExt::oneshot(app.router().await, get_request("/health", None))
        .await
        .unwrap();

    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
}

#[tokio::test]
async fn test_expired_grant_is_rejected_over_http() {
    let app = TestApp::new();
    let user = app.user(UserRole::User);
    let capability = app.capability("ledger.view", Sensitivity::Normal);
    app.grant(user.user_id, capability.cap_id, GrantType::Add, AccessLevel::ReadWrite, Some(Duration::minutes(5)))
        .await;
    app.advance(Duration::minutes(6));

    let (status, body) = app
        .send(json_request(
            "POST",
            "/authz/check",
            Some(user.user_id),
            json!({ "capability": "ledger.view" }),
        ))
        .await;

    assert_eq!(status, 403);
    assert_eq!(body["reason"], "NO_PERMISSION");
}
