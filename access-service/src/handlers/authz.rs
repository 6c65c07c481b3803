//! Authorization decision endpoints.

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::{ClientContext, CurrentUser};
use crate::models::{AccessLevel, Decision, GrantScope, RequestContext};
use crate::services::CheckRequest;
use crate::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct CheckBody {
    pub capability: String,
    pub space_id: Option<Uuid>,
    pub scope: Option<GrantScope>,
    /// The caller intends to write; a read-only grant is then not enough.
    #[serde(default)]
    pub require_write: bool,
}

#[derive(Debug, Deserialize)]
pub struct CheckAnyBody {
    pub capabilities: Vec<String>,
    pub space_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CapabilitiesQuery {
    pub space_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    pub user_id: Uuid,
    pub space_id: Option<Uuid>,
    pub capabilities: Vec<String>,
}

/// Check a capability for the caller, returning the decision or a 403 error.
/// Used by every handler that guards an administrative action.
pub async fn authorize(
    state: &AppState,
    user_id: Uuid,
    capability: &str,
    space_id: Option<Uuid>,
    ctx: &RequestContext,
    require_write: bool,
) -> Result<Decision, AppError> {
    let mut request = CheckRequest::new(user_id, capability).with_context(ctx.clone());
    request.space_id = space_id;

    let decision = state.engine.resolver.check(&request).await;
    if !decision.allowed {
        return Err(AppError::Forbidden(anyhow::anyhow!(decision.message)));
    }
    ensure_writable(&decision, require_write)?;
    Ok(decision)
}

fn ensure_writable(decision: &Decision, require_write: bool) -> Result<(), AppError> {
    if require_write && decision.access_level == Some(AccessLevel::ReadOnly) {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Read-only access: this action requires write access"
        )));
    }
    Ok(())
}

fn decision_response(decision: Decision) -> Response {
    let status = if decision.allowed {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };
    (status, Json(decision)).into_response()
}

/// POST /authz/check
pub async fn check(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ClientContext(ctx): ClientContext,
    Json(body): Json<CheckBody>,
) -> Result<Response, AppError> {
    let request = CheckRequest {
        user_id,
        capability: body.capability,
        space_id: body.space_id,
        scope: body.scope,
        context: ctx,
    };
    let decision = state.engine.resolver.check(&request).await;
    if decision.allowed {
        ensure_writable(&decision, body.require_write)?;
    }
    Ok(decision_response(decision))
}

/// POST /authz/check-any
pub async fn check_any(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ClientContext(ctx): ClientContext,
    Json(body): Json<CheckAnyBody>,
) -> Result<Response, AppError> {
    if body.capabilities.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "capabilities must not be empty"
        )));
    }
    let mut request = CheckRequest::new(user_id, String::new()).with_context(ctx);
    request.space_id = body.space_id;

    let codes: Vec<&str> = body.capabilities.iter().map(String::as_str).collect();
    let decision = state
        .engine
        .resolver
        .check_any(&request, &codes)
        .await
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("capabilities must not be empty")))?;
    Ok(decision_response(decision))
}

/// GET /authz/capabilities
pub async fn list_capabilities(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<CapabilitiesQuery>,
) -> Json<CapabilitiesResponse> {
    let capabilities = state
        .engine
        .resolver
        .list_effective_capabilities(user_id, query.space_id)
        .await;
    Json(CapabilitiesResponse {
        user_id,
        space_id: query.space_id,
        capabilities: capabilities.into_iter().collect(),
    })
}
