//! Policy administration and dry-run evaluation endpoints. All of them
//! require the policy management capability.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

use super::authz::authorize;
use super::context::{ClientContext, CurrentUser};
use crate::models::{
    keys, CreatePolicyRequest, Policy, PolicyFilter, PolicyTargetType, RequestContext,
    UpdatePolicyRequest,
};
use crate::services::PolicyEvaluation;
use crate::AppState;
use service_core::error::AppError;

#[derive(Debug, Default, Deserialize)]
pub struct EvaluateBody {
    /// Sample context to test against.
    #[serde(default)]
    pub context: RequestContext,
}

#[derive(Debug, Deserialize)]
pub struct BatchEvaluateBody {
    pub target_type: PolicyTargetType,
    pub target_id: Option<Uuid>,
    #[serde(default)]
    pub context: RequestContext,
}

async fn require_policy_admin(
    state: &AppState,
    user_id: Uuid,
    ctx: &RequestContext,
) -> Result<(), AppError> {
    authorize(state, user_id, keys::POLICIES_MANAGE, None, ctx, true).await?;
    Ok(())
}

/// POST /policies
pub async fn create_policy(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ClientContext(ctx): ClientContext,
    Json(body): Json<CreatePolicyRequest>,
) -> Result<(StatusCode, Json<Policy>), AppError> {
    require_policy_admin(&state, user_id, &ctx).await?;
    let policy = state.engine.policies.create_policy(body).await?;
    Ok((StatusCode::CREATED, Json(policy)))
}

/// GET /policies
pub async fn list_policies(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ClientContext(ctx): ClientContext,
    Query(filter): Query<PolicyFilter>,
) -> Result<Json<Vec<Policy>>, AppError> {
    authorize(&state, user_id, keys::POLICIES_READ, None, &ctx, false).await?;
    let policies = state.engine.policies.list_policies(&filter).await?;
    Ok(Json(policies))
}

/// GET /policies/:policy_id
pub async fn get_policy(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ClientContext(ctx): ClientContext,
    Path(policy_id): Path<Uuid>,
) -> Result<Json<Policy>, AppError> {
    authorize(&state, user_id, keys::POLICIES_READ, None, &ctx, false).await?;
    let policy = state.engine.policies.get_policy(policy_id).await?;
    Ok(Json(policy))
}

/// PATCH /policies/:policy_id
pub async fn update_policy(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ClientContext(ctx): ClientContext,
    Path(policy_id): Path<Uuid>,
    Json(body): Json<UpdatePolicyRequest>,
) -> Result<Json<Policy>, AppError> {
    require_policy_admin(&state, user_id, &ctx).await?;
    let policy = state.engine.policies.update_policy(policy_id, body).await?;
    Ok(Json(policy))
}

/// DELETE /policies/:policy_id
pub async fn delete_policy(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ClientContext(ctx): ClientContext,
    Path(policy_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    require_policy_admin(&state, user_id, &ctx).await?;
    state.engine.policies.delete_policy(policy_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /policies/:policy_id/evaluate
pub async fn evaluate_policy(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ClientContext(ctx): ClientContext,
    Path(policy_id): Path<Uuid>,
    Json(body): Json<EvaluateBody>,
) -> Result<Json<PolicyEvaluation>, AppError> {
    authorize(&state, user_id, keys::POLICIES_READ, None, &ctx, false).await?;
    let result = state
        .engine
        .policies
        .evaluate_policy_by_id(policy_id, &body.context)
        .await?;
    Ok(Json(result))
}

/// POST /policies/evaluate
pub async fn evaluate_policies(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ClientContext(ctx): ClientContext,
    Json(body): Json<BatchEvaluateBody>,
) -> Result<Json<PolicyEvaluation>, AppError> {
    authorize(&state, user_id, keys::POLICIES_READ, None, &ctx, false).await?;
    let result = state
        .engine
        .policies
        .evaluate_policies(body.target_type, body.target_id, &body.context)
        .await?;
    Ok(Json(result))
}
