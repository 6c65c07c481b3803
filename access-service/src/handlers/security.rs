//! Security request endpoints.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use super::authz::authorize;
use super::context::{ClientContext, CurrentUser};
use crate::models::{keys, CreateSecurityRequest, ReviewRequest, SecurityRequest};
use crate::AppState;
use service_core::error::AppError;

/// POST /security-requests
pub async fn create_security_request(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(body): Json<CreateSecurityRequest>,
) -> Result<(StatusCode, Json<SecurityRequest>), AppError> {
    let request = state.engine.security_requests.create(user_id, body).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// GET /security-requests/pending
pub async fn list_pending_security_requests(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ClientContext(ctx): ClientContext,
) -> Result<Json<Vec<SecurityRequest>>, AppError> {
    authorize(&state, user_id, keys::TWO_FACTOR_RESET, None, &ctx, false).await?;
    let requests = state.engine.security_requests.list_pending().await?;
    Ok(Json(requests))
}

/// POST /security-requests/:request_id/review
pub async fn review_security_request(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ClientContext(ctx): ClientContext,
    Path(request_id): Path<Uuid>,
    Json(body): Json<ReviewRequest>,
) -> Result<Json<SecurityRequest>, AppError> {
    let request = state
        .engine
        .security_requests
        .review(user_id, request_id, &body, &ctx)
        .await?;
    Ok(Json(request))
}

/// POST /security-requests/:request_id/execute
pub async fn execute_security_request(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ClientContext(ctx): ClientContext,
    Path(request_id): Path<Uuid>,
) -> Result<Json<SecurityRequest>, AppError> {
    let request = state
        .engine
        .security_requests
        .execute(user_id, request_id, &ctx)
        .await?;
    Ok(Json(request))
}
