//! Grant request and grant endpoints.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::CurrentUser;
use crate::models::{
    CreateGrantRequest, GrantRequestResponse, GrantResponse, ReviewRequest,
};
use crate::services::{ReviewOutcome, ServiceError};
use crate::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub space_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    pub request: GrantRequestResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant: Option<GrantResponse>,
}

impl From<ReviewOutcome> for ReviewResponse {
    fn from(outcome: ReviewOutcome) -> Self {
        match outcome {
            ReviewOutcome::Approved { request, grant } => Self {
                request: request.into(),
                grant: Some(grant.into()),
            },
            ReviewOutcome::Rejected { request } => Self {
                request: request.into(),
                grant: None,
            },
        }
    }
}

/// POST /grant-requests
pub async fn create_grant_request(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(body): Json<CreateGrantRequest>,
) -> Result<(StatusCode, Json<GrantRequestResponse>), AppError> {
    let request = state.engine.grants.create_request(user_id, body).await?;
    Ok((StatusCode::CREATED, Json(request.into())))
}

/// GET /grant-requests/mine
pub async fn list_my_grant_requests(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<GrantRequestResponse>>, AppError> {
    let requests = state.engine.grants.list_my_requests(user_id).await?;
    Ok(Json(requests.into_iter().map(Into::into).collect()))
}

/// GET /grant-requests/pending
///
/// Visible to anyone holding at least NORMAL approval rights in the space.
pub async fn list_pending_grant_requests(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<PendingQuery>,
) -> Result<Json<Vec<GrantRequestResponse>>, AppError> {
    let reviewer = state
        .engine
        .store
        .find_user(user_id)
        .await
        .map_err(ServiceError::from)?
        .ok_or_else(|| AppError::Forbidden(anyhow::anyhow!("Unknown reviewer")))?;
    state
        .engine
        .grants
        .authorize_reviewer(&reviewer, query.space_id, None)
        .await?;

    let requests = state.engine.grants.list_pending(query.space_id).await?;
    Ok(Json(requests.into_iter().map(Into::into).collect()))
}

/// POST /grant-requests/:request_id/review
pub async fn review_grant_request(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(request_id): Path<Uuid>,
    Json(body): Json<ReviewRequest>,
) -> Result<Json<ReviewResponse>, AppError> {
    let outcome = state.engine.grants.review(user_id, request_id, &body).await?;
    Ok(Json(outcome.into()))
}

/// POST /grants/:grant_id/revoke
pub async fn revoke_grant(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(grant_id): Path<Uuid>,
) -> Result<Json<GrantResponse>, AppError> {
    let grant = state.engine.grants.revoke_grant(user_id, grant_id).await?;
    Ok(Json(grant.into()))
}
