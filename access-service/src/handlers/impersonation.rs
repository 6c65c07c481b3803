//! Impersonation session endpoints.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use super::authz::authorize;
use super::context::{ClientContext, CurrentUser};
use crate::models::{keys, ImpersonationSession, StartImpersonationRequest};
use crate::AppState;
use service_core::error::AppError;

/// POST /impersonation
pub async fn start_impersonation(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ClientContext(ctx): ClientContext,
    Json(body): Json<StartImpersonationRequest>,
) -> Result<(StatusCode, Json<ImpersonationSession>), AppError> {
    authorize(&state, user_id, keys::IMPERSONATION_START, None, &ctx, false).await?;
    let session = state
        .engine
        .impersonation
        .start_session(user_id, body, &ctx)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /impersonation/active
pub async fn get_active_impersonation(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Option<ImpersonationSession>>, AppError> {
    let session = state.engine.impersonation.get_active_session(user_id).await?;
    Ok(Json(session))
}

/// POST /impersonation/:session_id/stop
pub async fn stop_impersonation(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ImpersonationSession>, AppError> {
    let session = state
        .engine
        .impersonation
        .stop_session(user_id, session_id)
        .await?;
    Ok(Json(session))
}
