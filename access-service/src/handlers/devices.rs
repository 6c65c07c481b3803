//! Device trust management.

use axum::extract::{Json, Path, State};
use serde::{Deserialize, Serialize};

use super::authz::authorize;
use super::context::{ClientContext, CurrentUser};
use crate::models::keys;
use crate::services::ServiceError;
use crate::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct TrustBody {
    pub trusted: bool,
}

#[derive(Debug, Serialize)]
pub struct TrustResponse {
    pub device_id: String,
    pub is_trusted: bool,
}

/// PUT /devices/:device_id/trust
pub async fn set_device_trust(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ClientContext(ctx): ClientContext,
    Path(device_id): Path<String>,
    Json(body): Json<TrustBody>,
) -> Result<Json<TrustResponse>, AppError> {
    authorize(&state, user_id, keys::DEVICES_MANAGE, None, &ctx, true).await?;

    let updated = state
        .engine
        .devices
        .set_trust(&device_id, body.trusted)
        .await
        .map_err(ServiceError::from)?;
    if !updated {
        return Err(ServiceError::NotFound("device").into());
    }

    tracing::info!(device_id = %device_id, trusted = body.trusted, actor_id = %user_id, "Device trust changed");
    Ok(Json(TrustResponse {
        device_id,
        is_trusted: body.trusted,
    }))
}
