//! Service-level errors and their mapping to HTTP errors.

use service_core::error::AppError;
use thiserror::Error;

use super::store::StoreError;
use crate::models::ApprovalLevel;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    InvalidInput(#[from] validator::ValidationErrors),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error(
        "insufficient approval level: requires {required}, reviewer holds {}",
        held_label(.held)
    )]
    InsufficientApprovalLevel {
        required: ApprovalLevel,
        held: Option<ApprovalLevel>,
    },

    #[error("{0}")]
    InvalidState(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn held_label(held: &Option<ApprovalLevel>) -> &'static str {
    held.as_ref().map_or("none", ApprovalLevel::as_str)
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::InvalidInput(errors) => AppError::ValidationError(errors),
            ServiceError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            ServiceError::Forbidden(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            e @ ServiceError::InsufficientApprovalLevel { .. } => {
                AppError::Forbidden(anyhow::anyhow!(e.to_string()))
            }
            ServiceError::InvalidState(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            ServiceError::Store(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ServiceError, StatusCode)> = vec![
            (ServiceError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (ServiceError::NotFound("grant request"), StatusCode::NOT_FOUND),
            (ServiceError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (
                ServiceError::InsufficientApprovalLevel {
                    required: ApprovalLevel::Critical,
                    held: Some(ApprovalLevel::Normal),
                },
                StatusCode::FORBIDDEN,
            ),
            (ServiceError::InvalidState("x".into()), StatusCode::CONFLICT),
            (
                ServiceError::Store(StoreError::Unavailable("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_insufficient_level_message() {
        let err = ServiceError::InsufficientApprovalLevel {
            required: ApprovalLevel::Critical,
            held: None,
        };
        assert_eq!(
            err.to_string(),
            "insufficient approval level: requires CRITICAL, reviewer holds none"
        );
    }
}
