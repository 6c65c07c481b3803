//! Caller identity and request context, taken from headers set by the
//! trusted gateway in front of this service.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use chrono::{DateTime, Utc};
use std::convert::Infallible;
use uuid::Uuid;

use crate::models::{RequestContext, SessionInfo};
use service_core::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const REAL_IP_HEADER: &str = "x-real-ip";
pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const MFA_VERIFIED_AT_HEADER: &str = "x-mfa-verified-at";
pub const GEO_COUNTRY_HEADER: &str = "x-geo-country";

/// The authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_str(&parts.headers, USER_ID_HEADER)
            .and_then(|value| Uuid::parse_str(value).ok())
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing or invalid caller identity")))
    }
}

/// Client facts for policy evaluation. Never rejects; absent headers leave
/// fields empty.
#[derive(Debug, Clone, Default)]
pub struct ClientContext(pub RequestContext);

#[async_trait]
impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientContext(request_context(&parts.headers)))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// First hop of `x-forwarded-for`, else `x-real-ip`.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_str(headers, FORWARDED_FOR_HEADER)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| header_str(headers, REAL_IP_HEADER))
        .map(str::to_string)
}

pub fn request_context(headers: &HeaderMap) -> RequestContext {
    let mfa_verified_utc = header_str(headers, MFA_VERIFIED_AT_HEADER)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|at| at.with_timezone(&Utc));
    let session_id = header_str(headers, SESSION_ID_HEADER).map(str::to_string);

    let session = if session_id.is_some() || mfa_verified_utc.is_some() {
        Some(SessionInfo {
            session_id,
            mfa_verified: mfa_verified_utc.is_some(),
            mfa_verified_utc,
        })
    } else {
        None
    };

    RequestContext {
        ip: client_ip(headers),
        user_agent: header_str(headers, "user-agent").map(str::to_string),
        origin: header_str(headers, "origin").map(str::to_string),
        country: header_str(headers, GEO_COUNTRY_HEADER).map(|c| c.to_ascii_uppercase()),
        session,
        timestamp: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR_HEADER, "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert(REAL_IP_HEADER, "10.0.0.9".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_mfa_header_marks_session_verified() {
        let mut headers = HeaderMap::new();
        headers.insert(MFA_VERIFIED_AT_HEADER, "2024-01-09T14:00:00Z".parse().unwrap());
        let ctx = request_context(&headers);
        assert!(ctx.mfa_verified());
        assert!(ctx.mfa_verified_at().is_some());
    }

    #[test]
    fn test_unparseable_mfa_header_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(MFA_VERIFIED_AT_HEADER, "yesterday".parse().unwrap());
        assert!(!request_context(&headers).mfa_verified());
    }
}
