//! Request context - what the gateway knows about the caller at check time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session facts relevant to MFA freshness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: Option<String>,
    #[serde(default)]
    pub mfa_verified: bool,
    pub mfa_verified_utc: Option<DateTime<Utc>>,
}

/// Caller context evaluated by contextual policies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub origin: Option<String>,
    /// ISO 3166 alpha-2 country, when the gateway geolocates the caller.
    pub country: Option<String>,
    pub session: Option<SessionInfo>,
    /// Evaluation instant for time policies. Defaults to the service clock.
    pub timestamp: Option<DateTime<Utc>>,
}

impl RequestContext {
    pub fn with_client(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            user_agent: Some(user_agent.into()),
            ..Default::default()
        }
    }

    pub fn with_mfa(mut self, verified_utc: DateTime<Utc>) -> Self {
        let session = self.session.get_or_insert_with(SessionInfo::default);
        session.mfa_verified = true;
        session.mfa_verified_utc = Some(verified_utc);
        self
    }

    /// `Some(at)` only when the session completed MFA and recorded when.
    pub fn mfa_verified_at(&self) -> Option<DateTime<Utc>> {
        self.session
            .as_ref()
            .filter(|s| s.mfa_verified)
            .and_then(|s| s.mfa_verified_utc)
    }

    pub fn mfa_verified(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.mfa_verified)
    }
}
