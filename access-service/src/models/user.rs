//! User model - the identity a capability check is made for.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Platform-wide user roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    SuperAdmin,
    TenantAdmin,
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::SuperAdmin => "SUPER_ADMIN",
            UserRole::TenantAdmin => "TENANT_ADMIN",
            UserRole::User => "USER",
        }
    }

    /// Unknown codes resolve to the least privileged role.
    pub fn parse(s: &str) -> Self {
        match s {
            "SUPER_ADMIN" => UserRole::SuperAdmin,
            "TENANT_ADMIN" => UserRole::TenantAdmin,
            _ => UserRole::User,
        }
    }
}

/// User entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub email: String,
    pub display_name: String,
    pub role_code: String,
    pub two_factor_enabled: bool,
    #[serde(skip_serializing, default)]
    pub two_factor_secret: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl User {
    /// Create a new user.
    pub fn new(tenant_id: Option<Uuid>, email: String, display_name: String, role: UserRole) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            tenant_id,
            email,
            display_name,
            role_code: role.as_str().to_string(),
            two_factor_enabled: false,
            two_factor_secret: None,
            created_utc: Utc::now(),
        }
    }

    pub fn role(&self) -> UserRole {
        UserRole::parse(&self.role_code)
    }

    pub fn is_super_admin(&self) -> bool {
        self.role() == UserRole::SuperAdmin
    }
}
