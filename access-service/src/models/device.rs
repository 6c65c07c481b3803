//! Device model - a fingerprinted client a user has been seen on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
        }
    }
}

/// Device entity. `device_id` is the fingerprint itself.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeviceRecord {
    pub device_id: String,
    pub user_id: Uuid,
    pub device_name: String,
    pub device_type_code: String,
    pub is_trusted: bool,
    pub first_seen_utc: DateTime<Utc>,
    pub last_seen_utc: DateTime<Utc>,
}

impl DeviceRecord {
    /// First sighting of a device. Devices start untrusted.
    pub fn first_sighting(
        device_id: String,
        user_id: Uuid,
        device_name: String,
        device_type: DeviceType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id,
            user_id,
            device_name,
            device_type_code: device_type.as_str().to_string(),
            is_trusted: false,
            first_seen_utc: now,
            last_seen_utc: now,
        }
    }
}
