//! Device tracking - fingerprints the requesting client and reports whether
//! it has been trusted.
//!
//! Trust lookups are cached per fingerprint for a short TTL. Trust changes
//! made through `set_trust` invalidate the cached entry immediately.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::clock::Clock;
use super::store::{AccessStore, StoreResult};
use crate::models::{DeviceRecord, DeviceType};

/// What the decision path needs to know about a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_name: String,
    pub device_type: DeviceType,
    pub is_trusted: bool,
}

impl From<DeviceRecord> for DeviceInfo {
    fn from(d: DeviceRecord) -> Self {
        let device_type = match d.device_type_code.as_str() {
            "mobile" => DeviceType::Mobile,
            "tablet" => DeviceType::Tablet,
            _ => DeviceType::Desktop,
        };
        Self {
            device_id: d.device_id,
            device_name: d.device_name,
            device_type,
            is_trusted: d.is_trusted,
        }
    }
}

/// Stable fingerprint of a client: hex SHA-256 of `"{user_agent}:{ip}"`.
pub fn fingerprint(user_agent: &str, ip: &str) -> String {
    hex::encode(Sha256::digest(format!("{}:{}", user_agent, ip).as_bytes()))
}

pub fn detect_device_type(user_agent: &str) -> DeviceType {
    let ua = user_agent.to_lowercase();
    if ua.contains("mobile") || ua.contains("android") || ua.contains("iphone") {
        DeviceType::Mobile
    } else if ua.contains("tablet") || ua.contains("ipad") {
        DeviceType::Tablet
    } else {
        DeviceType::Desktop
    }
}

/// Friendly name such as "Firefox on Linux".
pub fn device_name(user_agent: &str) -> String {
    let ua = user_agent.to_lowercase();

    // Edge and Chrome both advertise "chrome"; Chrome and Safari both advertise "safari".
    let browser = if ua.contains("edg") {
        "Edge"
    } else if ua.contains("chrome") {
        "Chrome"
    } else if ua.contains("firefox") {
        "Firefox"
    } else if ua.contains("safari") {
        "Safari"
    } else {
        "Unknown"
    };

    let os = if ua.contains("windows") {
        "Windows"
    } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ios") {
        "iOS"
    } else if ua.contains("mac") {
        "MacOS"
    } else if ua.contains("android") {
        "Android"
    } else if ua.contains("linux") {
        "Linux"
    } else {
        "Unknown"
    };

    format!("{} on {}", browser, os)
}

struct CachedDevice {
    info: DeviceInfo,
    cached_at: Instant,
}

pub struct DeviceTracker {
    store: Arc<dyn AccessStore>,
    clock: Arc<dyn Clock>,
    cache: DashMap<String, CachedDevice>,
    ttl: Duration,
}

impl DeviceTracker {
    pub fn new(store: Arc<dyn AccessStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            store,
            clock,
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Record a sighting of the client and return its trust state. First
    /// sightings create an untrusted device.
    pub async fn track(&self, user_id: Uuid, user_agent: &str, ip: &str) -> StoreResult<DeviceInfo> {
        let device_id = fingerprint(user_agent, ip);

        if let Some(cached) = self.cache.get(&device_id) {
            if cached.cached_at.elapsed() < self.ttl {
                return Ok(cached.info.clone());
            }
        }

        let sighting = DeviceRecord::first_sighting(
            device_id.clone(),
            user_id,
            device_name(user_agent),
            detect_device_type(user_agent),
            self.clock.now(),
        );
        let stored = self.store.record_device_sighting(&sighting).await?;
        let info = DeviceInfo::from(stored);

        tracing::debug!(
            user_id = %user_id,
            device_id = %info.device_id,
            trusted = info.is_trusted,
            "Device sighting recorded"
        );

        self.cache.insert(
            device_id,
            CachedDevice {
                info: info.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(info)
    }

    /// Promote or demote a device. Returns false for an unknown device.
    pub async fn set_trust(&self, device_id: &str, trusted: bool) -> StoreResult<bool> {
        let updated = self.store.set_device_trust(device_id, trusted).await?;
        self.cache.remove(device_id);
        if updated {
            tracing::info!(device_id = %device_id, trusted, "Device trust changed");
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::SystemClock;
    use crate::services::memory::MemoryStore;

    const FIREFOX_LINUX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0";
    const SAFARI_IPHONE: &str =
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 Mobile/15E148 Safari/604.1";

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        let id = fingerprint("agent", "10.0.0.1");
        assert_eq!(id.len(), 64);
        assert_eq!(id, fingerprint("agent", "10.0.0.1"));
        assert_ne!(id, fingerprint("agent", "10.0.0.2"));
    }

    #[test]
    fn test_device_classification() {
        assert_eq!(detect_device_type(FIREFOX_LINUX), DeviceType::Desktop);
        assert_eq!(detect_device_type(SAFARI_IPHONE), DeviceType::Mobile);
        assert_eq!(detect_device_type("Mozilla/5.0 (iPad; CPU OS 17_0)"), DeviceType::Tablet);
        assert_eq!(device_name(FIREFOX_LINUX), "Firefox on Linux");
        assert_eq!(device_name(SAFARI_IPHONE), "Safari on iOS");
    }

    #[tokio::test]
    async fn test_new_device_is_untrusted_until_promoted() {
        let store = Arc::new(MemoryStore::new());
        let tracker = DeviceTracker::new(store.clone(), Arc::new(SystemClock), Duration::from_secs(60));
        let user_id = Uuid::new_v4();

        let first = tracker.track(user_id, FIREFOX_LINUX, "10.0.0.1").await.unwrap();
        assert!(!first.is_trusted);

        assert!(tracker.set_trust(&first.device_id, true).await.unwrap());
        let second = tracker.track(user_id, FIREFOX_LINUX, "10.0.0.1").await.unwrap();
        assert!(second.is_trusted);
    }
}
