use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::jobs::JobIntervals;

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub store_backend: StoreBackend,
    pub database: DatabaseConfig,
    pub notifications: NotificationConfig,
    pub security: SecurityConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Webhook receiving notifications. Notifications are dropped when unset.
    pub webhook_url: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub audit_timeout_ms: u64,
    pub device_cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    pub enabled: bool,
    pub grant_expiry_secs: u64,
    pub impersonation_cleanup_secs: u64,
    pub access_review_secs: u64,
}

impl JobsConfig {
    pub fn intervals(&self) -> JobIntervals {
        JobIntervals {
            grant_expiry: Duration::from_secs(self.grant_expiry_secs),
            impersonation_cleanup: Duration::from_secs(self.impersonation_cleanup_secs),
            access_review: Duration::from_secs(self.access_review_secs),
        }
    }
}

impl SecurityConfig {
    pub fn audit_timeout(&self) -> Duration {
        Duration::from_millis(self.audit_timeout_ms)
    }

    pub fn device_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.device_cache_ttl_secs)
    }
}

impl AccessConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let store_backend: StoreBackend = get_env(
            "STORE_BACKEND",
            Some(if is_prod { "postgres" } else { "memory" }),
            false,
        )?
        .parse()
        .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let needs_database = store_backend == StoreBackend::Postgres;

        let config = AccessConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("access-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            store_backend,
            database: DatabaseConfig {
                url: if needs_database {
                    get_env("DATABASE_URL", None, is_prod)?
                } else {
                    env::var("DATABASE_URL").unwrap_or_default()
                },
                max_connections: get_parsed("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: get_parsed("DATABASE_MIN_CONNECTIONS", "1")?,
            },
            notifications: NotificationConfig {
                webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                    .ok()
                    .filter(|s| !s.is_empty()),
                timeout_ms: get_parsed("NOTIFICATION_TIMEOUT_MS", "5000")?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                audit_timeout_ms: get_parsed("AUDIT_TIMEOUT_MS", "2000")?,
                device_cache_ttl_secs: get_parsed("DEVICE_CACHE_TTL_SECS", "60")?,
            },
            jobs: JobsConfig {
                enabled: get_parsed("JOBS_ENABLED", "true")?,
                grant_expiry_secs: get_parsed("JOB_GRANT_EXPIRY_SECS", "3600")?,
                impersonation_cleanup_secs: get_parsed("JOB_IMPERSONATION_CLEANUP_SECS", "900")?,
                access_review_secs: get_parsed("JOB_ACCESS_REVIEW_SECS", "604800")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS must not exceed DATABASE_MAX_CONNECTIONS"
            )));
        }

        if self.security.audit_timeout_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "AUDIT_TIMEOUT_MS must be positive"
            )));
        }

        let jobs = &self.jobs;
        if jobs.grant_expiry_secs == 0 || jobs.impersonation_cleanup_secs == 0 || jobs.access_review_secs == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "job intervals must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.store_backend == StoreBackend::Memory {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "The in-memory store is not allowed in production"
                )));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.notifications.webhook_url.is_none() {
                tracing::warn!("NOTIFICATION_WEBHOOK_URL not set - notifications will be dropped");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_parsed<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(key, Some(default), false)?;
    raw.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e))
    })
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}
