//! Wires the access-control services around one store, notifier and clock.

use std::sync::Arc;
use std::time::Duration;

use super::audit::AuditRecorder;
use super::clock::Clock;
use super::device::DeviceTracker;
use super::grants::GrantLifecycleManager;
use super::impersonation::ImpersonationSessionManager;
use super::jobs::SecurityJobs;
use super::notifier::Notifier;
use super::policy::PolicyEvaluator;
use super::policy_admin::PolicyService;
use super::resolver::CapabilityResolver;
use super::security_request::SecurityRequestWorkflow;
use super::store::AccessStore;

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub audit_timeout: Duration,
    pub device_cache_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            audit_timeout: Duration::from_secs(2),
            device_cache_ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct AccessEngine {
    pub store: Arc<dyn AccessStore>,
    pub devices: Arc<DeviceTracker>,
    pub resolver: Arc<CapabilityResolver>,
    pub policies: Arc<PolicyService>,
    pub grants: Arc<GrantLifecycleManager>,
    pub impersonation: Arc<ImpersonationSessionManager>,
    pub security_requests: Arc<SecurityRequestWorkflow>,
    pub jobs: Arc<SecurityJobs>,
}

impl AccessEngine {
    pub fn new(
        store: Arc<dyn AccessStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let audit = Arc::new(AuditRecorder::new(store.clone(), settings.audit_timeout));
        let devices = Arc::new(DeviceTracker::new(
            store.clone(),
            clock.clone(),
            settings.device_cache_ttl,
        ));
        let evaluator = Arc::new(PolicyEvaluator::new(store.clone(), devices.clone(), clock.clone()));
        let resolver = Arc::new(CapabilityResolver::new(
            store.clone(),
            evaluator,
            audit.clone(),
            clock.clone(),
        ));
        let policies = Arc::new(PolicyService::new(store.clone(), clock.clone()));
        let grants = Arc::new(GrantLifecycleManager::new(
            store.clone(),
            audit.clone(),
            notifier.clone(),
            clock.clone(),
        ));
        let impersonation = Arc::new(ImpersonationSessionManager::new(
            store.clone(),
            audit.clone(),
            clock.clone(),
        ));
        let security_requests = Arc::new(SecurityRequestWorkflow::new(
            store.clone(),
            resolver.clone(),
            audit,
            notifier.clone(),
            clock.clone(),
        ));
        let jobs = Arc::new(SecurityJobs::new(
            store.clone(),
            grants.clone(),
            impersonation.clone(),
            notifier,
            clock,
        ));

        Self {
            store,
            devices,
            resolver,
            policies,
            grants,
            impersonation,
            security_requests,
            jobs,
        }
    }
}
