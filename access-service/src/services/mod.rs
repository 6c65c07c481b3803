pub mod audit;
pub mod clock;
pub mod database;
pub mod device;
pub mod engine;
pub mod error;
pub mod grants;
pub mod impersonation;
pub mod jobs;
pub mod memory;
pub mod metrics;
pub mod notifier;
pub mod policy;
pub mod policy_admin;
pub mod resolver;
pub mod security_request;
pub mod store;

pub use audit::AuditRecorder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use database::Database;
pub use device::{DeviceInfo, DeviceTracker};
pub use engine::{AccessEngine, EngineSettings};
pub use error::ServiceError;
pub use grants::{GrantLifecycleManager, ReviewOutcome};
pub use impersonation::ImpersonationSessionManager;
pub use jobs::{AccessReviewReport, JobIntervals, SecurityJobs};
pub use memory::MemoryStore;
pub use notifier::{HttpNotifier, NoopNotifier, Notification, Notifier, RecordingNotifier};
pub use policy::PolicyEvaluator;
pub use policy_admin::{PolicyEvaluation, PolicyService};
pub use resolver::{CapabilityResolver, CheckRequest};
pub use security_request::SecurityRequestWorkflow;
pub use store::{AccessStore, StoreError, StoreResult};
