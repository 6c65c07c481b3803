pub mod audit_event;
pub mod capability;
pub mod context;
pub mod decision;
pub mod device;
pub mod grant;
pub mod grant_request;
pub mod impersonation;
pub mod policy;
pub mod security_request;
pub mod space_role;
pub mod user;

pub use audit_event::{AuditEvent, AuditEventKind};
pub use capability::{keys, Capability, Sensitivity};
pub use context::{RequestContext, SessionInfo};
pub use decision::{Decision, DecisionMetadata, FailedPolicy, Reason};
pub use device::{DeviceRecord, DeviceType};
pub use grant::{AccessLevel, Grant, GrantResponse, GrantScope, GrantStatus, GrantType};
pub use grant_request::{
    CreateGrantRequest, GrantRequest, GrantRequestResponse, GrantRequestStatus, ReviewAction,
    ReviewRequest,
};
pub use impersonation::{
    ImpersonationSession, ImpersonationStatus, StartImpersonationRequest, SESSION_TTL_MINUTES,
};
pub use policy::{
    ConditionError, CreatePolicyRequest, Enforcement, HourRange, Policy, PolicyConditions,
    PolicyFilter, PolicyKind, PolicyTargetType, TimeWindow, UpdatePolicyRequest,
};
pub use security_request::{
    CreateSecurityRequest, SecurityEffect, SecurityRequest, SecurityRequestStatus,
    SecurityRequestType,
};
pub use space_role::{ApprovalLevel, SpaceRole, UserSpaceRole};
pub use user::{User, UserRole};
