//! HTTP handlers for access-service.

pub mod authz;
pub mod context;
pub mod devices;
pub mod grants;
pub mod impersonation;
pub mod metrics;
pub mod policies;
pub mod security;

pub use authz::*;
pub use context::*;
pub use devices::*;
pub use grants::*;
pub use impersonation::*;
pub use policies::*;
pub use security::*;
