//! Service layer: token lifecycle, MFA, RBAC, lockout, and the login
//! orchestrator that sequences them.

mod auth;
mod error;
mod lockout;
mod mfa;
mod rbac;
pub(crate) mod token;

pub use auth::{AuthOrchestrator, LoginRequest};
pub use error::AuthError;
pub use lockout::{LockStatus, LockoutGuard};
pub use mfa::{MfaEngine, MfaProof, MfaSetup};
pub use rbac::{PermissionSet, RbacResolver};
pub use token::{
    AccessClaims, IntrospectResponse, RefreshClaims, TokenPair, TokenService,
};
