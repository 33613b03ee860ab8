mod mfa;
mod principal;
mod role;
mod session;

pub use mfa::{MfaState, MfaStatus, MfaTransitionError};
pub use principal::{Principal, VenueRole};
pub use role::{Role, WILDCARD};
pub use session::Session;
