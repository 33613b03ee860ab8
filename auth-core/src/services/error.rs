use http::StatusCode;
use thiserror::Error;

/// Error taxonomy for the authentication core.
///
/// Every variant maps to the status code a transport layer should surface.
/// Credential and token failures are intentionally uninformative: callers
/// get the same `Authentication` error whether a password was wrong, a token
/// was expired, or a token was reused.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authentication failed")]
    Authentication,

    /// A refresh token was redeemed twice. Internal only: the session has
    /// already been revoked, and `into_public` degrades this to
    /// `Authentication` before it crosses the core boundary.
    #[error("Refresh token reuse detected for session {session_id}")]
    TokenReuse { session_id: String },

    #[error("Account temporarily locked, retry after {retry_after_seconds}s")]
    Lockout { retry_after_seconds: u64 },

    #[error("Multi-factor authentication required")]
    MfaRequired,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing permission: {missing}")]
    Authorization { missing: String },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// HTTP-equivalent status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Authentication | AuthError::TokenReuse { .. } => StatusCode::UNAUTHORIZED,
            AuthError::Lockout { .. } => StatusCode::LOCKED,
            AuthError::MfaRequired | AuthError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::Authorization { .. } => StatusCode::FORBIDDEN,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Seconds the caller should wait before retrying, for lockout errors.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            AuthError::Lockout {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }

    /// Strip internal detail before the error leaves the core.
    ///
    /// Reuse detection must not be distinguishable from an ordinary invalid
    /// token, otherwise the error itself becomes an oracle.
    pub fn into_public(self) -> Self {
        match self {
            AuthError::TokenReuse { .. } => AuthError::Authentication,
            other => other,
        }
    }
}
