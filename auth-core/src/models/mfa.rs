//! MFA enrollment state machine: `Disabled -> PendingSetup -> Enabled`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a principal sits in the MFA enrollment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfaStatus {
    Disabled,
    PendingSetup,
    Enabled,
}

#[derive(Debug, Error)]
pub enum MfaTransitionError {
    #[error("MFA is already enabled")]
    AlreadyEnabled,
    #[error("No pending MFA setup to confirm")]
    NoPendingSetup,
    #[error("MFA is not enabled")]
    NotEnabled,
}

/// Per-principal MFA record. Backup-code hashes live in the MFA store's
/// code set, not here, so consuming one is a single atomic store operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MfaState {
    #[serde(default)]
    pub enabled: bool,

    /// Confirmed TOTP secret (base32). Present only when enabled.
    pub secret: Option<String>,

    /// Secret generated by setup, awaiting the first valid code.
    pub pending_secret: Option<String>,

    pub last_verified_at: Option<DateTime<Utc>>,
}

impl MfaState {
    pub fn status(&self) -> MfaStatus {
        if self.enabled {
            MfaStatus::Enabled
        } else if self.pending_secret.is_some() {
            MfaStatus::PendingSetup
        } else {
            MfaStatus::Disabled
        }
    }

    /// Start (or restart) enrollment. Rejected once MFA is enabled; a
    /// repeated setup before confirmation simply replaces the pending secret.
    pub fn begin_setup(&mut self, secret: String) -> Result<(), MfaTransitionError> {
        if self.enabled {
            return Err(MfaTransitionError::AlreadyEnabled);
        }
        self.pending_secret = Some(secret);
        Ok(())
    }

    /// Promote the pending secret after the first valid TOTP code.
    pub fn confirm_setup(&mut self) -> Result<(), MfaTransitionError> {
        let secret = self
            .pending_secret
            .take()
            .ok_or(MfaTransitionError::NoPendingSetup)?;
        self.secret = Some(secret);
        self.enabled = true;
        Ok(())
    }

    /// Clear the secret. Callers must have already proven both password and
    /// a current TOTP code.
    pub fn disable(&mut self) -> Result<(), MfaTransitionError> {
        if !self.enabled {
            return Err(MfaTransitionError::NotEnabled);
        }
        self.enabled = false;
        self.secret = None;
        self.pending_secret = None;
        self.last_verified_at = None;
        Ok(())
    }

    pub fn mark_verified(&mut self) {
        self.last_verified_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enrollment_lifecycle() {
        let mut state = MfaState::default();
        assert_eq!(state.status(), MfaStatus::Disabled);

        state.begin_setup("SECRET1".to_string()).unwrap();
        assert_eq!(state.status(), MfaStatus::PendingSetup);

        state.confirm_setup().unwrap();
        assert_eq!(state.status(), MfaStatus::Enabled);
        assert_eq!(state.secret.as_deref(), Some("SECRET1"));
        assert!(state.pending_secret.is_none());
    }

    #[test]
    fn test_setup_rejected_when_enabled() {
        let mut state = MfaState::default();
        state.begin_setup("SECRET1".to_string()).unwrap();
        state.confirm_setup().unwrap();

        let err = state.begin_setup("SECRET2".to_string()).unwrap_err();
        assert!(matches!(err, MfaTransitionError::AlreadyEnabled));
    }

    #[test]
    fn test_confirm_without_pending_rejected() {
        let mut state = MfaState::default();
        assert!(matches!(
            state.confirm_setup(),
            Err(MfaTransitionError::NoPendingSetup)
        ));
    }

    #[test]
    fn test_repeated_setup_replaces_pending_secret() {
        let mut state = MfaState::default();
        state.begin_setup("SECRET1".to_string()).unwrap();
        state.begin_setup("SECRET2".to_string()).unwrap();
        state.confirm_setup().unwrap();
        assert_eq!(state.secret.as_deref(), Some("SECRET2"));
    }

    #[test]
    fn test_disable_clears_everything() {
        let mut state = MfaState::default();
        state.begin_setup("SECRET1".to_string()).unwrap();
        state.confirm_setup().unwrap();
        state.mark_verified();

        state.disable().unwrap();
        assert_eq!(state.status(), MfaStatus::Disabled);
        assert!(state.secret.is_none());
        assert!(state.last_verified_at.is_none());
    }

    #[test]
    fn test_disable_when_not_enabled_rejected() {
        let mut state = MfaState::default();
        assert!(matches!(
            state.disable(),
            Err(MfaTransitionError::NotEnabled)
        ));
    }
}
