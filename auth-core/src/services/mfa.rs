use rand::Rng;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use totp_rs::{Algorithm, Secret, TOTP};

use crate::config::MfaConfig;
use crate::models::Principal;
use crate::services::token::hash_token;
use crate::services::AuthError;
use crate::stores::{CredentialVerifier, MfaStore};

/// Material returned once at enrollment start.
#[derive(Debug)]
pub struct MfaSetup {
    /// Base32-encoded TOTP secret, for manual entry.
    pub secret: String,
    /// otpauth:// URI for authenticator apps.
    pub provisioning_uri: String,
}

/// A second factor presented at login.
#[derive(Debug)]
pub enum MfaProof {
    Totp(String),
    BackupCode(String),
}

/// TOTP enrollment and verification plus single-use backup codes.
///
/// Backup codes are stored as SHA-256 hashes; the plaintext exists only in
/// the response that generated them. Consumption is a single atomic store
/// removal, so a code can never be redeemed twice.
#[derive(Clone)]
pub struct MfaEngine {
    store: Arc<dyn MfaStore>,
    verifier: Arc<dyn CredentialVerifier>,
    config: MfaConfig,
}

impl MfaEngine {
    pub fn new(
        store: Arc<dyn MfaStore>,
        verifier: Arc<dyn CredentialVerifier>,
        config: MfaConfig,
    ) -> Self {
        Self {
            store,
            verifier,
            config,
        }
    }

    fn build_totp(&self, secret_b32: &str, account: &str) -> Result<TOTP, AuthError> {
        let secret = Secret::Encoded(secret_b32.to_string())
            .to_bytes()
            .map_err(|e| anyhow::anyhow!("Invalid TOTP secret: {:?}", e))?;
        TOTP::new(
            Algorithm::SHA1,
            self.config.totp_digits,
            self.config.totp_skew_steps,
            self.config.totp_step_seconds,
            secret,
            Some(self.config.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("TOTP init error: {}", e)))
    }

    fn check_code(&self, secret_b32: &str, account: &str, code: &str, at: u64) -> Result<bool, AuthError> {
        let totp = self.build_totp(secret_b32, account)?;
        Ok(totp.check(code, at))
    }

    fn now() -> Result<u64, AuthError> {
        Ok(SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| anyhow::anyhow!("System clock before epoch: {}", e))?
            .as_secs())
    }

    /// Begin enrollment: generate a pending secret and return it with its
    /// provisioning URI. Nothing is trusted until `confirm_setup` sees a
    /// valid code from the authenticator.
    pub async fn setup(&self, principal: &Principal) -> Result<MfaSetup, AuthError> {
        let mut state = self.store.get(&principal.id).await?.unwrap_or_default();

        let secret_b32 = Secret::generate_secret().to_encoded().to_string();
        state
            .begin_setup(secret_b32.clone())
            .map_err(|e| AuthError::InvalidRequest(e.to_string()))?;

        let totp = self.build_totp(&secret_b32, &principal.email)?;
        let provisioning_uri = totp.get_url();

        self.store.put(&principal.id, &state).await?;

        tracing::info!(user_id = %principal.id, "MFA enrollment started");

        Ok(MfaSetup {
            secret: secret_b32,
            provisioning_uri,
        })
    }

    /// Complete enrollment with the first valid code, returning the
    /// plaintext backup codes. This is the only time they are visible.
    pub async fn confirm_setup(
        &self,
        principal: &Principal,
        code: &str,
    ) -> Result<Vec<String>, AuthError> {
        let mut state = self
            .store
            .get(&principal.id)
            .await?
            .ok_or_else(|| AuthError::InvalidRequest("No pending MFA setup".to_string()))?;
        let pending = state
            .pending_secret
            .clone()
            .ok_or_else(|| AuthError::InvalidRequest("No pending MFA setup".to_string()))?;

        if !self.check_code(&pending, &principal.email, code, Self::now()?)? {
            return Err(AuthError::Authentication);
        }

        state
            .confirm_setup()
            .map_err(|e| AuthError::InvalidRequest(e.to_string()))?;
        state.mark_verified();

        let codes = generate_backup_codes(self.config.backup_code_count);
        let hashes: Vec<String> = codes.iter().map(|c| hash_token(c)).collect();
        self.store
            .replace_backup_codes(&principal.id, &hashes)
            .await?;
        self.store.put(&principal.id, &state).await?;

        tracing::info!(user_id = %principal.id, "MFA enabled");

        Ok(codes)
    }

    /// Verify a second factor for an enabled principal.
    ///
    /// A backup code is matched against the stored hashes in constant time
    /// and then consumed atomically; of two concurrent presentations of the
    /// same code, exactly one returns true. TOTP verification never touches
    /// the backup-code set.
    pub async fn verify(&self, principal: &Principal, proof: &MfaProof) -> Result<bool, AuthError> {
        let Some(mut state) = self.store.get(&principal.id).await? else {
            return Ok(false);
        };
        if !state.enabled {
            return Ok(false);
        }

        match proof {
            MfaProof::Totp(code) => {
                let Some(secret) = state.secret.clone() else {
                    return Ok(false);
                };
                let ok = self.check_code(&secret, &principal.email, code, Self::now()?)?;
                if ok {
                    state.mark_verified();
                    self.store.put(&principal.id, &state).await?;
                }
                Ok(ok)
            }
            MfaProof::BackupCode(code) => {
                let presented = hash_token(code.trim());
                let hashes = self.store.backup_code_hashes(&principal.id).await?;

                // Scan the whole set regardless of where a match sits.
                let mut matched: Option<String> = None;
                for hash in &hashes {
                    if hash.as_bytes().ct_eq(presented.as_bytes()).into() {
                        matched = Some(hash.clone());
                    }
                }
                let Some(hash) = matched else {
                    return Ok(false);
                };

                let consumed = self.store.consume_backup_code(&principal.id, &hash).await?;
                if consumed {
                    tracing::info!(user_id = %principal.id, "Backup code consumed");
                    state.mark_verified();
                    self.store.put(&principal.id, &state).await?;
                }
                Ok(consumed)
            }
        }
    }

    /// Replace the full backup-code set; every previously issued code stops
    /// working.
    pub async fn regenerate_backup_codes(
        &self,
        principal: &Principal,
    ) -> Result<Vec<String>, AuthError> {
        let state = self.store.get(&principal.id).await?.unwrap_or_default();
        if !state.enabled {
            return Err(AuthError::InvalidRequest("MFA is not enabled".to_string()));
        }

        let codes = generate_backup_codes(self.config.backup_code_count);
        let hashes: Vec<String> = codes.iter().map(|c| hash_token(c)).collect();
        self.store
            .replace_backup_codes(&principal.id, &hashes)
            .await?;

        tracing::info!(user_id = %principal.id, "Backup codes regenerated");
        Ok(codes)
    }

    /// Disable MFA. Requires both the account password and a current TOTP
    /// code, so neither a stolen session nor a stolen password suffices.
    pub async fn disable(
        &self,
        principal: &Principal,
        password: &str,
        totp_code: &str,
    ) -> Result<(), AuthError> {
        let password_ok = self
            .verifier
            .verify(password, &principal.password_hash)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Credential verifier unavailable, denying");
                AuthError::Authentication
            })?;
        if !password_ok {
            return Err(AuthError::Authentication);
        }

        let state = self.store.get(&principal.id).await?.unwrap_or_default();
        if !state.enabled {
            return Err(AuthError::InvalidRequest("MFA is not enabled".to_string()));
        }
        let secret = state.secret.clone().ok_or(AuthError::Authentication)?;
        if !self.check_code(&secret, &principal.email, totp_code, Self::now()?)? {
            return Err(AuthError::Authentication);
        }

        self.store.clear(&principal.id).await?;

        tracing::info!(user_id = %principal.id, "MFA disabled");
        Ok(())
    }

    pub async fn is_enabled(&self, user_id: &str) -> Result<bool, AuthError> {
        Ok(self
            .store
            .get(user_id)
            .await?
            .map(|state| state.enabled)
            .unwrap_or(false))
    }
}

/// Backup codes are 10 hex characters grouped for readability
/// (`xxxxx-xxxxx`), 40 bits of entropy each.
fn generate_backup_codes(count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let bytes: [u8; 5] = rng.gen();
            let hexed = hex::encode(bytes);
            format!("{}-{}", &hexed[..5], &hexed[5..])
        })
        .collect()
}
