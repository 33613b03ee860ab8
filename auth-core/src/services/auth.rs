use chrono::Utc;
use std::sync::Arc;

use crate::models::{Role, WILDCARD};
use crate::services::{
    AccessClaims, AuthError, IntrospectResponse, LockoutGuard, MfaEngine, MfaProof, MfaSetup,
    RbacResolver, TokenPair, TokenService,
};
use crate::stores::{CredentialVerifier, PrincipalStore};

/// A login attempt. At most one second factor is presented; a TOTP code
/// takes precedence over a backup code when both are sent.
#[derive(Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub totp_code: Option<String>,
    pub backup_code: Option<String>,
    pub device_info: String,
}

/// Front door of the core: sequences lockout, credential, and MFA checks
/// and keeps failure responses indistinguishable from one another.
#[derive(Clone)]
pub struct AuthOrchestrator {
    principals: Arc<dyn PrincipalStore>,
    verifier: Arc<dyn CredentialVerifier>,
    lockout: LockoutGuard,
    mfa: MfaEngine,
    tokens: TokenService,
    rbac: RbacResolver,
}

impl AuthOrchestrator {
    pub fn new(
        principals: Arc<dyn PrincipalStore>,
        verifier: Arc<dyn CredentialVerifier>,
        lockout: LockoutGuard,
        mfa: MfaEngine,
        tokens: TokenService,
        rbac: RbacResolver,
    ) -> Self {
        Self {
            principals,
            verifier,
            lockout,
            mfa,
            tokens,
            rbac,
        }
    }

    /// Authenticate and issue a token pair.
    ///
    /// The lock check runs before anything touches the identity store or
    /// the verifier, so a locked account (or IP) costs no credential work.
    /// Unknown accounts, wrong passwords, and bad MFA proofs all count as
    /// failures and all surface the same `Authentication` error.
    pub async fn login(&self, request: &LoginRequest, ip: &str) -> Result<TokenPair, AuthError> {
        // Counted by presented identifier: unknown accounts must count too
        let user_key = request.email.trim().to_lowercase();

        let status = self.lockout.check_locked(&user_key, ip).await;
        if status.locked {
            return Err(AuthError::Lockout {
                retry_after_seconds: status.retry_after_seconds.unwrap_or(0),
            });
        }

        let principal = match self.principals.find_by_email(&user_key).await {
            Ok(principal) => principal,
            Err(e) => {
                tracing::error!(error = %e, "Identity lookup failed during login, denying");
                return Err(AuthError::Authentication);
            }
        };
        let Some(principal) = principal else {
            self.lockout.record_failure(&user_key, ip).await?;
            return Err(AuthError::Authentication);
        };

        let password_ok = self
            .verifier
            .verify(&request.password, &principal.password_hash)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Credential verifier unavailable, denying");
                AuthError::Authentication
            })?;
        if !password_ok {
            self.lockout.record_failure(&user_key, ip).await?;
            return Err(AuthError::Authentication);
        }

        if self.mfa.is_enabled(&principal.id).await? {
            let proof = match (&request.totp_code, &request.backup_code) {
                (Some(code), _) => MfaProof::Totp(code.clone()),
                (None, Some(code)) => MfaProof::BackupCode(code.clone()),
                // Not a failed attempt: the client simply has not sent a
                // second factor yet.
                (None, None) => return Err(AuthError::MfaRequired),
            };
            if !self.mfa.verify(&principal, &proof).await? {
                self.lockout.record_failure(&user_key, ip).await?;
                return Err(AuthError::Authentication);
            }
        }

        self.lockout.clear_on_success(&user_key, ip).await;

        tracing::info!(user_id = %principal.id, tenant_id = %principal.tenant_id, "Login succeeded");

        self.tokens.issue(&principal, &request.device_info).await
    }

    /// Rotate a refresh token. Reuse detection happens inside the token
    /// service; by the time the error reaches a caller it is a plain
    /// authentication failure.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        self.tokens
            .rotate(refresh_token)
            .await
            .map_err(AuthError::into_public)
    }

    /// End one session: blacklist the access token for its remaining
    /// lifetime and revoke the session behind the refresh token.
    pub async fn logout(&self, access_token: &str, refresh_token: &str) -> Result<(), AuthError> {
        let claims = self.tokens.verify_access_token(access_token).await?;

        let remaining = claims.exp - Utc::now().timestamp();
        if remaining > 0 {
            self.tokens.blacklist(&claims.jti, remaining as u64).await?;
        }

        let refresh = self.tokens.decode_refresh(refresh_token)?;
        if refresh.sub != claims.sub {
            return Err(AuthError::Authentication);
        }
        self.tokens.revoke_session(&refresh.session_id).await
    }

    /// End every session for the caller, optionally sparing one. Returns
    /// the number of sessions revoked.
    pub async fn logout_all(
        &self,
        access_token: &str,
        except_session_id: Option<&str>,
    ) -> Result<usize, AuthError> {
        let claims = self.tokens.verify_access_token(access_token).await?;

        let revoked = self
            .tokens
            .revoke_all_sessions(&claims.sub, except_session_id)
            .await?;

        if except_session_id.is_none() {
            let remaining = claims.exp - Utc::now().timestamp();
            if remaining > 0 {
                self.tokens.blacklist(&claims.jti, remaining as u64).await?;
            }
        }

        Ok(revoked)
    }

    /// Validate a token and require a permission.
    ///
    /// Tenant-wide checks read the snapshot baked into the token. Venue
    /// checks resolve against the live identity record, so a revoked or
    /// expired venue grant takes effect immediately rather than at the next
    /// token refresh.
    pub async fn authorize(
        &self,
        access_token: &str,
        permission: &str,
        venue_id: Option<&str>,
    ) -> Result<AccessClaims, AuthError> {
        let claims = self.tokens.verify_access_token(access_token).await?;

        match venue_id {
            None => {
                if claims.perms.iter().any(|p| p == WILDCARD || p == permission) {
                    Ok(claims)
                } else {
                    Err(AuthError::Authorization {
                        missing: permission.to_string(),
                    })
                }
            }
            Some(venue) => {
                let principal = self
                    .principals
                    .get(&claims.sub)
                    .await?
                    .ok_or(AuthError::Authentication)?;
                self.rbac
                    .require_permission(&principal, permission, Some(venue))?;
                Ok(claims)
            }
        }
    }

    pub async fn introspect(&self, access_token: &str) -> IntrospectResponse {
        self.tokens.introspect(access_token).await
    }

    /// Grant a venue-scoped role to a user on behalf of the token holder.
    /// Role names are parsed against the catalog before anything runs.
    pub async fn grant_venue_role(
        &self,
        access_token: &str,
        user_id: &str,
        venue_id: &str,
        role: &str,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<(), AuthError> {
        let role: Role = role.parse().map_err(AuthError::InvalidRequest)?;
        let caller = self.caller(access_token).await?;
        self.rbac
            .grant_venue_role(&caller, user_id, venue_id, role, expires_at)
            .await
    }

    pub async fn revoke_venue_role(
        &self,
        access_token: &str,
        user_id: &str,
        venue_id: &str,
        role: &str,
    ) -> Result<(), AuthError> {
        let role: Role = role.parse().map_err(AuthError::InvalidRequest)?;
        let caller = self.caller(access_token).await?;
        self.rbac
            .revoke_venue_role(&caller, user_id, venue_id, role)
            .await
    }

    pub async fn mfa_setup(&self, access_token: &str) -> Result<MfaSetup, AuthError> {
        let caller = self.caller(access_token).await?;
        self.mfa.setup(&caller).await
    }

    pub async fn mfa_confirm(
        &self,
        access_token: &str,
        code: &str,
    ) -> Result<Vec<String>, AuthError> {
        let caller = self.caller(access_token).await?;
        self.mfa.confirm_setup(&caller, code).await
    }

    /// Step-up verification: check a second factor for an already
    /// authenticated caller, outside the login flow.
    pub async fn mfa_verify(
        &self,
        access_token: &str,
        proof: &MfaProof,
    ) -> Result<bool, AuthError> {
        let caller = self.caller(access_token).await?;
        self.mfa.verify(&caller, proof).await
    }

    pub async fn mfa_regenerate_backup_codes(
        &self,
        access_token: &str,
    ) -> Result<Vec<String>, AuthError> {
        let caller = self.caller(access_token).await?;
        self.mfa.regenerate_backup_codes(&caller).await
    }

    /// Disable MFA and revoke every other session: a post-MFA-disable
    /// account should not keep sessions that were opened under MFA.
    pub async fn mfa_disable(
        &self,
        access_token: &str,
        password: &str,
        totp_code: &str,
    ) -> Result<(), AuthError> {
        let claims = self.tokens.verify_access_token(access_token).await?;
        let caller = self
            .principals
            .get(&claims.sub)
            .await?
            .ok_or(AuthError::Authentication)?;

        self.mfa.disable(&caller, password, totp_code).await?;
        self.tokens
            .revoke_all_sessions(&caller.id, None)
            .await?;
        Ok(())
    }

    async fn caller(&self, access_token: &str) -> Result<crate::models::Principal, AuthError> {
        let claims = self.tokens.verify_access_token(access_token).await?;
        self.principals
            .get(&claims.sub)
            .await?
            .ok_or(AuthError::Authentication)
    }
}
