use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::models::{Principal, Session};
use crate::services::{AuthError, RbacResolver};
use crate::stores::{CounterStore, PrincipalStore, SessionStore};

/// The one algorithm this service signs and accepts. Verification never
/// honors a caller-chosen algorithm.
const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

fn lineage_key(lineage_id: &str) -> String {
    format!("lineage:{}", lineage_id)
}

fn blacklist_key(jti: &str) -> String {
    format!("blacklist:{}", jti)
}

/// SHA-256 hex digest of a token string.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Claims for access tokens (short-lived, never persisted server-side)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: String,
    pub tenant_id: String,
    pub role: String,
    /// Permission snapshot resolved at issue time; staleness is bounded by
    /// the access-token TTL.
    pub perms: Vec<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// JWT ID (for blacklisting)
    pub jti: String,
}

/// Claims for refresh tokens (long-lived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Subject (user ID)
    pub sub: String,
    pub session_id: String,
    /// Rotation lineage this token belongs to
    pub lineage_id: String,
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
}

/// Token pair returned to the client
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Active/inactive view of an access token.
#[derive(Debug, Serialize)]
pub struct IntrospectResponse {
    pub active: bool,
    pub sub: Option<String>,
    pub tenant_id: Option<String>,
    pub role: Option<String>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    pub jti: Option<String>,
}

impl IntrospectResponse {
    fn inactive() -> Self {
        Self {
            active: false,
            sub: None,
            tenant_id: None,
            role: None,
            exp: None,
            iat: None,
            jti: None,
        }
    }
}

/// Issues, verifies, and rotates access/refresh token pairs.
///
/// Each login creates a lineage; the lineage's current refresh-token hash
/// lives in the shared counter store so rotation is one compare-and-set,
/// correct across concurrent service instances.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
    sessions: Arc<dyn SessionStore>,
    counters: Arc<dyn CounterStore>,
    principals: Arc<dyn PrincipalStore>,
    rbac: RbacResolver,
}

impl TokenService {
    pub fn new(
        config: &TokenConfig,
        sessions: Arc<dyn SessionStore>,
        counters: Arc<dyn CounterStore>,
        principals: Arc<dyn PrincipalStore>,
        rbac: RbacResolver,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.signing_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.signing_secret.as_bytes()),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
            sessions,
            counters,
            principals,
            rbac,
        }
    }

    fn refresh_ttl_seconds(&self) -> u64 {
        (self.refresh_token_expiry_days * 86_400) as u64
    }

    /// Get access token expiry in seconds (for client info)
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }

    /// Sign a new token pair for an existing session. Returns the pair and
    /// the hash of the new refresh token (the lineage's next current value).
    fn sign_pair(
        &self,
        principal: &Principal,
        session: &Session,
    ) -> Result<(TokenPair, String), AuthError> {
        let now = Utc::now();
        let access_exp = now + Duration::minutes(self.access_token_expiry_minutes);
        let refresh_exp = now + Duration::days(self.refresh_token_expiry_days);

        let access_claims = AccessClaims {
            sub: principal.id.clone(),
            tenant_id: principal.tenant_id.clone(),
            role: principal.base_role.as_str().to_string(),
            perms: self.rbac.resolve(principal, None).snapshot(),
            exp: access_exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let refresh_claims = RefreshClaims {
            sub: principal.id.clone(),
            session_id: session.id.clone(),
            lineage_id: session.lineage_id.clone(),
            jti: Uuid::new_v4().to_string(),
            exp: refresh_exp.timestamp(),
            iat: now.timestamp(),
        };

        let header = Header::new(SIGNING_ALGORITHM);
        let access_token = encode(&header, &access_claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))?;
        let refresh_token = encode(&header, &refresh_claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode refresh token: {}", e))?;

        let refresh_hash = hash_token(&refresh_token);

        Ok((
            TokenPair {
                access_token,
                refresh_token,
                token_type: "Bearer".to_string(),
                expires_in: self.access_token_expiry_seconds(),
            },
            refresh_hash,
        ))
    }

    /// Issue a fresh token pair and session for a principal at login.
    pub async fn issue(
        &self,
        principal: &Principal,
        device_info: &str,
    ) -> Result<TokenPair, AuthError> {
        let session = Session::new(
            principal.id.clone(),
            principal.tenant_id.clone(),
            Uuid::new_v4().to_string(),
            self.refresh_token_expiry_days,
            device_info.to_string(),
        );

        let (pair, refresh_hash) = self.sign_pair(principal, &session)?;

        self.counters
            .set_with_ttl(
                &lineage_key(&session.lineage_id),
                &refresh_hash,
                self.refresh_ttl_seconds(),
            )
            .await?;
        self.sessions.create(&session).await?;

        tracing::info!(user_id = %principal.id, session_id = %session.id, "Session created");

        Ok(pair)
    }

    /// Redeem a refresh token for a new pair.
    ///
    /// The lineage swap is a single compare-and-set: of two concurrent
    /// calls presenting the same token, exactly one succeeds. The loser is
    /// treated as reuse, which revokes the whole session. Store failures on
    /// this path fail closed.
    pub async fn rotate(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.decode_refresh(refresh_token)?;

        let session = match self.sessions.get(&claims.session_id).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = %e, "Session lookup failed during rotation, denying");
                return Err(AuthError::Authentication);
            }
        };
        let Some(session) = session else {
            return Err(AuthError::Authentication);
        };
        if !session.is_active() {
            return Err(AuthError::Authentication);
        }

        let principal = self
            .principals
            .get(&claims.sub)
            .await?
            .ok_or(AuthError::Authentication)?;

        let (pair, new_refresh_hash) = self.sign_pair(&principal, &session)?;

        let swapped = match self
            .counters
            .cas_set(
                &lineage_key(&claims.lineage_id),
                &hash_token(refresh_token),
                &new_refresh_hash,
                self.refresh_ttl_seconds(),
            )
            .await
        {
            Ok(swapped) => swapped,
            Err(e) => {
                tracing::error!(error = %e, "Lineage CAS failed during rotation, denying");
                return Err(AuthError::Authentication);
            }
        };

        if !swapped {
            // The presented token is no longer the lineage's current one:
            // it was already rotated. Evidence of theft; kill the session.
            tracing::warn!(
                user_id = %claims.sub,
                session_id = %claims.session_id,
                "Refresh token reuse detected, revoking session"
            );
            if let Err(e) = self.revoke_session(&claims.session_id).await {
                tracing::error!(error = %e, "Failed to revoke session after reuse detection");
            }
            return Err(AuthError::TokenReuse {
                session_id: claims.session_id,
            });
        }

        tracing::info!(user_id = %claims.sub, session_id = %claims.session_id, "Token rotated");

        Ok(pair)
    }

    /// Validate an access token's signature, expiry, and blacklist status.
    /// Blacklist store failures deny the token.
    pub async fn verify_access_token(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let validation = Validation::new(SIGNING_ALGORITHM);

        let claims = decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map_err(|_| AuthError::Authentication)?
            .claims;

        let blacklisted = match self.counters.get(&blacklist_key(&claims.jti)).await {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                tracing::error!(error = %e, "Blacklist lookup failed, denying token");
                true
            }
        };
        if blacklisted {
            return Err(AuthError::Authentication);
        }

        Ok(claims)
    }

    /// Validate and decode a refresh token (signature and expiry only).
    pub fn decode_refresh(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        let validation = Validation::new(SIGNING_ALGORITHM);

        let claims = decode::<RefreshClaims>(token, &self.decoding_key, &validation)
            .map_err(|_| AuthError::Authentication)?
            .claims;

        Ok(claims)
    }

    /// Blacklist an access token id until it would have expired anyway.
    /// Entries auto-expire, so the blacklist stays bounded by the access
    /// TTL plus clock skew.
    pub async fn blacklist(&self, jti: &str, ttl_seconds: u64) -> Result<(), AuthError> {
        if ttl_seconds == 0 {
            return Ok(());
        }
        self.counters
            .set_with_ttl(&blacklist_key(jti), "revoked", ttl_seconds)
            .await?;
        Ok(())
    }

    /// Revoke one session and invalidate its lineage. Idempotent.
    pub async fn revoke_session(&self, session_id: &str) -> Result<(), AuthError> {
        let Some(session) = self.sessions.get(session_id).await? else {
            tracing::debug!(session_id = %session_id, "Revoke requested for unknown session");
            return Ok(());
        };

        self.sessions.revoke(session_id, Utc::now()).await?;
        self.counters
            .delete(&lineage_key(&session.lineage_id))
            .await?;

        tracing::info!(user_id = %session.user_id, session_id = %session_id, "Session revoked");
        Ok(())
    }

    /// Revoke every session for a user, optionally keeping one alive.
    pub async fn revoke_all_sessions(
        &self,
        user_id: &str,
        except_session_id: Option<&str>,
    ) -> Result<usize, AuthError> {
        let sessions = self.sessions.list_by_user(user_id).await?;
        let mut revoked = 0;

        for session in sessions {
            if Some(session.id.as_str()) == except_session_id {
                continue;
            }
            if session.revoked_at.is_some() {
                continue;
            }
            self.revoke_session(&session.id).await?;
            revoked += 1;
        }

        tracing::info!(user_id = %user_id, count = revoked, "Revoked all sessions");
        Ok(revoked)
    }

    /// Introspect an access token without leaking why an inactive token is
    /// inactive.
    pub async fn introspect(&self, token: &str) -> IntrospectResponse {
        match self.verify_access_token(token).await {
            Ok(claims) => IntrospectResponse {
                active: true,
                sub: Some(claims.sub),
                tenant_id: Some(claims.tenant_id),
                role: Some(claims.role),
                exp: Some(claims.exp),
                iat: Some(claims.iat),
                jti: Some(claims.jti),
            },
            Err(_) => IntrospectResponse::inactive(),
        }
    }
}
