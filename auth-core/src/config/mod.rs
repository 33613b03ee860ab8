use serde::Deserialize;
use std::env;

use crate::services::AuthError;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub redis: RedisConfig,
    pub token: TokenConfig,
    pub lockout: LockoutConfig,
    pub mfa: MfaConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Every store round-trip carries this explicit timeout; security checks
    /// fail closed when it fires.
    pub op_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// HMAC signing secret for the pinned HS256 algorithm.
    pub signing_secret: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockoutConfig {
    pub max_user_attempts: u32,
    /// Must be at least twice the user threshold: the IP dimension defends
    /// against distributed attempts across many accounts.
    pub max_ip_attempts: u32,
    /// Rolling failure-counting window.
    pub window_seconds: u64,
    /// Lock TTL, independent of the counting window.
    pub lock_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MfaConfig {
    pub issuer: String,
    pub totp_digits: usize,
    pub totp_step_seconds: u64,
    pub totp_skew_steps: u8,
    pub backup_code_count: usize,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AuthError> {
        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AuthError::Internal(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AuthConfig {
            environment,
            service_name: get_env("SERVICE_NAME", Some("auth-core"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://127.0.0.1:6379"), is_prod)?,
                op_timeout_ms: parse_env("REDIS_OP_TIMEOUT_MS", Some("250"), is_prod)?,
            },
            token: TokenConfig {
                signing_secret: get_env("JWT_SIGNING_SECRET", None, true)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    Some("15"),
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    Some("7"),
                    is_prod,
                )?,
            },
            lockout: LockoutConfig {
                max_user_attempts: parse_env("LOCKOUT_MAX_USER_ATTEMPTS", Some("5"), is_prod)?,
                max_ip_attempts: parse_env("LOCKOUT_MAX_IP_ATTEMPTS", Some("10"), is_prod)?,
                window_seconds: parse_env("LOCKOUT_WINDOW_SECONDS", Some("900"), is_prod)?,
                lock_seconds: parse_env("LOCKOUT_LOCK_SECONDS", Some("900"), is_prod)?,
            },
            mfa: MfaConfig {
                issuer: get_env("MFA_ISSUER", Some("VenuePlatform"), is_prod)?,
                totp_digits: parse_env("MFA_TOTP_DIGITS", Some("6"), is_prod)?,
                totp_step_seconds: parse_env("MFA_TOTP_STEP_SECONDS", Some("30"), is_prod)?,
                totp_skew_steps: parse_env("MFA_TOTP_SKEW_STEPS", Some("1"), is_prod)?,
                backup_code_count: parse_env("MFA_BACKUP_CODE_COUNT", Some("10"), is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would violate core invariants.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.token.signing_secret.len() < 32 {
            return Err(config_error(
                "JWT_SIGNING_SECRET must be at least 32 bytes",
            ));
        }

        if self.token.access_token_expiry_minutes <= 0 {
            return Err(config_error(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive",
            ));
        }

        if self.token.refresh_token_expiry_days <= 0 {
            return Err(config_error(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive",
            ));
        }

        // Access tokens must always expire before the refresh token that
        // accompanies them.
        if self.token.access_token_expiry_minutes * 60
            >= self.token.refresh_token_expiry_days * 86_400
        {
            return Err(config_error(
                "Access token expiry must be shorter than refresh token expiry",
            ));
        }

        if self.lockout.max_user_attempts == 0 {
            return Err(config_error("LOCKOUT_MAX_USER_ATTEMPTS must be positive"));
        }

        if self.lockout.max_ip_attempts < self.lockout.max_user_attempts * 2 {
            return Err(config_error(
                "LOCKOUT_MAX_IP_ATTEMPTS must be at least twice LOCKOUT_MAX_USER_ATTEMPTS",
            ));
        }

        if self.lockout.window_seconds == 0 || self.lockout.lock_seconds == 0 {
            return Err(config_error("Lockout window and lock TTL must be positive"));
        }

        if self.mfa.totp_digits != 6 && self.mfa.totp_digits != 8 {
            return Err(config_error("MFA_TOTP_DIGITS must be 6 or 8"));
        }

        if self.mfa.backup_code_count == 0 {
            return Err(config_error("MFA_BACKUP_CODE_COUNT must be positive"));
        }

        Ok(())
    }
}

fn config_error(msg: &str) -> AuthError {
    AuthError::Internal(anyhow::anyhow!("Configuration error: {}", msg))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AuthError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(config_error(&format!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(config_error(&format!("{} is required but not set", key)))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AuthError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?
        .parse()
        .map_err(|e: T::Err| config_error(&format!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
