//! Shared harness wiring the core against in-memory stores.

#![allow(dead_code)]

use std::sync::Arc;

use auth_core::config::{LockoutConfig, MfaConfig, TokenConfig};
use auth_core::models::{Principal, Role};
use auth_core::services::{
    AuthOrchestrator, LockoutGuard, LoginRequest, MfaEngine, RbacResolver, TokenService,
};
use auth_core::stores::{
    InMemoryCounterStore, InMemoryMfaStore, InMemoryPrincipalStore, InMemorySessionStore,
    MockCredentialVerifier, PrincipalStore,
};
use totp_rs::{Algorithm, Secret, TOTP};

pub const TEST_IP: &str = "203.0.113.7";
pub const MFA_ISSUER: &str = "VenuePlatform";

pub struct TestEnv {
    pub orchestrator: AuthOrchestrator,
    pub tokens: TokenService,
    pub lockout: LockoutGuard,
    pub mfa: MfaEngine,
    pub rbac: RbacResolver,
    pub principals: Arc<InMemoryPrincipalStore>,
    pub counters: Arc<InMemoryCounterStore>,
    pub verifier: Arc<MockCredentialVerifier>,
}

pub fn token_config() -> TokenConfig {
    TokenConfig {
        signing_secret: "integration-test-signing-secret-0123456789".to_string(),
        access_token_expiry_minutes: 15,
        refresh_token_expiry_days: 7,
    }
}

pub fn lockout_config() -> LockoutConfig {
    LockoutConfig {
        max_user_attempts: 5,
        max_ip_attempts: 10,
        window_seconds: 900,
        lock_seconds: 900,
    }
}

pub fn mfa_config() -> MfaConfig {
    MfaConfig {
        issuer: MFA_ISSUER.to_string(),
        totp_digits: 6,
        totp_step_seconds: 30,
        totp_skew_steps: 1,
        backup_code_count: 10,
    }
}

pub fn test_env() -> TestEnv {
    let counters = Arc::new(InMemoryCounterStore::new());
    let sessions = Arc::new(InMemorySessionStore::new());
    let mfa_store = Arc::new(InMemoryMfaStore::new());
    let principals = Arc::new(InMemoryPrincipalStore::new());
    let verifier = Arc::new(MockCredentialVerifier::new());

    let rbac = RbacResolver::new(principals.clone());
    let tokens = TokenService::new(
        &token_config(),
        sessions,
        counters.clone(),
        principals.clone(),
        rbac.clone(),
    );
    let lockout = LockoutGuard::new(counters.clone(), lockout_config());
    let mfa = MfaEngine::new(mfa_store, verifier.clone(), mfa_config());
    let orchestrator = AuthOrchestrator::new(
        principals.clone(),
        verifier.clone(),
        lockout.clone(),
        mfa.clone(),
        tokens.clone(),
        rbac.clone(),
    );

    TestEnv {
        orchestrator,
        tokens,
        lockout,
        mfa,
        rbac,
        principals,
        counters,
        verifier,
    }
}

pub async fn seed_principal(env: &TestEnv, email: &str, password: &str, role: Role) -> Principal {
    let principal = Principal::new(
        "tenant_1".to_string(),
        email.to_string(),
        // MockCredentialVerifier compares plaintext against the stored hash
        password.to_string(),
        role,
    );
    env.principals.put(&principal).await.unwrap();
    principal
}

pub fn login_request(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        email: email.to_string(),
        password: password.to_string(),
        totp_code: None,
        backup_code: None,
        device_info: "integration-test".to_string(),
    }
}

/// Authenticator-side TOTP generator matching the engine's parameters.
pub fn authenticator(secret_b32: &str, account: &str) -> TOTP {
    let secret = Secret::Encoded(secret_b32.to_string()).to_bytes().unwrap();
    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret,
        Some(MFA_ISSUER.to_string()),
        account.to_string(),
    )
    .unwrap()
}
