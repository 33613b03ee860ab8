mod common;

use auth_core::models::Role;
use auth_core::services::AuthError;
use common::{login_request, seed_principal, test_env, TEST_IP};
use http::StatusCode;

#[tokio::test]
async fn test_full_session_lifecycle() {
    let env = test_env();
    let principal = seed_principal(&env, "staff@example.com", "pw-1234", Role::BoxOffice).await;

    // Login
    let pair = env
        .orchestrator
        .login(&login_request("staff@example.com", "pw-1234"), TEST_IP)
        .await
        .unwrap();
    assert_eq!(pair.token_type, "Bearer");
    assert_eq!(pair.expires_in, 15 * 60);

    let claims = env
        .tokens
        .verify_access_token(&pair.access_token)
        .await
        .unwrap();
    assert_eq!(claims.sub, principal.id);
    assert_eq!(claims.tenant_id, "tenant_1");
    assert_eq!(claims.role, "box_office");
    assert_eq!(
        claims.perms,
        vec!["orders:view", "tickets:refund", "tickets:sell"]
    );

    // Refresh
    let rotated = env.orchestrator.refresh(&pair.refresh_token).await.unwrap();
    env.tokens
        .verify_access_token(&rotated.access_token)
        .await
        .unwrap();

    // Logout with the current pair
    env.orchestrator
        .logout(&rotated.access_token, &rotated.refresh_token)
        .await
        .unwrap();
    assert!(env
        .tokens
        .verify_access_token(&rotated.access_token)
        .await
        .is_err());
    assert!(env
        .orchestrator
        .refresh(&rotated.refresh_token)
        .await
        .is_err());
}

#[tokio::test]
async fn test_email_is_matched_case_insensitively_for_lockout() {
    let env = test_env();
    seed_principal(&env, "staff@example.com", "pw-1234", Role::BoxOffice).await;

    // Failures under different casings land on the same counter
    for _ in 0..5 {
        env.orchestrator
            .login(&login_request("STAFF@Example.COM", "wrong"), TEST_IP)
            .await
            .ok();
    }

    let err = env
        .orchestrator
        .login(&login_request("staff@example.com", "pw-1234"), TEST_IP)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Lockout { .. }));
}

#[tokio::test]
async fn test_error_statuses_for_transport_mapping() {
    let env = test_env();
    seed_principal(&env, "staff@example.com", "pw-1234", Role::Scanner).await;

    let auth_err = env
        .orchestrator
        .login(&login_request("staff@example.com", "wrong"), TEST_IP)
        .await
        .unwrap_err();
    assert_eq!(auth_err.status_code(), StatusCode::UNAUTHORIZED);

    for _ in 0..4 {
        env.orchestrator
            .login(&login_request("staff@example.com", "wrong"), TEST_IP)
            .await
            .ok();
    }
    let lockout_err = env
        .orchestrator
        .login(&login_request("staff@example.com", "pw-1234"), TEST_IP)
        .await
        .unwrap_err();
    assert_eq!(lockout_err.status_code(), StatusCode::LOCKED);
    assert!(lockout_err.retry_after_seconds().is_some());
}

#[tokio::test]
async fn test_forged_token_rejected_everywhere() {
    let env = test_env();

    for token in ["", "garbage", "aaa.bbb.ccc"] {
        assert!(env.tokens.verify_access_token(token).await.is_err());
        assert!(env.orchestrator.refresh(token).await.is_err());
        assert!(env
            .orchestrator
            .authorize(token, "tickets:view", None)
            .await
            .is_err());
        assert!(!env.orchestrator.introspect(token).await.active);
    }
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let env = test_env();
    seed_principal(&env, "staff@example.com", "pw-1234", Role::BoxOffice).await;

    let phone = env
        .orchestrator
        .login(&login_request("staff@example.com", "pw-1234"), TEST_IP)
        .await
        .unwrap();
    let laptop = env
        .orchestrator
        .login(&login_request("staff@example.com", "pw-1234"), TEST_IP)
        .await
        .unwrap();

    // Ending one session leaves the other intact
    env.orchestrator
        .logout(&phone.access_token, &phone.refresh_token)
        .await
        .unwrap();

    env.orchestrator.refresh(&laptop.refresh_token).await.unwrap();
}
