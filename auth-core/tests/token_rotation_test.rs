mod common;

use auth_core::models::Role;
use auth_core::services::AuthError;
use common::{login_request, seed_principal, test_env, TEST_IP};

#[tokio::test]
async fn test_refresh_token_redeemable_exactly_once() {
    let env = test_env();
    seed_principal(&env, "staff@example.com", "pw-1234", Role::BoxOffice).await;

    let first = env
        .orchestrator
        .login(&login_request("staff@example.com", "pw-1234"), TEST_IP)
        .await
        .unwrap();

    let second = env.orchestrator.refresh(&first.refresh_token).await.unwrap();
    assert_ne!(first.refresh_token, second.refresh_token);

    // The already-redeemed token is dead, and the error is generic
    let err = env
        .orchestrator
        .refresh(&first.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Authentication));
}

#[tokio::test]
async fn test_reuse_kills_the_whole_session() {
    let env = test_env();
    seed_principal(&env, "staff@example.com", "pw-1234", Role::BoxOffice).await;

    let first = env
        .orchestrator
        .login(&login_request("staff@example.com", "pw-1234"), TEST_IP)
        .await
        .unwrap();
    let second = env.orchestrator.refresh(&first.refresh_token).await.unwrap();

    // Reuse of the old token revokes the session...
    env.orchestrator
        .refresh(&first.refresh_token)
        .await
        .unwrap_err();

    // ...so even the newest token in the lineage no longer works
    let err = env
        .orchestrator
        .refresh(&second.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Authentication));
}

#[tokio::test]
async fn test_concurrent_rotation_has_single_winner() {
    let env = test_env();
    seed_principal(&env, "staff@example.com", "pw-1234", Role::BoxOffice).await;

    let pair = env
        .orchestrator
        .login(&login_request("staff@example.com", "pw-1234"), TEST_IP)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        env.orchestrator.refresh(&pair.refresh_token),
        env.orchestrator.refresh(&pair.refresh_token),
    );

    let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);

    let loser = if a.is_err() { a } else { b };
    assert!(matches!(loser.unwrap_err(), AuthError::Authentication));
}

#[tokio::test]
async fn test_rotation_chain_stays_valid() {
    let env = test_env();
    seed_principal(&env, "staff@example.com", "pw-1234", Role::BoxOffice).await;

    let mut pair = env
        .orchestrator
        .login(&login_request("staff@example.com", "pw-1234"), TEST_IP)
        .await
        .unwrap();

    for _ in 0..3 {
        pair = env.orchestrator.refresh(&pair.refresh_token).await.unwrap();
        let claims = env
            .tokens
            .verify_access_token(&pair.access_token)
            .await
            .unwrap();
        assert_eq!(claims.role, "box_office");
    }
}

#[tokio::test]
async fn test_logout_kills_access_and_refresh() {
    let env = test_env();
    seed_principal(&env, "staff@example.com", "pw-1234", Role::BoxOffice).await;

    let pair = env
        .orchestrator
        .login(&login_request("staff@example.com", "pw-1234"), TEST_IP)
        .await
        .unwrap();

    env.orchestrator
        .logout(&pair.access_token, &pair.refresh_token)
        .await
        .unwrap();

    // Access token is blacklisted for its remaining lifetime
    assert!(env
        .tokens
        .verify_access_token(&pair.access_token)
        .await
        .is_err());
    // The session is revoked, so the refresh token is dead too
    assert!(env.orchestrator.refresh(&pair.refresh_token).await.is_err());
}

#[tokio::test]
async fn test_logout_all_revokes_every_session() {
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

    let revoked = env
        .orchestrator
        .logout_all(&laptop.access_token, None)
        .await
        .unwrap();
    assert_eq!(revoked, 2);

    assert!(env.orchestrator.refresh(&phone.refresh_token).await.is_err());
    assert!(env.orchestrator.refresh(&laptop.refresh_token).await.is_err());
}

#[tokio::test]
async fn test_introspect_tracks_token_state() {
    let env = test_env();
    let principal = seed_principal(&env, "staff@example.com", "pw-1234", Role::BoxOffice).await;

    let pair = env
        .orchestrator
        .login(&login_request("staff@example.com", "pw-1234"), TEST_IP)
        .await
        .unwrap();

    let view = env.orchestrator.introspect(&pair.access_token).await;
    assert!(view.active);
    assert_eq!(view.sub.as_deref(), Some(principal.id.as_str()));

    env.orchestrator
        .logout(&pair.access_token, &pair.refresh_token)
        .await
        .unwrap();

    let view = env.orchestrator.introspect(&pair.access_token).await;
    assert!(!view.active);
    assert!(view.sub.is_none());
}
