//! Scenario tests for login, refresh rotation, logout, and per-request
//! authentication, run against the in-memory fakes.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::{
    body::Body,
    http::{header, Method, Request},
    middleware as axum_middleware,
    routing::any,
    Extension, Router,
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use tower::ServiceExt;

use crate::db::RefreshTokenRepository;
use crate::error::AuthError;
use crate::middleware::{authenticate_request, CurrentUser, RequestAuthState};
use crate::models::{AccountStatus, LoginIdentifier, NewRefreshToken};
use crate::security::jwt::TokenCodec;
use crate::services::refresh_store::token_hash;
use crate::tests::fixtures::{username_login, TestHarness, TEST_PASSWORD, TEST_SECRET};

// --- login ---

#[tokio::test]
async fn successful_login_mints_token_pair_and_resets_counters() {
    let harness = TestHarness::new();
    let user = harness.seed_user("alice");
    harness.users.update(user.id, |u| {
        u.failed_login_attempts = 3;
        u.last_failed_login_at = Some(Utc::now());
    });

    let response = harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();

    assert_eq!(response.token_type, "Bearer");
    assert_eq!(response.expires_in, 15 * 60);
    assert_eq!(response.principal.user_id, user.id);
    assert_eq!(response.principal.subject, "alice");

    let claims = harness.codec.validate(&response.access_token).unwrap();
    assert_eq!(claims.sub, "alice");
    assert_eq!(claims.user_id, user.id);
    assert_eq!(claims.authorities, vec!["ROLE_AUTHOR".to_string()]);
    assert!(harness.codec.is_refresh(&response.refresh_token).unwrap());

    // success wipes the failure state and persists the refresh token hash
    let stored = harness.users.get(user.id).unwrap();
    assert_eq!(stored.failed_login_attempts, 0);
    assert!(stored.last_failed_login_at.is_none());
    assert_eq!(harness.store.count_active(user.id).await.unwrap(), 1);
    let rows = harness.tokens.all();
    assert_eq!(rows[0].token_hash, token_hash(&response.refresh_token));
}

#[tokio::test]
async fn repeated_wrong_passwords_accumulate_on_the_counter() {
    let harness = TestHarness::new();
    let user = harness.seed_user("alice");

    for _ in 0..5 {
        let err = harness
            .service
            .authenticate(&username_login("alice", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    let stored = harness.users.get(user.id).unwrap();
    assert_eq!(stored.failed_login_attempts, 5);
    assert!(stored.last_failed_login_at.is_some());
}

#[tokio::test]
async fn unknown_identifier_is_indistinguishable_from_wrong_password() {
    let harness = TestHarness::new();
    harness.seed_user("alice");

    let ghost_err = harness
        .service
        .authenticate(&username_login("ghost", "whatever"))
        .await
        .unwrap_err();
    let password_err = harness
        .service
        .authenticate(&username_login("alice", "wrong"))
        .await
        .unwrap_err();

    assert!(matches!(ghost_err, AuthError::InvalidCredentials));
    assert_eq!(ghost_err.to_string(), password_err.to_string());

    // unknown attempts are tallied in memory, never in user storage
    harness
        .service
        .authenticate(&username_login("ghost", "whatever"))
        .await
        .unwrap_err();
    let identifier = LoginIdentifier::Username("ghost".to_string());
    assert_eq!(harness.service.unknown_failure_count(&identifier), 2);
}

#[tokio::test]
async fn password_is_checked_before_account_gates() {
    let harness = TestHarness::new();
    let user = harness.seed_user("alice");
    harness.users.update(user.id, |u| {
        u.locked_until = Some(Utc::now() + Duration::minutes(30));
    });

    // wrong password on a locked account still lands on the counter,
    // proving the lock was not consulted first
    harness
        .service
        .authenticate(&username_login("alice", "wrong"))
        .await
        .unwrap_err();
    assert_eq!(harness.users.get(user.id).unwrap().failed_login_attempts, 1);
}

#[tokio::test]
async fn gated_accounts_fail_with_the_generic_error() {
    let harness = TestHarness::new();

    let locked = harness.seed_user("locked");
    harness.users.update(locked.id, |u| {
        u.locked_until = Some(Utc::now() + Duration::minutes(30));
    });

    let disabled = harness.seed_user("disabled");
    harness
        .users
        .update(disabled.id, |u| u.status = AccountStatus::Disabled);

    let expired = harness.seed_user("expired");
    harness
        .users
        .update(expired.id, |u| u.status = AccountStatus::Expired);

    let stale = harness.seed_user("stale");
    harness
        .users
        .update(stale.id, |u| u.password_changed_at = None);

    for username in ["locked", "disabled", "expired", "stale"] {
        let err = harness
            .service
            .authenticate(&username_login(username, TEST_PASSWORD))
            .await
            .unwrap_err();
        assert!(
            matches!(err, AuthError::InvalidCredentials),
            "{username} should fail with the generic credential error"
        );
    }

    // a correct password never counts as a failed attempt
    assert_eq!(harness.users.get(locked.id).unwrap().failed_login_attempts, 0);
}

#[tokio::test]
async fn malformed_request_fails_validation_before_lookup() {
    let harness = TestHarness::new();
    harness.seed_user("alice");

    // username below the minimum length
    let err = harness
        .service
        .authenticate(&username_login("ab", TEST_PASSWORD))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));

    let err = harness
        .service
        .authenticate(&username_login("alice", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));
}

// --- refresh rotation ---

#[tokio::test]
async fn refresh_rotates_and_the_old_token_is_single_use() {
    let harness = TestHarness::new();
    let user = harness.seed_user("alice");
    let login = harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();

    let refreshed = harness.service.refresh(&login.refresh_token).await.unwrap();
    assert_ne!(refreshed.refresh_token, login.refresh_token);
    assert_eq!(
        harness
            .codec
            .validate(&refreshed.access_token)
            .unwrap()
            .user_id,
        user.id
    );
    assert_eq!(harness.store.count_active(user.id).await.unwrap(), 1);

    // replaying the consumed token is rejected as revoked
    let err = harness
        .service
        .refresh(&login.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::RevokedToken));

    // the replacement chain keeps working
    harness
        .service
        .refresh(&refreshed.refresh_token)
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_double_use_has_exactly_one_winner() {
    let harness = TestHarness::new();
    harness.seed_user("alice");
    let login = harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        harness.service.refresh(&login.refresh_token),
        harness.service.refresh(&login.refresh_token),
    );

    assert!(
        a.is_ok() != b.is_ok(),
        "exactly one concurrent rotation must win"
    );
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(loser.unwrap_err(), AuthError::RevokedToken));
}

#[tokio::test]
async fn access_token_is_rejected_at_the_refresh_endpoint() {
    let harness = TestHarness::new();
    harness.seed_user("alice");
    let login = harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();

    let err = harness
        .service
        .refresh(&login.access_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MalformedToken));
}

#[tokio::test]
async fn unknown_refresh_token_is_not_found() {
    let harness = TestHarness::new();
    let user = harness.seed_user("alice");

    // well-signed but never persisted
    let unpersisted = harness.codec.issue_refresh("alice", user.id).unwrap();
    let err = harness.service.refresh(&unpersisted.token).await.unwrap_err();
    assert!(matches!(err, AuthError::RefreshTokenNotFound));
}

#[tokio::test]
async fn refresh_with_an_expired_stored_token_fails_as_expired() {
    let harness = TestHarness::new();
    let user = harness.seed_user("alice");

    // valid signature, but the stored row's expiry is in the past
    let issued = harness.codec.issue_refresh("alice", user.id).unwrap();
    harness
        .tokens
        .insert(NewRefreshToken {
            user_id: user.id,
            token_hash: token_hash(&issued.token),
            expires_at: Utc::now() - Duration::hours(1),
            created_by: None,
        })
        .await
        .unwrap();

    let err = harness.service.refresh(&issued.token).await.unwrap_err();
    assert!(matches!(err, AuthError::ExpiredToken));
}

#[tokio::test]
async fn refresh_for_a_gated_account_is_rejected_and_leaves_no_live_token() {
    let harness = TestHarness::new();
    let user = harness.seed_user("alice");
    let login = harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();

    harness
        .users
        .update(user.id, |u| u.status = AccountStatus::Disabled);

    let err = harness
        .service
        .refresh(&login.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
    // the rotation's replacement must not remain usable
    assert_eq!(harness.store.count_active(user.id).await.unwrap(), 0);
}

#[tokio::test]
async fn session_limit_revokes_the_oldest_token_first() {
    let harness = TestHarness::with_max_sessions(2);
    let user = harness.seed_user("alice");

    let first = harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();
    harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();
    let third = harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();

    assert_eq!(harness.store.count_active(user.id).await.unwrap(), 2);

    // the oldest session was evicted, the newest still works
    let err = harness.service.refresh(&first.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::RevokedToken));
    harness.service.refresh(&third.refresh_token).await.unwrap();
}

// --- logout ---

#[tokio::test]
async fn logout_blocklists_the_access_token_and_revokes_the_refresh_token() {
    let harness = TestHarness::new();
    harness.seed_user("alice");
    let login = harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();
    let jti = harness.codec.validate(&login.access_token).unwrap().jti;

    harness
        .service
        .logout(&login.access_token, Some(&login.refresh_token), false)
        .await
        .unwrap();

    assert!(harness.revocations.is_revoked(&jti));
    let err = harness
        .service
        .refresh(&login.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::RevokedToken));
}

#[tokio::test]
async fn logout_all_devices_revokes_every_session() {
    let harness = TestHarness::new();
    let user = harness.seed_user("alice");
    let first = harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();
    let second = harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();

    harness
        .service
        .logout(&second.access_token, None, true)
        .await
        .unwrap();

    assert_eq!(harness.store.count_active(user.id).await.unwrap(), 0);
    for raw in [&first.refresh_token, &second.refresh_token] {
        let err = harness.service.refresh(raw).await.unwrap_err();
        assert!(matches!(err, AuthError::RevokedToken));
    }
}

#[tokio::test]
async fn logout_with_an_expired_access_token_still_revokes_the_refresh_token() {
    let harness = TestHarness::new();
    let user = harness.seed_user("alice");
    let login = harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();

    // same secret, negative access TTL: an already-expired access token
    let stale_codec = TokenCodec::new(TEST_SECRET, Duration::seconds(-60), Duration::days(30));
    let expired_access = stale_codec.issue_access("alice", user.id, &[]).unwrap();

    harness
        .service
        .logout(&expired_access.token, Some(&login.refresh_token), false)
        .await
        .unwrap();

    let err = harness
        .service
        .refresh(&login.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::RevokedToken));
}

// --- retention ---

#[tokio::test]
async fn retention_deletes_only_rows_expired_past_the_cutoff() {
    let harness = TestHarness::new();
    let user = harness.seed_user("alice");
    harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();
    harness
        .tokens
        .insert(NewRefreshToken {
            user_id: user.id,
            token_hash: "stale".to_string(),
            expires_at: Utc::now() - Duration::days(10),
            created_by: None,
        })
        .await
        .unwrap();

    let deleted = harness
        .store
        .delete_expired_before(Utc::now() - Duration::days(7))
        .await
        .unwrap();

    assert_eq!(deleted, 1);
    assert_eq!(harness.store.count_active(user.id).await.unwrap(), 1);
}

#[tokio::test]
async fn cleanup_task_runs_and_stops_cleanly() {
    let harness = TestHarness::new();
    let user = harness.seed_user("alice");
    harness
        .tokens
        .insert(NewRefreshToken {
            user_id: user.id,
            token_hash: "stale".to_string(),
            expires_at: Utc::now() - Duration::days(10),
            created_by: None,
        })
        .await
        .unwrap();

    let cleanup = harness
        .store
        .spawn_cleanup(StdDuration::from_millis(20), Duration::days(7));
    tokio::time::sleep(StdDuration::from_millis(80)).await;
    assert!(harness.tokens.all().is_empty());

    cleanup.shutdown().await;
}

// --- request authentication middleware ---

async fn whoami(current: Option<Extension<CurrentUser>>) -> String {
    match current {
        Some(Extension(user)) => user.subject,
        None => "anonymous".to_string(),
    }
}

fn request_router(harness: &TestHarness) -> Router {
    let state = RequestAuthState {
        codec: harness.codec.clone(),
        revocations: harness.revocations.clone(),
        users: harness.users.clone() as Arc<dyn crate::db::UserDirectory>,
    };
    Router::new()
        .route("/whoami", any(whoami))
        .layer(axum_middleware::from_fn_with_state(
            state,
            authenticate_request,
        ))
}

async fn send(router: Router, method: Method, bearer: Option<&str>) -> String {
    let mut builder = Request::builder().method(method).uri("/whoami");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = router
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn request_without_a_token_passes_through_unauthenticated() {
    let harness = TestHarness::new();
    let body = send(request_router(&harness), Method::GET, None).await;
    assert_eq!(body, "anonymous");
}

#[tokio::test]
async fn valid_bearer_token_attaches_the_identity() {
    let harness = TestHarness::new();
    harness.seed_user("alice");
    let login = harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();

    let body = send(
        request_router(&harness),
        Method::GET,
        Some(&login.access_token),
    )
    .await;
    assert_eq!(body, "alice");
}

#[tokio::test]
async fn revoked_token_leaves_the_request_unauthenticated() {
    let harness = TestHarness::new();
    harness.seed_user("alice");
    let login = harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();
    harness
        .service
        .logout(&login.access_token, None, false)
        .await
        .unwrap();

    let body = send(
        request_router(&harness),
        Method::GET,
        Some(&login.access_token),
    )
    .await;
    assert_eq!(body, "anonymous");
}

#[tokio::test]
async fn refresh_token_is_not_a_bearer_credential() {
    let harness = TestHarness::new();
    harness.seed_user("alice");
    let login = harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();

    let body = send(
        request_router(&harness),
        Method::GET,
        Some(&login.refresh_token),
    )
    .await;
    assert_eq!(body, "anonymous");
}

#[tokio::test]
async fn options_requests_skip_authentication() {
    let harness = TestHarness::new();
    harness.seed_user("alice");
    let login = harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();

    // even a valid token is not inspected on a preflight
    let body = send(
        request_router(&harness),
        Method::OPTIONS,
        Some(&login.access_token),
    )
    .await;
    assert_eq!(body, "anonymous");
}

#[tokio::test]
async fn gated_account_cannot_use_an_otherwise_valid_token() {
    let harness = TestHarness::new();
    let user = harness.seed_user("alice");
    let login = harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();
    harness
        .users
        .update(user.id, |u| u.status = AccountStatus::Disabled);

    let body = send(
        request_router(&harness),
        Method::GET,
        Some(&login.access_token),
    )
    .await;
    assert_eq!(body, "anonymous");
}

#[tokio::test]
async fn token_subject_must_match_the_current_username() {
    let harness = TestHarness::new();
    let user = harness.seed_user("alice");
    let login = harness
        .service
        .authenticate(&username_login("alice", TEST_PASSWORD))
        .await
        .unwrap();
    harness
        .users
        .update(user.id, |u| u.username = "alice-renamed".to_string());

    let body = send(
        request_router(&harness),
        Method::GET,
        Some(&login.access_token),
    )
    .await;
    assert_eq!(body, "anonymous");
}
