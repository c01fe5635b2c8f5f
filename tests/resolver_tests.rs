//! End-to-end resolution tests: full verifier set, in-memory stores and a
//! live mock remote authority, exercising precedence, caching, revocation and
//! the HTTP boundary mapping.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine;
use serde_json::json;

use credgate::cache::SessionCache;
use credgate::claims::{SourceStrategy, VerifiedClaims};
use credgate::config::AuthConfig;
use credgate::error::AuthError;
use credgate::extract::{DELEGATED_TOKEN_HEADER, LEGACY_COOKIE, SESSION_COOKIE};
use credgate::now_ms;
use credgate::resolver::{AuthResolver, Resolution};
use credgate::scope;
use credgate::server::{router, AppState};
use credgate::verifier::{
    issue_delegated_token, sign_cookie_value, ExternalVerifier, InMemoryProfileDirectory,
    InMemorySessionStore, JwtIdentityProvider, LookupVerifier, RemoteAuthority, SignedVerifier,
    VerifierSet,
};

const ISSUER: &str = "credgate-host";
const SIGNING: &[u8] = b"integration-signing-secret";
const SEALING: [u8; 32] = [5u8; 32];
const COOKIE_KEY: &[u8] = b"integration-cookie-key";
const API_KEY: &str = "test-api-key";

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn config(authority_url: &str) -> AuthConfig {
    AuthConfig::new(
        ISSUER,
        &b64(SIGNING),
        &b64(&SEALING),
        &b64(COOKIE_KEY),
        authority_url,
        API_KEY,
    )
    .unwrap()
}

fn claims(subject: &str, caps: &[&str], expires_at_ms: i64) -> VerifiedClaims {
    VerifiedClaims {
        subject_id: subject.into(),
        tenant_id: "t1".into(),
        is_elevated: false,
        capabilities: caps.iter().map(|s| s.to_string()).collect(),
        expires_at_ms,
        delegated_access_token: None,
    }
}

#[derive(Clone)]
struct AuthorityState {
    calls: Arc<AtomicUsize>,
    delay: std::time::Duration,
}

async fn authority_verify(
    State(state): State<AuthorityState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    state.calls.fetch_add(1, Ordering::SeqCst);
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    if headers.get("x-verify-api-key").and_then(|v| v.to_str().ok()) != Some(API_KEY) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    match body.get("token").and_then(|t| t.as_str()) {
        Some("good-token") => (
            StatusCode::OK,
            Json(json!({
                "verified": true,
                "user": {"subjectId": "remote-u1", "tenantId": "t9", "isElevated": false},
                "allowedApis": ["messages:send"],
                "expiresAt": now_ms() + 60_000,
                "delegatedAccessToken": "delegated-xyz"
            })),
        ),
        Some("unverified-token") => (
            StatusCode::OK,
            Json(json!({"verified": false, "user": null, "allowedApis": [], "expiresAt": null})),
        ),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({}))),
    }
}

/// Spawn a mock authority on an ephemeral port; returns its base URL and the
/// verify-call counter.
async fn spawn_authority() -> (String, Arc<AtomicUsize>) {
    spawn_authority_with_delay(std::time::Duration::ZERO).await
}

/// Same, but every verify response is held back by `delay` first.
async fn spawn_authority_with_delay(delay: std::time::Duration) -> (String, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/verify", post(authority_verify))
        .with_state(AuthorityState { calls: calls.clone(), delay });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), calls)
}

fn build_resolver(
    cfg: &AuthConfig,
    store: Arc<InMemorySessionStore>,
    directory: Arc<InMemoryProfileDirectory>,
) -> AuthResolver {
    let verifiers = VerifierSet {
        signed: SignedVerifier::new(cfg.issuer.clone(), &cfg.signing_key, cfg.sealing_key),
        external: ExternalVerifier::new(
            Arc::new(JwtIdentityProvider::hs256(ISSUER, SIGNING)),
            directory,
        ),
        lookup: LookupVerifier::new(cfg.cookie_key.clone(), store),
        authority: RemoteAuthority::new(cfg).unwrap(),
    };
    AuthResolver::new(SessionCache::new(cfg.cache_capacity), verifiers)
}

async fn resolver_with_authority() -> (AuthResolver, Arc<AtomicUsize>, Arc<InMemorySessionStore>) {
    let (url, calls) = spawn_authority().await;
    let cfg = config(&url);
    let store = Arc::new(InMemorySessionStore::new());
    let resolver = build_resolver(&cfg, store.clone(), Arc::new(InMemoryProfileDirectory::new()));
    (resolver, calls, store)
}

fn delegated_token(c: &VerifiedClaims) -> String {
    issue_delegated_token(ISSUER, SIGNING, &SEALING, c, 300).unwrap()
}

fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
    let mut h = HeaderMap::new();
    for (k, v) in pairs {
        h.append(
            axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
            HeaderValue::from_str(v).unwrap(),
        );
    }
    h
}

#[tokio::test]
async fn delegated_header_outranks_cookie_slots() {
    let (resolver, calls, store) = resolver_with_authority().await;
    store.insert("sess-1", claims("cookie-user", &[], now_ms() + 60_000));
    let token = delegated_token(&claims("header-user", &["chat:read"], now_ms() + 60_000));

    let h = headers(&[
        (DELEGATED_TOKEN_HEADER, &token),
        (
            "cookie",
            &format!(
                "{}={}; {}=good-token",
                SESSION_COOKIE,
                sign_cookie_value(COOKIE_KEY, "sess-1"),
                LEGACY_COOKIE
            ),
        ),
    ]);
    let ctx = resolver.resolve(&h).await.unwrap().context().unwrap();
    assert_eq!(ctx.subject_id, "header-user");
    assert_eq!(ctx.source, SourceStrategy::SignedDelegated);
    assert_eq!(calls.load(Ordering::SeqCst), 0, "authority never consulted");
}

#[tokio::test]
async fn authority_verification_is_cached_and_idempotent() {
    let (resolver, calls, _) = resolver_with_authority().await;
    let h = headers(&[("cookie", &format!("{LEGACY_COOKIE}=good-token"))]);

    let first = resolver.resolve(&h).await.unwrap().context().unwrap();
    let second = resolver.resolve(&h).await.unwrap().context().unwrap();

    assert_eq!(first.subject_id, "remote-u1");
    assert_eq!(first.source, SourceStrategy::AuthorityDelegated);
    assert_eq!(first.delegated_access_token.as_deref(), Some("delegated-xyz"));
    assert_eq!(first.subject_id, second.subject_id);
    assert_eq!(first.expires_at_ms, second.expires_at_ms);
    assert_eq!(calls.load(Ordering::SeqCst), 1, "second resolve must hit the cache");
}

#[tokio::test]
async fn revocation_forces_reverification() {
    let (resolver, calls, _) = resolver_with_authority().await;
    let h = headers(&[("cookie", &format!("{LEGACY_COOKIE}=good-token"))]);

    resolver.resolve(&h).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(resolver.revoke_subject("remote-u1"), 1);
    resolver.resolve(&h).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2, "post-revoke resolve must re-verify");
}

#[tokio::test]
async fn cached_result_is_not_served_to_a_different_slot() {
    let (resolver, calls, _) = resolver_with_authority().await;

    // Verify once through the legacy-cookie slot (remote authority).
    let cookie = headers(&[("cookie", &format!("{LEGACY_COOKIE}=good-token"))]);
    let ctx = resolver.resolve(&cookie).await.unwrap().context().unwrap();
    assert_eq!(ctx.source, SourceStrategy::AuthorityDelegated);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Replay the identical raw value in the delegated-token header: the
    // signed verifier must run (and reject the opaque value), not the cache.
    let replayed = headers(&[(DELEGATED_TOKEN_HEADER, "good-token")]);
    let err = resolver.resolve(&replayed).await.unwrap_err();
    assert!(matches!(err, AuthError::Malformed { .. }), "got {err}");
    assert_eq!(calls.load(Ordering::SeqCst), 1, "authority slot result must not leak");

    // The cookie slot's own cached entry is untouched.
    resolver.resolve(&cookie).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn revoke_during_in_flight_verification_is_not_lost() {
    let (url, calls) = spawn_authority_with_delay(std::time::Duration::from_millis(300)).await;
    let cfg = config(&url);
    let resolver = Arc::new(build_resolver(
        &cfg,
        Arc::new(InMemorySessionStore::new()),
        Arc::new(InMemoryProfileDirectory::new()),
    ));

    let h = headers(&[("cookie", &format!("{LEGACY_COOKIE}=good-token"))]);
    let in_flight = {
        let resolver = resolver.clone();
        let h = h.clone();
        tokio::spawn(async move { resolver.resolve(&h).await })
    };
    // The revoke lands while the authority call is still pending.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    resolver.revoke_subject("remote-u1");

    in_flight.await.unwrap().unwrap();
    assert!(resolver.cache().is_empty(), "late verifier result must not be cached");

    // The next resolve re-verifies instead of hitting a resurrected entry.
    resolver.resolve(&h).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2, "post-revoke resolve must re-verify");
}

#[tokio::test]
async fn authority_rejection_is_denied_not_unreachable() {
    let (resolver, _, _) = resolver_with_authority().await;
    let h = headers(&[("cookie", &format!("{LEGACY_COOKIE}=revoked-token"))]);
    let err = resolver.resolve(&h).await.unwrap_err();
    assert!(matches!(err, AuthError::Denied { .. }), "got {err}");
}

#[tokio::test]
async fn unverified_response_is_denied() {
    let (resolver, _, _) = resolver_with_authority().await;
    let h = headers(&[("cookie", &format!("{LEGACY_COOKIE}=unverified-token"))]);
    let err = resolver.resolve(&h).await.unwrap_err();
    assert!(matches!(err, AuthError::Denied { .. }));
}

#[tokio::test]
async fn dead_authority_is_unreachable() {
    // Nothing listens on this port.
    let cfg = config("http://127.0.0.1:9");
    let resolver = build_resolver(
        &cfg,
        Arc::new(InMemorySessionStore::new()),
        Arc::new(InMemoryProfileDirectory::new()),
    );
    let h = headers(&[("cookie", &format!("{LEGACY_COOKIE}=good-token"))]);
    let err = resolver.resolve(&h).await.unwrap_err();
    assert!(matches!(err, AuthError::Unreachable { .. }), "got {err}");
}

#[tokio::test]
async fn no_credential_is_unauthenticated_not_error() {
    let (resolver, _, _) = resolver_with_authority().await;
    let res = resolver.resolve(&HeaderMap::new()).await.unwrap();
    assert_eq!(res, Resolution::Unauthenticated);
}

#[tokio::test]
async fn present_but_invalid_credential_is_never_ignored() {
    let (resolver, _, _) = resolver_with_authority().await;
    // Well-formed cookie slot, forged MAC: must fail, not fall through to
    // unauthenticated.
    let h = headers(&[(
        "cookie",
        &format!("{}={}", SESSION_COOKIE, sign_cookie_value(b"wrong-key", "sess-1")),
    )]);
    let err = resolver.resolve(&h).await.unwrap_err();
    assert!(matches!(err, AuthError::SignatureInvalid { .. }));
}

#[tokio::test]
async fn just_expired_token_is_rejected() {
    let (resolver, _, _) = resolver_with_authority().await;
    let token = delegated_token(&claims("u1", &[], now_ms() - 1));
    let h = headers(&[(DELEGATED_TOKEN_HEADER, &token)]);
    let err = resolver.resolve(&h).await.unwrap_err();
    assert!(matches!(err, AuthError::Expired { .. }));
}

#[tokio::test]
async fn resolved_context_flows_through_scope_guard() {
    let (resolver, _, _) = resolver_with_authority().await;
    let token = delegated_token(&claims("u1", &["chat:*"], now_ms() + 60_000));
    let h = headers(&[(DELEGATED_TOKEN_HEADER, &token)]);
    let ctx = resolver.resolve(&h).await.unwrap().context().unwrap();

    assert!(scope::authorize(&ctx, &["chat:read", "chat:write"]).is_ok());
    let err = scope::authorize(&ctx, &["files:read"]).unwrap_err();
    assert!(matches!(err, AuthError::ScopeInsufficient { .. }));
}

/// Spin the real HTTP surface and drive it over the wire.
#[tokio::test]
async fn http_boundary_maps_statuses() {
    let (url, _) = spawn_authority().await;
    let cfg = config(&url);
    let resolver = build_resolver(
        &cfg,
        Arc::new(InMemorySessionStore::new()),
        Arc::new(InMemoryProfileDirectory::new()),
    );
    let app = router(AppState { resolver: Arc::new(resolver) });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();

    // Anonymous whoami passes through.
    let resp = client.get(format!("{base}/whoami")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "anonymous");

    // Valid delegated token resolves.
    let token = delegated_token(&claims("u1", &["sessions:revoke"], now_ms() + 60_000));
    let resp = client
        .get(format!("{base}/whoami"))
        .header(DELEGATED_TOKEN_HEADER, &token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["context"]["subject_id"], "u1");

    // Tampered token is a 401 with its kind, not silently anonymous.
    let resp = client
        .get(format!("{base}/whoami"))
        .header(DELEGATED_TOKEN_HEADER, format!("{token}x"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    // Revocation endpoint: allowed with the capability, 403 without.
    let resp = client
        .post(format!("{base}/session/revoke"))
        .header(DELEGATED_TOKEN_HEADER, &token)
        .json(&json!({"subject_id": "u1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let weak = delegated_token(&claims("u2", &["chat:read"], now_ms() + 60_000));
    let resp = client
        .post(format!("{base}/session/revoke"))
        .header(DELEGATED_TOKEN_HEADER, &weak)
        .json(&json!({"subject_id": "u1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);

    // No credential on a protected route is 401.
    let resp = client
        .post(format!("{base}/session/revoke"))
        .json(&json!({"subject_id": "u1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
}
