// Tests for the `max_age` policy: the cookie Max-Age attribute and token freshness checks.
mod common;

use axum::body::Body;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use http::{Request, header};
use serde_json::json;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tower::{ServiceBuilder, ServiceExt as _};
use tower_cookie_sessions::{SessionConfig, SessionKind, SessionManager};
use tower_cookies::{Cookie, Key, cookie::CookieJar};

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn signed_token(secret: &str, json: &str, issued: i64) -> String {
    let payload = URL_SAFE_NO_PAD.encode(json);
    let timestamp = issued.to_string();
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload.as_bytes());
    mac.update(timestamp.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{payload}|{timestamp}|{signature}")
}

fn encrypted_token(secret: &str, json: &str, issued: i64) -> String {
    let key = Key::derive_from(Sha256::digest(secret.as_bytes()).as_slice());
    let mut jar = CookieJar::new();
    jar.private_mut(&key)
        .add(Cookie::new("session", format!("{issued}|{json}")));
    jar.get("session")
        .expect("jar holds the sealed cookie")
        .value()
        .to_owned()
}

fn manager(kind: SessionKind) -> SessionManager {
    SessionManager::new(
        common::auto_config(kind).with_max_age(Duration::hours(1)),
    )
}

fn load(manager: &SessionManager, token: &str) -> tower_cookie_sessions::Session {
    let mut req = Request::builder()
        .header(
            header::COOKIE,
            common::cookie_header_value(&Cookie::new("session", token.to_owned())),
        )
        .body(())
        .expect("request builds successfully");
    manager.load_from_request(&mut req)
}

#[tokio::test]
async fn no_max_age_is_a_browser_session_cookie() {
    // Exercise: default config without `max_age`.
    // Expectation: cookie has no Max-Age.
    let svc = ServiceBuilder::new()
        .layer(common::make_manager(common::auto_config(SessionKind::PlainSigned)).layer())
        .service_fn(common::handler);

    let req = Request::builder()
        .body(Body::empty())
        .expect("request builds successfully");
    let res = svc.oneshot(req).await.expect("service call succeeds");
    let session_cookie = common::get_session_cookie(&res);

    assert!(session_cookie.max_age().is_none());
}

#[tokio::test]
async fn max_age_sets_cookie_attribute() {
    // Exercise: `with_max_age(d)`.
    // Expectation: cookie Max-Age is `d`.
    for kind in common::KINDS {
        let svc = ServiceBuilder::new()
            .layer(manager(kind).layer())
            .service_fn(common::handler);

        let req = Request::builder()
            .body(Body::empty())
            .expect("request builds successfully");
        let res = svc.oneshot(req).await.expect("service call succeeds");
        let session_cookie = common::get_session_cookie(&res);

        assert_eq!(session_cookie.max_age(), Some(Duration::hours(1)), "{kind}");
    }
}

#[test]
fn fresh_signed_token_is_accepted() {
    let manager = manager(SessionKind::PlainSigned);
    let token = signed_token(common::SECRET, r#"{"id":"mike"}"#, now() - 60);

    assert_eq!(load(&manager, &token).get_value("id"), Some(json!("mike")));
}

#[test]
fn stale_signed_token_is_rejected() {
    // Exercise: a correctly signed token issued longer ago than `max_age`.
    // Expectation: it reads as an empty session.
    let manager = manager(SessionKind::PlainSigned);
    let token = signed_token(common::SECRET, r#"{"id":"mike"}"#, now() - 2 * 3600);

    let session = load(&manager, &token);
    assert!(session.is_empty());
    assert!(!session.is_modified());
}

#[test]
fn stale_token_is_accepted_without_max_age() {
    let manager = SessionManager::new(
        SessionConfig::default()
            .with_kind(SessionKind::PlainSigned)
            .with_secret(common::SECRET),
    );
    let token = signed_token(common::SECRET, r#"{"id":"mike"}"#, now() - 30 * 86400);

    assert_eq!(load(&manager, &token).get_value("id"), Some(json!("mike")));
}

#[test]
fn encrypted_token_freshness() {
    let manager = manager(SessionKind::Encrypted);

    let fresh = encrypted_token(common::SECRET, r#"{"id":"mike"}"#, now() - 60);
    assert_eq!(load(&manager, &fresh).get_value("id"), Some(json!("mike")));

    let stale = encrypted_token(common::SECRET, r#"{"id":"mike"}"#, now() - 2 * 3600);
    assert!(load(&manager, &stale).is_empty());
}

#[test]
fn jwt_exp_claim_is_enforced() {
    // Exercise: a JWT session whose stored `exp` claim lies in the past.
    // Expectation: the token is rejected after the round trip.
    let manager = manager(SessionKind::Jwt);
    let session = manager.create_session(None);
    session
        .insert("exp", now() - 3600)
        .expect("session insert succeeds");
    let mut res = http::Response::new(());
    manager
        .save_to_response(&session, &mut res)
        .expect("session saves");
    let cookie = common::get_session_cookie_from_headers(res.headers());

    assert!(load(&manager, cookie.value()).is_empty());
}
