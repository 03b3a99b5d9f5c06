#![allow(dead_code)]

// Shared helpers for integration tests.
//
// These helpers use `tower_cookies::Cookie` parsing/encoding to match what the layer emits in
// `Set-Cookie` and what browsers send back in `Cookie`.
use std::convert::Infallible;

use axum::{Router, body::Body};
use http::{HeaderMap, Request, Response, header};
use http_body_util::BodyExt as _;
use tower::ServiceExt as _;
use tower_cookie_sessions::{SessionConfig, SessionKind, SessionManager};
use tower_cookies::Cookie;

pub const SECRET: &str = "test-secret";

pub const KINDS: [SessionKind; 3] = [
    SessionKind::PlainSigned,
    SessionKind::Jwt,
    SessionKind::Encrypted,
];

pub async fn body_string(body: Body) -> String {
    // Collect an Axum body into a UTF-8 string for assertions.
    let bytes = body
        .collect()
        .await
        .expect("body collects successfully")
        .to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub async fn handler(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    // Basic handler used by many tests: write a single key into the session.
    let session = req
        .extensions()
        .get::<tower_cookie_sessions::Session>()
        .cloned()
        .expect("request includes Session extension");

    session.insert("foo", 42).expect("session insert succeeds");

    Ok(Response::new(Body::empty()))
}

pub fn auto_config(kind: SessionKind) -> SessionConfig {
    // Auto-managed config with a real secret for the given token scheme.
    SessionConfig::default()
        .with_kind(kind)
        .with_secret(SECRET)
        .with_auto_manage(true)
}

pub fn make_manager(config: SessionConfig) -> SessionManager {
    SessionManager::new(config)
}

pub fn get_session_cookie(res: &Response<Body>) -> Cookie<'static> {
    // Convenience: parse the session cookie from a response.
    get_session_cookie_from_headers(res.headers())
}

pub fn get_session_cookie_from_headers(headers: &HeaderMap) -> Cookie<'static> {
    // Parse the `Set-Cookie` header into a `Cookie` structure.
    let set_cookie = headers
        .get(header::SET_COOKIE)
        .expect("response includes set-cookie header");
    let set_cookie = set_cookie
        .to_str()
        .expect("set-cookie header is valid utf-8");
    Cookie::parse_encoded(set_cookie)
        .expect("set-cookie parses successfully")
        .into_owned()
}

pub fn set_cookie_count(headers: &HeaderMap) -> usize {
    headers.get_all(header::SET_COOKIE).iter().count()
}

pub fn cookie_header_value(cookie: &Cookie<'_>) -> String {
    // Encode a cookie for use in a `Cookie` request header.
    cookie.encoded().to_string()
}

pub async fn get(app: &Router, uri: &str, cookie: Option<&Cookie<'_>>) -> Response<Body> {
    // Send a GET request through a clone of the router, optionally carrying the session cookie.
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie_header_value(cookie));
    }
    let req = builder
        .body(Body::empty())
        .expect("request builds successfully");
    app.clone()
        .oneshot(req)
        .await
        .expect("service call succeeds")
}

pub fn location(res: &Response<Body>) -> &str {
    res.headers()
        .get(header::LOCATION)
        .expect("response includes location header")
        .to_str()
        .expect("location header is valid utf-8")
}
