use std::borrow::Cow;

use http::StatusCode;
use jsonwebtoken::Algorithm;
use time::Duration;
use tower_cookies::Cookie;

use crate::{
    SameSite, SecretKey,
    codec::SessionKind,
    gate::{RedirectKind, RedirectTarget},
};

pub const DEFAULT_COOKIE_NAME: &str = "session";
pub const DEFAULT_LOGIN_URL: &str = "/login";

/// Attributes applied to every emitted session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieParams {
    pub(crate) path: Cow<'static, str>,
    pub(crate) max_age: Option<Duration>,
    pub(crate) same_site: SameSite,
    pub(crate) secure: bool,
    pub(crate) domain: Option<Cow<'static, str>>,
    pub(crate) http_only: bool,
}

impl Default for CookieParams {
    fn default() -> Self {
        Self {
            path: "/".into(),
            max_age: None,
            same_site: SameSite::Lax,
            secure: false,
            domain: None,
            http_only: true,
        }
    }
}

impl CookieParams {
    #[must_use]
    pub fn with_path<P: Into<Cow<'static, str>>>(mut self, path: P) -> Self {
        self.path = path.into();
        self
    }

    /// Lifetime of the cookie. Also bounds the age of accepted signed and encrypted tokens.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    #[must_use]
    pub fn without_max_age(mut self) -> Self {
        self.max_age = None;
        self
    }

    #[must_use]
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn with_domain<D: Into<Cow<'static, str>>>(mut self, domain: D) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn without_domain(mut self) -> Self {
        self.domain = None;
        self
    }

    #[must_use]
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    pub fn same_site(&self) -> SameSite {
        self.same_site
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn http_only(&self) -> bool {
        self.http_only
    }
}

/// Everything a [`SessionManager`](crate::SessionManager) needs. Immutable once the manager
/// is built from it.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub(crate) kind: SessionKind,
    pub(crate) secret: SecretKey,
    pub(crate) name: Cow<'static, str>,
    pub(crate) cookie: CookieParams,
    pub(crate) login_url: RedirectTarget,
    pub(crate) redirect_status: StatusCode,
    pub(crate) redirect_kind: RedirectKind,
    pub(crate) auto_manage: bool,
    pub(crate) max_cookie_bytes: usize,
    pub(crate) jwt_algorithm: Algorithm,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            kind: SessionKind::default(),
            secret: SecretKey::default(),
            name: DEFAULT_COOKIE_NAME.into(),
            cookie: CookieParams::default(),
            login_url: RedirectTarget::from(DEFAULT_LOGIN_URL),
            redirect_status: StatusCode::TEMPORARY_REDIRECT,
            redirect_kind: RedirectKind::Header,
            auto_manage: false,
            max_cookie_bytes: 4096,
            jwt_algorithm: Algorithm::HS256,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_kind(mut self, kind: SessionKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_secret<K: Into<SecretKey>>(mut self, secret: K) -> Self {
        self.secret = secret.into();
        self
    }

    #[must_use]
    pub fn with_name<N: Into<Cow<'static, str>>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_cookie_params(mut self, cookie: CookieParams) -> Self {
        self.cookie = cookie;
        self
    }

    #[must_use]
    pub fn with_path<P: Into<Cow<'static, str>>>(mut self, path: P) -> Self {
        self.cookie = self.cookie.with_path(path);
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.cookie = self.cookie.with_max_age(max_age);
        self
    }

    #[must_use]
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.cookie = self.cookie.with_same_site(same_site);
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.cookie = self.cookie.with_secure(secure);
        self
    }

    #[must_use]
    pub fn with_domain<D: Into<Cow<'static, str>>>(mut self, domain: D) -> Self {
        self.cookie = self.cookie.with_domain(domain);
        self
    }

    #[must_use]
    pub fn without_domain(mut self) -> Self {
        self.cookie = self.cookie.without_domain();
        self
    }

    #[must_use]
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.cookie = self.cookie.with_http_only(http_only);
        self
    }

    /// Where the login gate sends anonymous users unless a guard overrides it.
    #[must_use]
    pub fn with_login_url<T: Into<RedirectTarget>>(mut self, login_url: T) -> Self {
        self.login_url = login_url.into();
        self
    }

    #[must_use]
    pub fn with_redirect_status(mut self, status: StatusCode) -> Self {
        self.redirect_status = status;
        self
    }

    /// Load and save the session around every request passing through the layer.
    /// Send anonymous clients to the login URL with a `Location` header (the default) or an
    /// HTML page. HTML redirects answer `200 OK` unless a guard sets its own status.
    #[must_use]
    pub fn with_redirect_kind(mut self, redirect_kind: RedirectKind) -> Self {
        self.redirect_kind = redirect_kind;
        self
    }

    #[must_use]
    pub fn with_auto_manage(mut self, auto_manage: bool) -> Self {
        self.auto_manage = auto_manage;
        self
    }

    #[must_use]
    pub fn with_max_cookie_bytes(mut self, max_cookie_bytes: usize) -> Self {
        self.max_cookie_bytes = max_cookie_bytes;
        self
    }

    #[must_use]
    pub fn with_jwt_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.jwt_algorithm = algorithm;
        self
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cookie_params(&self) -> &CookieParams {
        &self.cookie
    }

    pub fn login_url(&self) -> &RedirectTarget {
        &self.login_url
    }

    pub fn redirect_status(&self) -> StatusCode {
        self.redirect_status
    }

    pub fn redirect_kind(&self) -> RedirectKind {
        self.redirect_kind
    }

    pub fn auto_manage(&self) -> bool {
        self.auto_manage
    }

    pub fn max_cookie_bytes(&self) -> usize {
        self.max_cookie_bytes
    }

    pub fn jwt_algorithm(&self) -> Algorithm {
        self.jwt_algorithm
    }

    pub(crate) fn build_cookie(&self, value: String) -> Cookie<'static> {
        let params = &self.cookie;
        let mut cookie_builder = Cookie::build((self.name.clone(), value))
            .http_only(params.http_only)
            .same_site(params.same_site)
            .secure(params.secure)
            .path(params.path.clone());

        if let Some(max_age) = params.max_age {
            cookie_builder = cookie_builder.max_age(max_age);
        }

        if let Some(domain) = params.domain.clone() {
            cookie_builder = cookie_builder.domain(domain);
        }

        cookie_builder.build()
    }
}
