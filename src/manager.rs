use std::sync::Arc;

use http::{Extensions, HeaderMap, Request};
use serde::Serialize;
use serde_json::Value;

use crate::{
    Session, SessionConfig,
    codec::Codec,
    cookie::{self, CookieSink},
    error::{Error, Result},
    gate::{AuthGate, UserLoader},
    layer::SessionManagerLayer,
};

#[derive(Debug)]
struct ManagerInner {
    config: SessionConfig,
    codec: Arc<Codec>,
}

/// Owns the session configuration and codec, and loads and saves sessions for requests.
///
/// Cheap to clone. The configuration cannot change once the manager exists.
#[derive(Debug, Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        if config.secret.is_insecure_default() {
            tracing::warn!(
                "using the insecure default session secret; configure a secret key before \
                 deploying"
            );
        }

        let codec = Codec::new(config.kind, &config.secret)
            .with_max_age(config.cookie.max_age)
            .with_algorithm(config.jwt_algorithm);

        Self {
            inner: Arc::new(ManagerInner {
                config,
                codec: Arc::new(codec),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn codec(&self) -> &Codec {
        &self.inner.codec
    }

    /// A session for `token`, decoded on first access with the configured codec.
    pub fn create_session(&self, token: Option<String>) -> Session {
        Session::new(token, self.inner.codec.clone())
    }

    /// The session stored in `extensions`, or a new one built from the request cookies.
    pub fn load(&self, headers: &HeaderMap, extensions: &mut Extensions) -> Session {
        self.load_or_create(cookie::extract(headers, self.config().name()), extensions)
    }

    /// The request's session. Repeated calls return the same session.
    pub fn load_from_request<B>(&self, req: &mut Request<B>) -> Session {
        let token = cookie::extract(req.headers(), self.config().name());
        self.load_or_create(token, req.extensions_mut())
    }

    fn load_or_create(&self, token: Option<String>, extensions: &mut Extensions) -> Session {
        if let Some(session) = extensions.get::<Session>() {
            return session.clone();
        }

        let session = self.create_session(token);
        extensions.insert(session.clone());
        session
    }

    /// Write the session cookie to `response`, whether or not the session changed.
    pub fn save_to_response<R>(&self, session: &Session, response: &mut R) -> Result<()>
    where
        R: CookieSink + ?Sized,
    {
        self.save_with_changes(session, response, std::iter::empty::<(String, Value)>())
    }

    /// Apply `changes` to the session, then write the session cookie to `response`.
    pub fn save_with_changes<R, I, K>(
        &self,
        session: &Session,
        response: &mut R,
        changes: I,
    ) -> Result<()>
    where
        R: CookieSink + ?Sized,
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (key, value) in changes {
            session.insert_value(key, value);
        }

        let cookie = self.config().build_cookie(session.encode_for_response()?);
        let size = cookie::pair_len(&cookie);
        let max_cookie_bytes = self.config().max_cookie_bytes();
        if size > max_cookie_bytes {
            return Err(Error::Encode(format!(
                "Cookie exceeds max_cookie_bytes ({size} > {max_cookie_bytes})"
            )));
        }

        cookie::bind(response, &cookie)?;
        session.mark_saved();
        Ok(())
    }

    /// Write the session cookie only if the session was modified.
    pub fn save_if_modified<R>(&self, session: &Session, response: &mut R) -> Result<()>
    where
        R: CookieSink + ?Sized,
    {
        if session.is_modified() {
            self.save_to_response(session, response)?;
        }
        Ok(())
    }

    /// Store `identity` in the request's session. The cookie is written by a later save, or
    /// by the layer when `auto_manage` is set.
    pub fn login<B, I: Serialize>(&self, req: &mut Request<B>, identity: I) -> Result<Session> {
        let session = self.load_from_request(req);
        session.login(identity)?;
        Ok(session)
    }

    /// [`login`](Self::login), then write the session cookie to `response` right away.
    pub fn login_and_save<B, I, R>(
        &self,
        req: &mut Request<B>,
        identity: I,
        response: &mut R,
    ) -> Result<Session>
    where
        I: Serialize,
        R: CookieSink + ?Sized,
    {
        let session = self.login(req, identity)?;
        self.save_to_response(&session, response)?;
        Ok(session)
    }

    /// Remove the identity from the request's session, if any.
    pub fn logout<B>(&self, req: &mut Request<B>) -> Session {
        let session = self.load_from_request(req);
        session.logout();
        session
    }

    /// [`logout`](Self::logout), then write the session cookie to `response` right away.
    pub fn logout_and_save<B, R>(&self, req: &mut Request<B>, response: &mut R) -> Result<Session>
    where
        R: CookieSink + ?Sized,
    {
        let session = self.logout(req);
        self.save_to_response(&session, response)?;
        Ok(session)
    }

    pub fn layer(&self) -> SessionManagerLayer {
        SessionManagerLayer::new(self.clone())
    }

    pub fn auth_gate<L: UserLoader>(&self, loader: L) -> AuthGate<L> {
        AuthGate::new(self.clone(), loader)
    }
}
