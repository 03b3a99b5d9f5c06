//! The login gate: resolve the current user from the session and turn anonymous or
//! unqualified requests into redirects.

use std::{
    convert::Infallible,
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, header};
use serde_json::Value;
use tower_layer::Layer;
use tower_service::Service;

use crate::SessionManager;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Decides whether a resolved user may pass.
pub type Checker<U> = Arc<dyn Fn(Option<&U>) -> bool + Send + Sync>;

type Resolver = Arc<dyn Fn(&Request<()>) -> Location + Send + Sync>;

/// Resolves the identity stored in the session into an application user.
#[async_trait]
pub trait UserLoader: Send + Sync + 'static {
    type User: Clone + Send + Sync + 'static;
    type Error: Send + 'static;

    async fn load_user(&self, id: &Value) -> Result<Option<Self::User>, Self::Error>;
}

/// The default loader: the stored identity is the user. Falsy identities (`null`, `false`,
/// `0`, `""`, empty collections) count as nobody.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityLoader;

#[async_trait]
impl UserLoader for IdentityLoader {
    type User = Value;
    type Error = Infallible;

    async fn load_user(&self, id: &Value) -> Result<Option<Value>, Infallible> {
        Ok(is_truthy(id).then(|| id.clone()))
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// A [`UserLoader`] backed by an async function.
#[derive(Clone)]
pub struct LoaderFn<F> {
    f: F,
}

pub fn loader_fn<F, Fut, U, E>(f: F) -> LoaderFn<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<U>, E>> + Send + 'static,
    U: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    LoaderFn { f }
}

impl<F> fmt::Debug for LoaderFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderFn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut, U, E> UserLoader for LoaderFn<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<U>, E>> + Send + 'static,
    U: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    type User = U;
    type Error = E;

    async fn load_user(&self, id: &Value) -> Result<Option<U>, E> {
        (self.f)(id.clone()).await
    }
}

/// A redirect location, possibly still being computed.
///
/// A pending location may resolve to another pending location; the gate keeps awaiting
/// until it reaches a ready one.
pub enum Location {
    Ready(String),
    Pending(BoxFuture<Location>),
}

impl Location {
    pub fn pending<F>(future: F) -> Self
    where
        F: Future + Send + 'static,
        F::Output: Into<Location>,
    {
        Location::Pending(Box::pin(async move { future.await.into() }))
    }

    pub async fn resolve(self) -> String {
        let mut location = self;
        loop {
            match location {
                Location::Ready(url) => return url,
                Location::Pending(next) => location = next.await,
            }
        }
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Ready(url) => f.debug_tuple("Ready").field(url).finish(),
            Location::Pending(_) => f.write_str("Pending"),
        }
    }
}

impl From<String> for Location {
    fn from(url: String) -> Self {
        Location::Ready(url)
    }
}

impl From<&str> for Location {
    fn from(url: &str) -> Self {
        Location::Ready(url.to_owned())
    }
}

/// Where a rejected request is sent.
#[derive(Clone)]
pub enum RedirectTarget {
    /// Redirect to a fixed URL.
    Literal(String),
    /// Compute the URL from the request head.
    Resolver(Resolver),
    /// Answer with this response as-is instead of redirecting.
    Response {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
}

impl RedirectTarget {
    pub fn literal(url: impl Into<String>) -> Self {
        RedirectTarget::Literal(url.into())
    }

    pub fn resolver<F, L>(resolve: F) -> Self
    where
        F: Fn(&Request<()>) -> L + Send + Sync + 'static,
        L: Into<Location>,
    {
        RedirectTarget::Resolver(Arc::new(move |req| resolve(req).into()))
    }

    pub fn resolver_async<F, Fut>(resolve: F) -> Self
    where
        F: Fn(&Request<()>) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Into<Location>,
    {
        RedirectTarget::Resolver(Arc::new(move |req| Location::pending(resolve(req))))
    }

    pub fn response(status: StatusCode) -> Self {
        RedirectTarget::Response {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Set the body of a [`RedirectTarget::Response`]. Other targets are returned unchanged.
    #[must_use]
    pub fn with_body(mut self, content: impl Into<Bytes>) -> Self {
        if let RedirectTarget::Response { body, .. } = &mut self {
            *body = content.into();
        }
        self
    }

    /// Add a header to a [`RedirectTarget::Response`]. Other targets are returned unchanged.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        if let RedirectTarget::Response { headers, .. } = &mut self {
            headers.append(name, value);
        }
        self
    }

    async fn reject(&self, head: &Request<()>, redirect: Redirect) -> Rejection {
        let location = match self {
            RedirectTarget::Literal(url) => url.clone(),
            RedirectTarget::Resolver(resolve) => resolve(head).resolve().await,
            RedirectTarget::Response {
                status,
                headers,
                body,
            } => {
                return Rejection::Response {
                    status: *status,
                    headers: headers.clone(),
                    body: body.clone(),
                };
            }
        };
        let Redirect {
            kind,
            status,
            headers,
        } = redirect;

        Rejection::Redirect {
            location,
            kind,
            status,
            headers,
        }
    }
}

impl fmt::Debug for RedirectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedirectTarget::Literal(url) => f.debug_tuple("Literal").field(url).finish(),
            RedirectTarget::Resolver(_) => f.write_str("Resolver"),
            RedirectTarget::Response {
                status,
                headers,
                body,
            } => f
                .debug_struct("Response")
                .field("status", status)
                .field("headers", headers)
                .field("body_len", &body.len())
                .finish(),
        }
    }
}

impl From<String> for RedirectTarget {
    fn from(url: String) -> Self {
        RedirectTarget::Literal(url)
    }
}

impl From<&str> for RedirectTarget {
    fn from(url: &str) -> Self {
        RedirectTarget::Literal(url.to_owned())
    }
}

fn request_head<B>(req: &Request<B>) -> Request<()> {
    let mut head = Request::new(());
    *head.method_mut() = req.method().clone();
    *head.uri_mut() = req.uri().clone();
    *head.version_mut() = req.version();
    *head.headers_mut() = req.headers().clone();
    head
}

/// How the gate sends an anonymous client to the login page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectKind {
    /// A `Location` header with the redirect status.
    #[default]
    Header,
    /// An HTML page that navigates with a meta refresh. Browsers keep cookies set on it,
    /// which some drop on a `3xx` response.
    Html,
}

struct Redirect {
    kind: RedirectKind,
    status: StatusCode,
    headers: HeaderMap,
}

/// The response the gate answers with instead of calling the protected handler.
#[derive(Debug, Clone)]
pub enum Rejection {
    Redirect {
        location: String,
        kind: RedirectKind,
        status: StatusCode,
        headers: HeaderMap,
    },
    Response {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
}

impl Rejection {
    pub fn into_response<B: From<Bytes>>(self) -> Response<B> {
        match self {
            Rejection::Redirect {
                location,
                kind: RedirectKind::Header,
                status,
                headers,
            } => {
                let mut response = Response::new(B::from(Bytes::new()));
                match HeaderValue::try_from(location) {
                    Ok(location) => {
                        *response.status_mut() = status;
                        *response.headers_mut() = headers;
                        response.headers_mut().insert(header::LOCATION, location);
                    }
                    Err(err) => {
                        tracing::error!(err = %err, "redirect location is not a valid header value");
                        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                    }
                }
                response
            }
            Rejection::Redirect {
                location,
                kind: RedirectKind::Html,
                status,
                headers,
            } => {
                let mut response = Response::new(B::from(Bytes::from(html_redirect(&location))));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/html; charset=utf-8"),
                );
                response
            }
            Rejection::Response {
                status,
                headers,
                body,
            } => {
                let mut response = Response::new(B::from(body));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response
            }
        }
    }
}

fn html_redirect(location: &str) -> String {
    let location = escape_html(location);
    format!(
        "<html><head><meta http-equiv=\"Refresh\" content=\"0; URL={location}\" /></head>\
         <body>Please click <a href=\"{location}\">here</a> if you are not redirected within a \
         few seconds</body></html>"
    )
}

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// What [`AuthGate::check_user`] decided.
#[derive(Debug)]
pub enum GateOutcome<U> {
    Pass(Option<U>),
    Reject(Rejection),
}

/// The user resolved for the current request, cached in the request extensions.
#[derive(Debug, Clone)]
pub struct CurrentUser<U>(pub Option<U>);

/// Per-route overrides of the gate's checker and redirect target.
pub struct Requirement<U> {
    checker: Option<Checker<U>>,
    location: Option<RedirectTarget>,
    status: Option<StatusCode>,
    headers: HeaderMap,
}

impl<U> Requirement<U> {
    pub fn new() -> Self {
        Self {
            checker: None,
            location: None,
            status: None,
            headers: HeaderMap::new(),
        }
    }

    #[must_use]
    pub fn with_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn(Option<&U>) -> bool + Send + Sync + 'static,
    {
        self.checker = Some(Arc::new(checker));
        self
    }

    #[must_use]
    pub fn with_location<T: Into<RedirectTarget>>(mut self, location: T) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Status of the redirect sent by this guard, instead of the configured one.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Extra header on the redirect sent by this guard.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}

impl<U> Default for Requirement<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U> Clone for Requirement<U> {
    fn clone(&self) -> Self {
        Self {
            checker: self.checker.clone(),
            location: self.location.clone(),
            status: self.status,
            headers: self.headers.clone(),
        }
    }
}

impl<U> fmt::Debug for Requirement<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Requirement")
            .field("checker", &self.checker.as_ref().map(|_| "custom"))
            .field("location", &self.location)
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish()
    }
}

/// Guards handlers behind a logged-in user.
pub struct AuthGate<L: UserLoader> {
    manager: SessionManager,
    loader: Arc<L>,
    default_checker: Checker<L::User>,
}

impl<L: UserLoader> AuthGate<L> {
    /// A gate whose default checker lets any resolved user through.
    pub fn new(manager: SessionManager, loader: L) -> Self {
        Self {
            manager,
            loader: Arc::new(loader),
            default_checker: Arc::new(|user: Option<&L::User>| user.is_some()),
        }
    }

    #[must_use]
    pub fn with_default_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn(Option<&L::User>) -> bool + Send + Sync + 'static,
    {
        self.default_checker = Arc::new(checker);
        self
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// The user behind the request's session. The loader runs at most once per request.
    pub async fn load_user<B>(&self, req: &mut Request<B>) -> Result<Option<L::User>, L::Error> {
        if let Some(CurrentUser(user)) = req.extensions().get::<CurrentUser<L::User>>() {
            return Ok(user.clone());
        }

        let session = self.manager.load_from_request(req);
        let Some(id) = session.user_id() else {
            return Ok(None);
        };

        let user = self.loader.load_user(&id).await?;
        req.extensions_mut().insert(CurrentUser(user.clone()));
        Ok(user)
    }

    /// Resolve the user and apply the requirement. Loader errors are returned untouched.
    pub async fn check_user<B>(
        &self,
        req: &mut Request<B>,
        requirement: &Requirement<L::User>,
    ) -> Result<GateOutcome<L::User>, L::Error> {
        let user = self.load_user(req).await?;
        let checker = requirement
            .checker
            .as_ref()
            .unwrap_or(&self.default_checker);
        if checker(user.as_ref()) {
            return Ok(GateOutcome::Pass(user));
        }

        let config = self.manager.config();
        let target = requirement
            .location
            .as_ref()
            .unwrap_or_else(|| config.login_url());
        let kind = config.redirect_kind();
        let status = requirement.status.unwrap_or(match kind {
            RedirectKind::Header => config.redirect_status(),
            RedirectKind::Html => StatusCode::OK,
        });
        let redirect = Redirect {
            kind,
            status,
            headers: requirement.headers.clone(),
        };
        let head = request_head(req);
        let rejection = target.reject(&head, redirect).await;
        tracing::debug!(uri = %head.uri(), ?rejection, "login required");

        Ok(GateOutcome::Reject(rejection))
    }

    /// A layer guarding the wrapped service with the default checker and login URL.
    pub fn require_user(&self) -> RequireUserLayer<L> {
        self.require(Requirement::default())
    }

    pub fn require(&self, requirement: Requirement<L::User>) -> RequireUserLayer<L> {
        RequireUserLayer {
            gate: self.clone(),
            requirement,
        }
    }
}

impl<L: UserLoader> Clone for AuthGate<L> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            loader: self.loader.clone(),
            default_checker: self.default_checker.clone(),
        }
    }
}

impl<L: UserLoader> fmt::Debug for AuthGate<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGate")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

pub struct RequireUserLayer<L: UserLoader> {
    gate: AuthGate<L>,
    requirement: Requirement<L::User>,
}

impl<L: UserLoader> Clone for RequireUserLayer<L> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            requirement: self.requirement.clone(),
        }
    }
}

impl<L: UserLoader> fmt::Debug for RequireUserLayer<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequireUserLayer")
            .field("requirement", &self.requirement)
            .finish_non_exhaustive()
    }
}

impl<S, L: UserLoader> Layer<S> for RequireUserLayer<L> {
    type Service = RequireUser<S, L>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireUser {
            inner,
            gate: self.gate.clone(),
            requirement: self.requirement.clone(),
        }
    }
}

/// Calls the inner service only for requests that pass the gate. Passing requests carry a
/// [`CurrentUser`] extension.
pub struct RequireUser<S, L: UserLoader> {
    inner: S,
    gate: AuthGate<L>,
    requirement: Requirement<L::User>,
}

impl<S: Clone, L: UserLoader> Clone for RequireUser<S, L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            gate: self.gate.clone(),
            requirement: self.requirement.clone(),
        }
    }
}

impl<S: fmt::Debug, L: UserLoader> fmt::Debug for RequireUser<S, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequireUser")
            .field("inner", &self.inner)
            .field("requirement", &self.requirement)
            .finish_non_exhaustive()
    }
}

impl<ReqBody, ResBody, S, L> Service<Request<ReqBody>> for RequireUser<S, L>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: From<L::Error>,
    ReqBody: Send + 'static,
    ResBody: From<Bytes> + Send,
    L: UserLoader,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let gate = self.gate.clone();
        let requirement = self.requirement.clone();

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match gate.check_user(&mut req, &requirement).await? {
                GateOutcome::Pass(user) => {
                    if req.extensions().get::<CurrentUser<L::User>>().is_none() {
                        req.extensions_mut().insert(CurrentUser(user));
                    }
                    inner.call(req).await
                }
                GateOutcome::Reject(rejection) => Ok(rejection.into_response()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::{BodyExt as _, Full};
    use serde_json::json;

    use super::*;

    #[test]
    fn truthiness_follows_json_values() {
        for falsy in [json!(null), json!(false), json!(0), json!(""), json!([]), json!({})] {
            assert!(!is_truthy(&falsy), "{falsy}");
        }
        for truthy in [json!(true), json!(1), json!("mike"), json!([0]), json!({"a": 1})] {
            assert!(is_truthy(&truthy), "{truthy}");
        }
    }

    #[tokio::test]
    async fn identity_loader_drops_falsy_ids() {
        assert_eq!(
            IdentityLoader.load_user(&json!("mike")).await,
            Ok(Some(json!("mike")))
        );
        assert_eq!(IdentityLoader.load_user(&json!("")).await, Ok(None));
    }

    #[tokio::test]
    async fn chained_locations_resolve() {
        let location = Location::pending(async {
            tokio::task::yield_now().await;
            Location::pending(async { "/deep" })
        });

        assert_eq!(location.resolve().await, "/deep");
    }

    async fn body_text(response: Response<Full<Bytes>>) -> String {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body collects successfully")
            .to_bytes();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn redirect(location: &str, kind: RedirectKind, status: StatusCode) -> Rejection {
        Rejection::Redirect {
            location: location.into(),
            kind,
            status,
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn redirect_rejection_sets_location() {
        let response: Response<Full<Bytes>> =
            redirect("/home", RedirectKind::Header, StatusCode::TEMPORARY_REDIRECT)
                .into_response();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], "/home");
    }

    #[test]
    fn invalid_location_is_a_server_error() {
        let response: Response<Full<Bytes>> =
            redirect("/bad\nheader", RedirectKind::Header, StatusCode::FOUND).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn html_redirect_escapes_location() {
        let response: Response<Full<Bytes>> =
            redirect("/next?a=1&b=\"><script>", RedirectKind::Html, StatusCode::OK)
                .into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::LOCATION).is_none());
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
        let body = body_text(response).await;
        assert!(body.contains("URL=/next?a=1&amp;b=&quot;&gt;&lt;script&gt;"));
        assert!(!body.contains("<script>"));
    }

    #[tokio::test]
    async fn response_target_keeps_head_and_body() {
        let target = RedirectTarget::response(StatusCode::FORBIDDEN)
            .with_header(header::WWW_AUTHENTICATE, HeaderValue::from_static("Cookie"))
            .with_body("members only");
        let RedirectTarget::Response {
            status,
            headers,
            body,
        } = target
        else {
            panic!("target is a prebuilt response");
        };

        let response: Response<Full<Bytes>> = Rejection::Response {
            status,
            headers,
            body,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Cookie");
        assert_eq!(body_text(response).await, "members only");
    }
}
