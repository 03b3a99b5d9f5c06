use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use http::{Request, Response};
use tower_layer::Layer;
use tower_service::Service;

use crate::manager::SessionManager;

/// Makes the [`SessionManager`] available to every request and, with
/// [`auto_manage`](crate::SessionConfig::with_auto_manage), loads the session up front and
/// writes the cookie back when the session was modified.
#[derive(Debug, Clone)]
pub struct SessionManagerLayer {
    manager: SessionManager,
}

impl SessionManagerLayer {
    #[must_use]
    pub fn new(manager: SessionManager) -> Self {
        Self { manager }
    }
}

#[derive(Debug, Clone)]
pub struct SessionManagerService<S> {
    inner: S,
    manager: SessionManager,
}

impl<S> Layer<S> for SessionManagerLayer {
    type Service = SessionManagerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionManagerService {
            inner,
            manager: self.manager.clone(),
        }
    }
}

impl<ReqBody, ResBody, S> Service<Request<ReqBody>> for SessionManagerService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Default + Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let manager = self.manager.clone();

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            req.extensions_mut().insert(manager.clone());

            if !manager.config().auto_manage() {
                return inner.call(req).await;
            }

            let session = manager.load_from_request(&mut req);
            let mut res = inner.call(req).await?;

            if let Err(err) = manager.save_if_modified(&session, &mut res) {
                tracing::error!(err = %err, "cookie session save failed");
                let mut res = Response::default();
                *res.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
                return Ok(res);
            }

            Ok(res)
        })
    }
}
