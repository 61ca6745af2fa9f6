//! Glue between a route table and hyper's service traits.
use super::Response;
use futures::future::{ready, BoxFuture, FutureExt, Ready};
use hyper::{server::conn::AddrStream, service::Service, Body, Request};
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::Arc,
    task::{Context, Poll},
};

/// Something that can answer a request with a response, routing it first.
///
/// Implemented by [App][super::App] and [LiveApp][super::LiveApp].
pub trait Dispatch: Sync + Send + 'static {
    fn dispatch(&self, req: Request<Body>) -> BoxFuture<'static, Response>;
}

/// A hyper make service that spawns an [AppService] for each connection.
pub struct MakeAppService<D> {
    app: Arc<D>,
}

impl<D> MakeAppService<D> {
    pub(crate) fn new(app: Arc<D>) -> Self {
        Self { app }
    }
}

impl<D> Clone for MakeAppService<D> {
    fn clone(&self) -> Self {
        Self::new(self.app.clone())
    }
}

impl<'a, D: Dispatch> Service<&'a AddrStream> for MakeAppService<D> {
    type Response = AppService<D>;
    type Error = Infallible;
    type Future = Ready<Result<AppService<D>, Infallible>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, conn: &'a AddrStream) -> Self::Future {
        ready(Ok(AppService {
            app: self.app.clone(),
            remote: Some(conn.remote_addr()),
        }))
    }
}

/// A hyper service for a single connection.
///
/// The remote address of the connection is available to handlers as a [SocketAddr] in the
/// request extensions.
pub struct AppService<D> {
    app: Arc<D>,
    remote: Option<SocketAddr>,
}

impl<D> AppService<D> {
    /// A service that is not bound to any connection.
    pub fn new(app: Arc<D>) -> Self {
        Self { app, remote: None }
    }
}

impl<D> Clone for AppService<D> {
    fn clone(&self) -> Self {
        Self {
            app: self.app.clone(),
            remote: self.remote,
        }
    }
}

impl<D: Dispatch> Service<Request<Body>> for AppService<D> {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        if let Some(addr) = self.remote {
            req.extensions_mut().insert(addr);
        }

        self.app.dispatch(req).map(Ok).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{handler_fn, App};
    use hyper::{body::to_bytes, StatusCode};

    #[tokio::test]
    async fn test_app_service_dispatches() {
        let mut app = App::new();
        app.get(
            "/peer",
            handler_fn(|req: Request<Body>| async move {
                format!("{:?}", req.extensions().get::<SocketAddr>())
            }),
        )
        .unwrap();

        let mut svc = AppService::new(Arc::new(app));

        let req = Request::builder().uri("/peer").body(Body::empty()).unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(StatusCode::OK, resp.status());

        let body = to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(&b"None"[..], &body[..]);

        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let resp = svc.clone().call(req).await.unwrap();
        assert_eq!(StatusCode::NOT_FOUND, resp.status());
    }
}
