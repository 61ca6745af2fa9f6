//! Request handlers and the default responders.
use super::{
    params::{allowed_methods, Route},
    reply::Reply,
    Response,
};
use futures::future::{ready, BoxFuture, FutureExt};
use headers::Allow;
use hyper::{Body, Method, Request, StatusCode, Uri};
use std::{any::Any, future::Future, marker::PhantomData, sync::Arc};
use thiserror::Error;

/// Something that can respond to a request.
pub trait Handler: Sync + Send {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'static, Response>;
}

/// A type erased, shareable [Handler].
pub type BoxHandler = Arc<dyn Handler>;

impl<H: Handler + ?Sized> Handler for Arc<H> {
    #[inline]
    fn handle(&self, req: Request<Body>) -> BoxFuture<'static, Response> {
        (**self).handle(req)
    }
}

/// A [Handler] backed by an async function. See [handler_fn].
pub struct HandlerFn<P, Fut> {
    fun: P,
    tag: PhantomData<fn(Fut)>,
}

impl<P: Fn(Request<Body>) -> Fut, Fut> HandlerFn<P, Fut> {
    pub fn new(fun: P) -> Self {
        Self {
            fun,
            tag: PhantomData,
        }
    }
}

impl<P, Fut, Resp> Handler for HandlerFn<P, Fut>
where
    P: Fn(Request<Body>) -> Fut + Sync + Send,
    Fut: Future<Output = Resp> + Send + 'static,
    Resp: Reply + 'static,
{
    fn handle(&self, req: Request<Body>) -> BoxFuture<'static, Response> {
        (self.fun)(req).map(Reply::into_response).boxed()
    }
}

/// Convert an async function into a [Handler].
///
/// ```
/// use hyper::{Body, Request};
/// use muxtree::{handler_fn, App};
///
/// let mut app = App::new();
/// app.get("/", handler_fn(|_: Request<Body>| async { "index" }))
///     .unwrap();
/// ```
pub fn handler_fn<P, Fut>(fun: P) -> HandlerFn<P, Fut>
where P: Fn(Request<Body>) -> Fut {
    HandlerFn::new(fun)
}

/// Responds with `404 page not found`.
#[derive(Copy, Clone, Debug)]
pub struct NotFound;

impl Handler for NotFound {
    fn handle(&self, _: Request<Body>) -> BoxFuture<'static, Response> {
        ready("404 page not found".with_status(StatusCode::NOT_FOUND)).boxed()
    }
}

/// Responds with `405 method not allowed`, listing the route's methods in an `Allow` header.
#[derive(Copy, Clone, Debug)]
pub struct MethodNotAllowed;

impl Handler for MethodNotAllowed {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'static, Response> {
        let allow: Allow = (allowed_methods(&req).unwrap_or_default().iter())
            .filter_map(|m| Method::from_bytes(m.as_bytes()).ok())
            .collect();

        let resp = "405 method not allowed"
            .with_status(StatusCode::METHOD_NOT_ALLOWED)
            .with_header(allow);

        ready(resp).boxed()
    }
}

/// A panic raised by handler code and caught by the dispatcher.
///
/// Carries the head of the request that was being handled, since the request itself is
/// consumed by the handler.
#[derive(Clone, Debug, Error)]
#[error("handler panicked on {method} {uri}: {message}")]
pub struct HandlerFault {
    /// The panic message, if the payload was a string.
    pub message: String,
    pub method: Method,
    pub uri: Uri,
    /// The route the request was dispatched to. `None` if it reached the not found responder.
    pub route: Option<Route>,
}

impl HandlerFault {
    pub(crate) fn from_panic(
        payload: Box<dyn Any + Send>,
        method: Method,
        uri: Uri,
        route: Option<Route>,
    ) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(s) => *s,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(s) => (*s).to_owned(),
                Err(_) => "<non-string panic payload>".to_owned(),
            },
        };

        Self {
            message,
            method,
            uri,
            route,
        }
    }
}

/// Converts a [HandlerFault] into a response.
///
/// Implemented for any `Fn(HandlerFault) -> impl Reply`.
pub trait Recover: Sync + Send {
    fn recover(&self, fault: HandlerFault) -> Response;
}

impl<F, R> Recover for F
where
    F: Fn(HandlerFault) -> R + Sync + Send,
    R: Reply,
{
    #[inline]
    fn recover(&self, fault: HandlerFault) -> Response {
        (self)(fault).into_response()
    }
}

/// Responds with `500 internal server error`.
#[derive(Copy, Clone, Debug)]
pub struct InternalError;

impl Recover for InternalError {
    fn recover(&self, _: HandlerFault) -> Response {
        "500 internal server error".with_status(StatusCode::INTERNAL_SERVER_ERROR)
    }
}
