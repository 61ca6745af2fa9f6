//! Middleware combinators.
//!
//! A [Middleware] wraps a handler in another handler. Middleware registered on an [App] or
//! [Group] wraps every route registered after it, with the first registered middleware ending
//! up outermost.
//!
//! [App]: super::App
//! [Group]: super::Group
use super::{
    handler::{BoxHandler, Handler},
    params::current_route,
    reply::Reply,
    tree::Wrapper,
    Response,
};
use futures::future::{BoxFuture, FutureExt};
use http::{header::HeaderName, HeaderValue};
use hyper::{Body, Request};
use std::{future::Future, sync::Arc, time::Instant};
use tracing::info;

/// A function from handler to handler.
pub type Middleware = Wrapper<BoxHandler>;

/// Build a [Middleware] from an async function of the request and the next handler.
///
/// # Examples
/// ```
/// use hyper::{Body, Request, StatusCode};
/// use muxtree::{mw, reply::Reply, App, BoxHandler, Handler};
///
/// let mut app = App::new();
/// app.with(mw::from_fn(|req: Request<Body>, next: BoxHandler| async move {
///     if req.headers().contains_key("x-token") {
///         next.handle(req).await
///     } else {
///         StatusCode::UNAUTHORIZED.into_response()
///     }
/// }));
/// ```
pub fn from_fn<F, Fut, R>(fun: F) -> Middleware
where
    F: Fn(Request<Body>, BoxHandler) -> Fut + Clone + Sync + Send + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Reply + 'static,
{
    Arc::new(move |next: BoxHandler| -> BoxHandler {
        let fun = fun.clone();
        Arc::new(Around { fun, next })
    })
}

struct Around<F> {
    fun: F,
    next: BoxHandler,
}

impl<F, Fut, R> Handler for Around<F>
where
    F: Fn(Request<Body>, BoxHandler) -> Fut + Sync + Send,
    Fut: Future<Output = R> + Send + 'static,
    R: Reply + 'static,
{
    fn handle(&self, req: Request<Body>) -> BoxFuture<'static, Response> {
        (self.fun)(req, self.next.clone())
            .map(Reply::into_response)
            .boxed()
    }
}

/// Log every request at `INFO` with its method, path, matched route, status and latency.
pub fn trace() -> Middleware {
    from_fn(|req: Request<Body>, next: BoxHandler| async move {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let route = current_route(&req).map(|r| r.pattern().to_owned());

        let start = Instant::now();
        let resp = next.handle(req).await;

        info!(
            %method,
            %path,
            route = route.as_deref().unwrap_or("-"),
            status = resp.status().as_u16(),
            elapsed = ?start.elapsed(),
            "handled request"
        );

        resp
    })
}

/// Set a response header to `value` unless the handler already set it.
pub fn default_header(name: HeaderName, value: HeaderValue) -> Middleware {
    from_fn(move |req, next: BoxHandler| {
        let (name, value) = (name.clone(), value.clone());

        async move {
            let mut resp = next.handle(req).await;
            resp.headers_mut().entry(name).or_insert(value);
            resp
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use hyper::{header::CACHE_CONTROL, StatusCode};

    fn wrap(mw: &Middleware, h: impl Handler + 'static) -> BoxHandler {
        mw(Arc::new(h))
    }

    #[tokio::test]
    async fn test_from_fn_can_short_circuit() {
        let deny = from_fn(|_: Request<Body>, _: BoxHandler| async { StatusCode::FORBIDDEN });
        let h = wrap(&deny, handler_fn(|_| async { "secret" }));

        let resp = h.handle(Request::new(Body::empty())).await;
        assert_eq!(StatusCode::FORBIDDEN, resp.status());
    }

    #[tokio::test]
    async fn test_default_header() {
        let mw = default_header(CACHE_CONTROL, HeaderValue::from_static("no-store"));

        let h = wrap(&mw, handler_fn(|_| async { "plain" }));
        let resp = h.handle(Request::new(Body::empty())).await;
        assert_eq!("no-store", resp.headers()[CACHE_CONTROL]);

        let h = wrap(
            &mw,
            handler_fn(|_| async {
                let mut resp = "cached".into_response();
                (resp.headers_mut()).insert(CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
                resp
            }),
        );
        let resp = h.handle(Request::new(Body::empty())).await;
        assert_eq!("max-age=60", resp.headers()[CACHE_CONTROL]);
    }

    #[tokio::test]
    async fn test_trace_passes_response_through() {
        let h = wrap(&trace(), handler_fn(|_| async { StatusCode::ACCEPTED }));

        let resp = h.handle(Request::new(Body::empty())).await;
        assert_eq!(StatusCode::ACCEPTED, resp.status());
    }
}
