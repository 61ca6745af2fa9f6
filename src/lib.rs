//! A trie based request router and dispatcher for [hyper].
//!
//! Routes are registered on an [App] with a pattern, optionally restricted to a set of
//! methods. Patterns are made of `/`-delimited segments, each either static, a named
//! parameter (`{id}`, `:id`, or `{id:[0-9]+}` with a regex constraint), or a trailing
//! catch-all (`*rest`). See [tree] for matching rules.
//!
//! ```no_run
//! use hyper::{Body, Request, Server};
//! use muxtree::{handler_fn, mw, params, reply, App};
//!
//! async fn user(req: Request<Body>) -> String {
//!     format!("user {}", &params(&req).unwrap()["id"])
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let mut app = App::new();
//!     app.with(mw::trace());
//!     app.get("/", handler_fn(|_| async { "index" }))?;
//!
//!     let mut api = app.group("/api");
//!     api.get("/users/{id:[0-9]+}", handler_fn(user))?
//!         .methods(["PUT", "PATCH"])
//!         .handle("/users/{id:[0-9]+}", handler_fn(|_| async { "updated" }))?;
//!
//!     app.get("/static/*path", reply::filesystem("/srv").param("path"))?;
//!
//!     Server::bind(&([127, 0, 0, 1], 8080).into())
//!         .serve(app.into_make_service())
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! Once serving, an [App] is immutable. To keep registering routes while requests are in
//! flight, convert it with [App::into_live].
use futures::future::{ready, BoxFuture, FutureExt};
use hyper::{Body, Request};
use std::{
    mem,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tracing::error;

pub mod handler;
pub mod live;
pub mod mw;
pub mod params;
pub mod prelude;
pub mod reply;
pub mod service;
pub mod tree;

#[doc(inline)]
pub use handler::{handler_fn, BoxHandler, Handler, HandlerFault, Recover};
#[doc(inline)]
pub use live::LiveApp;
#[doc(inline)]
pub use mw::Middleware;
#[doc(inline)]
pub use params::{allowed_methods, current_route, params, Params, Route};
#[doc(inline)]
pub use service::{AppService, Dispatch, MakeAppService};
#[doc(inline)]
pub use tree::{Lookup, RouteError};

use handler::{InternalError, MethodNotAllowed, NotFound};
use tree::{Tree, ANY_METHOD};

/// An http response.
pub type Response = hyper::Response<Body>;

/// The handlers used when routing does not produce a response.
#[derive(Clone)]
pub(crate) struct Responders {
    not_found: BoxHandler,
    method_not_allowed: BoxHandler,
    internal_error: Arc<dyn Recover>,
}

impl Default for Responders {
    fn default() -> Self {
        Self {
            not_found: Arc::new(NotFound),
            method_not_allowed: Arc::new(MethodNotAllowed),
            internal_error: Arc::new(InternalError),
        }
    }
}

impl Responders {
    /// Route `req` through `tree` and run whatever handler it resolves to.
    ///
    /// The returned future does not borrow `tree`, so the table may be swapped out while the
    /// request is in flight.
    pub(crate) fn dispatch(
        &self,
        tree: &Tree<BoxHandler>,
        mut req: Request<Body>,
    ) -> BoxFuture<'static, Response> {
        let handler = match tree.lookup(req.method().as_str(), req.uri().path()) {
            Lookup::NotFound => self.not_found.clone(),

            Lookup::MethodNotSupported { route, allowed } => {
                params::inject_allowed(&mut req, route, allowed);
                self.method_not_allowed.clone()
            }

            Lookup::Matched(m) => {
                params::inject(&mut req, m.route, Some(m.params));
                m.handler
            }
        };

        let recover = self.internal_error.clone();
        let (method, uri) = (req.method().clone(), req.uri().clone());
        let route = params::current_route(&req).cloned();
        let fault = move |payload| HandlerFault::from_panic(payload, method, uri, route);

        // handlers may panic before returning a future, or while it is polled
        let fut = match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(req))) {
            Ok(fut) => fut,
            Err(payload) => return ready(recover_from(&*recover, fault(payload))).boxed(),
        };

        AssertUnwindSafe(fut)
            .catch_unwind()
            .map(move |res| res.unwrap_or_else(|payload| recover_from(&*recover, fault(payload))))
            .boxed()
    }
}

fn recover_from(recover: &dyn Recover, fault: HandlerFault) -> Response {
    error!(%fault, "recovered from handler panic");
    recover.recover(fault)
}

/// Registration state shared by an [App] and its [Group]s.
#[derive(Clone, Default)]
struct Scope {
    prefix: String,
    middlewares: Vec<Middleware>,
    methods: Vec<String>,
}

impl Scope {
    fn child(&self, prefix: &str) -> Self {
        Self {
            prefix: path_join(&self.prefix, prefix),
            middlewares: self.middlewares.clone(),
            methods: Vec::new(),
        }
    }

    /// Wrap `handler` in this scope's middleware, first added outermost.
    fn wrap(&self, handler: BoxHandler) -> BoxHandler {
        (self.middlewares.iter())
            .rev()
            .fold(handler, |handler, wrap| wrap(handler))
    }

    /// Register `handler` on `pattern` for the pending methods.
    ///
    /// The handler is wrapped in this scope's middleware once, and the pending methods are
    /// consumed whether or not registration succeeds.
    fn register(
        &mut self,
        tree: &mut Tree<BoxHandler>,
        pattern: &str,
        handler: BoxHandler,
    ) -> Result<Route, RouteError> {
        let mut methods = mem::take(&mut self.methods);
        if methods.is_empty() {
            methods.push(ANY_METHOD.to_owned());
        }
        if methods.iter().any(String::is_empty) {
            return Err(RouteError::EmptyMethod);
        }

        let pattern = path_join(&self.prefix, pattern);
        let handler = self.wrap(handler);

        let mut route = None;
        for method in methods.iter() {
            route = Some(tree.insert(method, &pattern, handler.clone(), None)?);
        }

        route.ok_or(RouteError::EmptyMethod)
    }
}

/// Join a group prefix and a pattern, resolving `.` and `..` segments.
///
/// A trailing `/` on `pattern` is kept.
fn path_join(prefix: &str, pattern: &str) -> String {
    if pattern.is_empty() {
        return prefix.to_owned();
    }

    let mut segments = Vec::new();
    for seg in prefix.split('/').chain(pattern.split('/')) {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            seg => segments.push(seg),
        }
    }

    let mut joined = format!("/{}", segments.join("/"));
    if pattern.ends_with('/') && !joined.ends_with('/') {
        joined.push('/');
    }
    joined
}

macro_rules! method_routes {
    ($( $name:ident => $method:literal ),+ $(,)?) => {$(
        #[doc = concat!("Register `handler` for `", $method, "` requests to `pattern`.")]
        pub fn $name<H: Handler + 'static>(
            &mut self,
            pattern: &str,
            handler: H,
        ) -> Result<&mut Self, RouteError> {
            self.methods([$method]).handle(pattern, handler)
        }
    )+};
}

macro_rules! scoped_routes {
    () => {
        /// Wrap every route registered on this scope after this call in `mw`.
        ///
        /// Middleware added first runs first. Groups created after this call inherit it;
        /// groups created before do not.
        pub fn with(&mut self, mw: Middleware) -> &mut Self {
            self.parts().1.middlewares.push(mw);
            self
        }

        /// Restrict the next call to [handle][Self::handle] to `methods`.
        ///
        /// Without a call to this, [handle][Self::handle] matches any method.
        pub fn methods<I>(&mut self, methods: I) -> &mut Self
        where
            I: IntoIterator,
            I::Item: AsRef<str>,
        {
            let upper = methods.into_iter().map(|m| m.as_ref().to_ascii_uppercase());
            self.parts().1.methods.extend(upper);
            self
        }

        /// Register `handler` on `pattern`, for the methods set by [methods][Self::methods]
        /// or for any method.
        ///
        /// A later registration of the same method and pattern replaces the handler.
        pub fn handle<H: Handler + 'static>(
            &mut self,
            pattern: &str,
            handler: H,
        ) -> Result<&mut Self, RouteError> {
            let (tree, scope) = self.parts();
            scope.register(tree, pattern, Arc::new(handler))?;
            Ok(self)
        }

        /// Open a group whose patterns are prefixed with `prefix`.
        ///
        /// The group starts with a copy of this scope's middleware. Middleware added to the
        /// group does not affect this scope.
        pub fn group(&mut self, prefix: &str) -> Group<'_> {
            let (tree, scope) = self.parts();
            let scope = scope.child(prefix);
            Group { tree, scope }
        }

        method_routes! {
            get => "GET",
            post => "POST",
            put => "PUT",
            patch => "PATCH",
            delete => "DELETE",
            head => "HEAD",
            options => "OPTIONS",
            any => "*",
        }
    };
}

/// An http request router and dispatcher.
pub struct App {
    tree: Tree<BoxHandler>,
    scope: Scope,
    responders: Responders,
}

impl Default for App {
    fn default() -> Self {
        Self {
            tree: Tree::new(),
            scope: Scope::default(),
            responders: Responders::default(),
        }
    }
}

impl App {
    /// Returns a new [App] with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    fn parts(&mut self) -> (&mut Tree<BoxHandler>, &mut Scope) {
        (&mut self.tree, &mut self.scope)
    }

    scoped_routes! {}

    /// Register `handler` for `method` on `pattern`, with `middlewares` attached to the route
    /// itself.
    ///
    /// The handler is wrapped in the middleware added with [with][App::with] so far. Route
    /// middleware runs outside of that, wraps every method registered on the route, and
    /// accumulates across registrations. Pending [methods][App::methods] are left alone.
    pub fn register<H, I>(
        &mut self,
        method: &str,
        pattern: &str,
        handler: H,
        middlewares: I,
    ) -> Result<Route, RouteError>
    where
        H: Handler + 'static,
        I: IntoIterator<Item = Middleware>,
    {
        let handler = self.scope.wrap(Arc::new(handler));
        self.tree.insert(method, pattern, handler, middlewares)
    }

    /// Set the handler for requests that match no route.
    pub fn not_found<H: Handler + 'static>(&mut self, handler: H) -> &mut Self {
        self.responders.not_found = Arc::new(handler);
        self
    }

    /// Set the handler for requests that match a route, but none of its methods.
    ///
    /// The methods the route does support are available through [allowed_methods].
    pub fn method_not_allowed<H: Handler + 'static>(&mut self, handler: H) -> &mut Self {
        self.responders.method_not_allowed = Arc::new(handler);
        self
    }

    /// Set the responder for handlers that panic.
    pub fn internal_error<R: Recover + 'static>(&mut self, recover: R) -> &mut Self {
        self.responders.internal_error = Arc::new(recover);
        self
    }

    /// The route table.
    pub fn tree(&self) -> &Tree<BoxHandler> {
        &self.tree
    }

    /// Find the route for `method` and `path`, without running anything.
    pub fn lookup(&self, method: &str, path: &str) -> Lookup<BoxHandler> {
        self.tree.lookup(method, path)
    }

    /// Route `req` and run its handler.
    ///
    /// If the handler panics, the panic is contained and answered by the
    /// [internal_error][App::internal_error] responder.
    pub fn dispatch(&self, req: Request<Body>) -> BoxFuture<'static, Response> {
        self.responders.dispatch(&self.tree, req)
    }

    /// Convert this app into a hyper make service.
    ///
    /// ```no_run
    /// # async fn serve() -> hyper::Result<()> {
    /// use muxtree::App;
    ///
    /// hyper::Server::bind(&([127, 0, 0, 1], 8080).into())
    ///     .serve(App::new().into_make_service())
    ///     .await
    /// # }
    /// ```
    pub fn into_make_service(self) -> MakeAppService<Self> {
        MakeAppService::new(Arc::new(self))
    }

    /// Convert this app into one that accepts new routes while serving.
    pub fn into_live(self) -> LiveApp {
        LiveApp::new(self.tree, self.responders)
    }

    /// Returns a test client for this app.
    pub fn test_client(self) -> test::Client<Self> {
        test::Client::new(Arc::new(self))
    }
}

impl Dispatch for App {
    #[inline]
    fn dispatch(&self, req: Request<Body>) -> BoxFuture<'static, Response> {
        App::dispatch(self, req)
    }
}

/// A set of routes sharing a prefix and middleware. See [App::group].
pub struct Group<'a> {
    tree: &'a mut Tree<BoxHandler>,
    scope: Scope,
}

impl Group<'_> {
    fn parts(&mut self) -> (&mut Tree<BoxHandler>, &mut Scope) {
        (&mut *self.tree, &mut self.scope)
    }

    /// The prefix prepended to every pattern in this group.
    pub fn prefix(&self) -> &str {
        &self.scope.prefix
    }

    scoped_routes! {}
}
