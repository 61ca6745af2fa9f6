//! A route table that accepts registrations while serving.
//!
//! Readers load the current table without locking. A registration copies the table, inserts
//! into the copy and publishes it, so a request in flight keeps the table it started with and
//! never observes a half applied registration. Registrations are serialized among themselves.
use super::{
    handler::{BoxHandler, Handler},
    mw::Middleware,
    service::{Dispatch, MakeAppService},
    test::Client,
    tree::{Lookup, RouteError, Tree},
    Responders, Response, Route,
};
use arc_swap::ArcSwap;
use futures::future::BoxFuture;
use hyper::{Body, Request};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// An app whose routes can change while it serves requests. See [App::into_live].
///
/// [App::into_live]: super::App::into_live
pub struct LiveApp {
    tree: ArcSwap<Tree<BoxHandler>>,
    writer: Mutex<()>,
    responders: Responders,
}

impl LiveApp {
    pub(crate) fn new(tree: Tree<BoxHandler>, responders: Responders) -> Self {
        Self {
            tree: ArcSwap::from_pointee(tree),
            writer: Mutex::new(()),
            responders,
        }
    }

    /// Register `handler` for `method` on `pattern`, with `middlewares` attached to the route.
    ///
    /// Requests dispatched after this returns see the new route. A failed registration leaves
    /// the published table as it was.
    pub fn register<H, I>(
        &self,
        method: &str,
        pattern: &str,
        handler: H,
        middlewares: I,
    ) -> Result<Route, RouteError>
    where
        H: Handler + 'static,
        I: IntoIterator<Item = Middleware>,
    {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = Tree::clone(&self.tree.load_full());
        let route = next.insert(method, pattern, Arc::new(handler), middlewares)?;
        self.tree.store(Arc::new(next));

        debug!(routes = self.routes(), "published route table");
        Ok(route)
    }

    /// The number of distinct routes in the current table.
    pub fn routes(&self) -> usize {
        self.tree.load().len()
    }

    /// A snapshot of the current table.
    pub fn snapshot(&self) -> Arc<Tree<BoxHandler>> {
        self.tree.load_full()
    }

    /// Find the route for `method` and `path` in the current table.
    pub fn lookup(&self, method: &str, path: &str) -> Lookup<BoxHandler> {
        self.tree.load().lookup(method, path)
    }

    /// Route `req` through the current table and run its handler.
    pub fn dispatch(&self, req: Request<Body>) -> BoxFuture<'static, Response> {
        let tree = self.tree.load();
        self.responders.dispatch(&tree, req)
    }

    /// Returns a hyper make service sharing this app.
    pub fn make_service(self: &Arc<Self>) -> MakeAppService<Self> {
        MakeAppService::new(self.clone())
    }

    /// Returns a test client sharing this app.
    pub fn test_client(self: &Arc<Self>) -> Client<Self> {
        Client::new(self.clone())
    }
}

impl Dispatch for LiveApp {
    #[inline]
    fn dispatch(&self, req: Request<Body>) -> BoxFuture<'static, Response> {
        LiveApp::dispatch(self, req)
    }
}
