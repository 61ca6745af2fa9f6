//! Request scoped routing state.
//!
//! After a request matches, the dispatcher stores its captured [Params] and matched [Route]
//! in the request's extensions. Handlers and middleware read them back with [params] and
//! [current_route], without matching the path again.
use http::Request;
use serde::Serialize;
use std::{collections::HashMap, fmt, ops::Index, sync::Arc};

/// Path parameters captured while matching a request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Params {
    inner: HashMap<String, String>,
}

impl Params {
    /// Returns the value captured for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(name).map(String::as_str)
    }

    /// Whether a value was captured for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate over `(name, value)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        (self.inner.iter()).map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub(crate) fn insert(&mut self, name: String, value: String) {
        self.inner.insert(name, value);
    }
}

impl Index<&str> for Params {
    type Output = str;

    /// # Panics
    /// This panics if nothing was captured for `name`.
    fn index(&self, name: &str) -> &str {
        match self.get(name) {
            Some(v) => v,
            None => panic!("no param named {:?}", name),
        }
    }
}

impl IntoIterator for Params {
    type Item = (String, String);
    type IntoIter = std::collections::hash_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

/// The identity of a registered route: the terminal node a request resolved to.
///
/// Two lookups resolve to the same route if and only if their routes compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Route {
    id: usize,
    pattern: Arc<str>,
}

impl Route {
    pub(crate) fn new(id: usize, pattern: String) -> Self {
        let pattern = pattern.into();
        Self { id, pattern }
    }

    /// A number unique to this route within its route table.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The normalized pattern this route was first registered with.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// Returns the path parameters captured for `req`, if it was dispatched to a route.
///
/// ```
/// use hyper::{Body, Request};
/// use muxtree::{handler_fn, params, App};
///
/// async fn hello(req: Request<Body>) -> String {
///     let name = params(&req).and_then(|ps| ps.get("name")).unwrap_or("stranger");
///     format!("hello, {}", name)
/// }
///
/// let mut app = App::new();
/// app.get("/hello/{name}", handler_fn(hello)).unwrap();
/// ```
pub fn params<B>(req: &Request<B>) -> Option<&Params> {
    req.extensions().get()
}

/// Returns the route `req` was dispatched to, if any.
///
/// This is also set when the route matched but the method did not, so a custom
/// method-not-allowed responder can tell which route was hit.
pub fn current_route<B>(req: &Request<B>) -> Option<&Route> {
    req.extensions().get()
}

/// Returns the methods registered on the route `req` hit, if it was rejected with
/// `405 Method Not Allowed`.
pub fn allowed_methods<B>(req: &Request<B>) -> Option<&[String]> {
    (req.extensions().get::<Allowed>()).map(|a| a.0.as_slice())
}

#[derive(Clone, Debug)]
struct Allowed(Vec<String>);

pub(crate) fn inject<B>(req: &mut Request<B>, route: Route, params: Option<Params>) {
    let ext = req.extensions_mut();
    ext.insert(route);
    if let Some(params) = params {
        ext.insert(params);
    }
}

pub(crate) fn inject_allowed<B>(req: &mut Request<B>, route: Route, allowed: Vec<String>) {
    let ext = req.extensions_mut();
    ext.insert(route);
    ext.insert(Allowed(allowed));
}
