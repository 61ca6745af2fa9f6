//! Compressing route trie based on [httprouter], split at segment boundaries.
//!
//! Every `/`-delimited segment boundary is a [Node]. Static segments hanging off a node are
//! stored as radix edges: an edge is split on the first byte where a new segment diverges
//! from its label, so sibling edges never share a first byte. Edges never span a `/`, which
//! lets each boundary node carry (at most) one parameter child and one catch-all child next
//! to its static edges.
//!
//! # Pattern syntax
//! ```text
//! /static/{name}/{id:[0-9]+}/:other/*rest
//! ```
//!
//! * `{name}` or `:name` captures exactly one segment.
//! * `{name:regex}` captures one segment that must fully match `regex`.
//! * `*name` or `{*name}` captures one or more trailing segments, joined by `/`. It must be
//!   the last segment of a pattern.
//!
//! Empty segments are ignored, so `/a//b/` and `/a/b` are the same pattern.
//!
//! # Lookup
//! Lookup never backtracks. At each node a static edge is tried first, then the parameter
//! child, then the catch-all child. A parameter whose regex rejects the segment ends the
//! lookup right there, even if a catch-all sibling exists.
//!
//! [httprouter]: https://github.com/julienschmidt/httprouter
use super::params::{Params, Route};
use dashmap::{mapref::entry::Entry, DashMap};
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::{borrow::Cow, cmp, collections::HashMap, fmt, mem, sync::Arc};
use thiserror::Error;
use tracing::{debug, trace};

/// The method key that matches any method without an explicit registration.
pub const ANY_METHOD: &str = "*";

/// A function that wraps a handler to produce another handler.
pub type Wrapper<H> = Arc<dyn Fn(H) -> H + Send + Sync>;

/// An error encountered while registering a route.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The method was empty.
    #[error("route registration requires a method")]
    EmptyMethod,

    /// The pattern was empty.
    #[error("route registration requires a pattern")]
    EmptyPattern,

    /// A parameter or catch-all segment has no name.
    #[error("segment {segment:?} in pattern {pattern:?} must have a non-empty name")]
    EmptyName { pattern: String, segment: String },

    /// A catch-all segment is followed by more segments.
    #[error("wildcard {segment:?} must be the last segment in pattern {pattern:?}")]
    WildcardNotLast { pattern: String, segment: String },

    /// A parameter conflicts with a differently named or constrained parameter at the same
    /// position.
    #[error("param {new:?} in pattern {pattern:?} conflicts with existing param {existing:?}")]
    ConflictingParam {
        pattern: String,
        existing: String,
        new: String,
    },

    /// A catch-all conflicts with a differently named catch-all at the same position.
    #[error("wildcard {new:?} in pattern {pattern:?} conflicts with existing wildcard {existing:?}")]
    ConflictingWildcard {
        pattern: String,
        existing: String,
        new: String,
    },

    /// A parameter constraint failed to compile.
    #[error("invalid regex {regex:?} in pattern {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        regex: String,
        #[source]
        source: regex::Error,
    },
}

/// A cache of compiled parameter constraints, keyed by their source text.
///
/// Each constraint compiles at most once; concurrent callers asking for the same source
/// serialize on the entry and share the result.
#[derive(Debug, Default)]
pub struct RegexCache {
    compiled: DashMap<String, Regex>,
}

impl RegexCache {
    /// Returns the anchored regex for `source`, compiling it on first use.
    pub fn get_or_compile(&self, source: &str) -> Result<Regex, regex::Error> {
        if let Some(re) = self.compiled.get(source) {
            return Ok(re.clone());
        }

        match self.compiled.entry(source.to_owned()) {
            Entry::Occupied(e) => Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let re = Regex::new(&format!("^(?:{})$", source))?;
                e.insert(re.clone());
                Ok(re)
            }
        }
    }

    /// The number of distinct constraints compiled so far.
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    /// Whether nothing has been compiled yet.
    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

/// The outcome of a [Tree::lookup].
#[derive(Debug)]
pub enum Lookup<H> {
    /// No registered pattern matches the path.
    NotFound,

    /// A pattern matches the path, but has no handler for the method.
    MethodNotSupported {
        /// The matched route.
        route: Route,
        /// Methods registered on the matched route, sorted.
        allowed: Vec<String>,
    },

    /// A pattern and handler matched.
    Matched(Match<H>),
}

impl<H> Lookup<H> {
    /// Returns the match, if any.
    pub fn matched(self) -> Option<Match<H>> {
        match self {
            Lookup::Matched(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the matched route, regardless of whether a handler was resolved.
    pub fn route(&self) -> Option<&Route> {
        match self {
            Lookup::NotFound => None,
            Lookup::MethodNotSupported { route, .. } => Some(route),
            Lookup::Matched(m) => Some(&m.route),
        }
    }
}

/// A successful lookup.
///
/// Everything in here is owned and specific to one lookup; nothing is shared with the tree.
#[derive(Debug)]
pub struct Match<H> {
    /// The matched route.
    pub route: Route,
    /// Captured path parameters.
    pub params: Params,
    /// The resolved handler, wrapped by the route's middleware.
    pub handler: H,
}

/// A route table.
#[derive(Clone)]
pub struct Tree<H> {
    root: Node<H>,
    regexes: Arc<RegexCache>,
    routes: usize,
}

impl<H> Default for Tree<H> {
    fn default() -> Self {
        Self::with_cache(Arc::default())
    }
}

impl<H> fmt::Debug for Tree<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("routes", &self.routes)
            .field("regexes", &self.regexes.len())
            .finish()
    }
}

impl<H> Tree<H> {
    /// Creates an empty tree with its own regex cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty tree that compiles constraints through `regexes`.
    pub fn with_cache(regexes: Arc<RegexCache>) -> Self {
        Self {
            root: Node::default(),
            regexes,
            routes: 0,
        }
    }

    /// The number of distinct routes (terminal nodes) in this tree.
    pub fn len(&self) -> usize {
        self.routes
    }

    /// Whether no route has been registered.
    pub fn is_empty(&self) -> bool {
        self.routes == 0
    }

    /// The regex cache used by this tree.
    pub fn regexes(&self) -> &Arc<RegexCache> {
        &self.regexes
    }

    /// Register `handler` for `method` on `pattern`, and append `middlewares` to the route.
    ///
    /// `method` is upper-cased; [ANY_METHOD] registers a fallback for every method. A second
    /// registration of the same method replaces the handler, while middleware always
    /// accumulates.
    ///
    /// Registration either fails before touching the tree or succeeds entirely.
    pub fn insert<I>(
        &mut self,
        method: &str,
        pattern: &str,
        handler: H,
        middlewares: I,
    ) -> Result<Route, RouteError>
    where
        I: IntoIterator<Item = Wrapper<H>>,
    {
        if method.is_empty() {
            return Err(RouteError::EmptyMethod);
        }
        if pattern.is_empty() {
            return Err(RouteError::EmptyPattern);
        }

        let segs = self.parse_pattern(pattern)?;

        let mut n = &mut self.root;
        for seg in segs.iter() {
            n = match seg {
                Segment::Static(text) => n.statics.insert(text.as_bytes()),

                Segment::Param(name, constraint) => {
                    let source = constraint.as_ref().map(|c| c.source.as_str());

                    if let Some(p) = &n.param {
                        if p.name != *name || p.constraint_source() != source {
                            return Err(RouteError::ConflictingParam {
                                pattern: pattern.into(),
                                existing: p.to_string(),
                                new: seg.to_string(),
                            });
                        }
                    }

                    let p = n.param.get_or_insert_with(|| {
                        Box::new(ParamChild {
                            name: (*name).into(),
                            constraint: constraint.clone(),
                            node: Node::default(),
                        })
                    });
                    &mut p.node
                }

                Segment::CatchAll(name) => {
                    if let Some(w) = &n.wildcard {
                        if w.name != *name {
                            return Err(RouteError::ConflictingWildcard {
                                pattern: pattern.into(),
                                existing: format!("*{}", w.name),
                                new: seg.to_string(),
                            });
                        }
                    }

                    let w = n.wildcard.get_or_insert_with(|| {
                        Box::new(WildChild {
                            name: (*name).into(),
                            node: Node::default(),
                        })
                    });
                    &mut w.node
                }
            };
        }

        let id = self.routes;
        let route = (n.route)
            .get_or_insert_with(|| Route::new(id, normalize(&segs)))
            .clone();
        if route.id() == id {
            self.routes += 1;
        }

        let method = method.to_ascii_uppercase();
        n.middlewares.extend(middlewares);
        n.methods.insert(method.clone(), handler);

        debug!(%method, pattern = route.pattern(), id = route.id(), "registered route");

        Ok(route)
    }

    fn parse_pattern<'p>(&self, pattern: &'p str) -> Result<Vec<Segment<'p>>, RouteError> {
        let raw: Vec<&str> = split(pattern).collect();
        let last = raw.len().saturating_sub(1);

        let mut segs = Vec::with_capacity(raw.len());
        for (i, text) in raw.into_iter().enumerate() {
            let seg = match classify(text) {
                Kind::Static => Segment::Static(text),

                Kind::Param("", _) | Kind::CatchAll("") => {
                    return Err(RouteError::EmptyName {
                        pattern: pattern.into(),
                        segment: text.into(),
                    });
                }

                Kind::CatchAll(_) if i != last => {
                    return Err(RouteError::WildcardNotLast {
                        pattern: pattern.into(),
                        segment: text.into(),
                    });
                }

                Kind::CatchAll(name) => Segment::CatchAll(name),

                Kind::Param(name, None) | Kind::Param(name, Some("")) => Segment::Param(name, None),

                Kind::Param(name, Some(source)) => {
                    let re = (self.regexes.get_or_compile(source)).map_err(|source_err| {
                        RouteError::InvalidRegex {
                            pattern: pattern.into(),
                            regex: source.into(),
                            source: source_err,
                        }
                    })?;
                    let source = source.into();
                    Segment::Param(name, Some(Constraint { source, re }))
                }
            };

            segs.push(seg);
        }

        Ok(segs)
    }
}

impl<H: Clone> Tree<H> {
    /// Find the route for `method` and `path`.
    ///
    /// Path segments are percent-decoded before matching, and captured values are stored
    /// decoded.
    pub fn lookup(&self, method: &str, path: &str) -> Lookup<H> {
        let segs: Vec<Cow<'_, str>> = (split(path))
            .map(|s| percent_decode_str(s).decode_utf8_lossy())
            .collect();

        let mut params = Params::default();
        let mut n = &self.root;
        let mut i = 0;

        while i < segs.len() {
            let seg = &segs[i];

            if let Some(next) = n.statics.find(seg.as_bytes()) {
                n = next;
                i += 1;
                continue;
            }

            if let Some(p) = &n.param {
                if !p.accepts(seg) {
                    trace!(method, path, param = %p, "constraint rejected segment");
                    return Lookup::NotFound;
                }
                params.insert(p.name.clone(), seg.clone().into_owned());
                n = &p.node;
                i += 1;
                continue;
            }

            if let Some(w) = &n.wildcard {
                params.insert(w.name.clone(), segs[i..].join("/"));
                n = &w.node;
                break;
            }

            trace!(method, path, "no route");
            return Lookup::NotFound;
        }

        let route = match &n.route {
            Some(route) => route.clone(),
            None => {
                trace!(method, path, "no route");
                return Lookup::NotFound;
            }
        };

        let handler = match (n.methods.get(method)).or_else(|| n.methods.get(ANY_METHOD)) {
            Some(h) => h.clone(),
            None => {
                trace!(method, path, route = route.pattern(), "method not supported");
                let allowed = n.allowed();
                return Lookup::MethodNotSupported { route, allowed };
            }
        };

        // the first registered middleware ends up outermost
        let handler = (n.middlewares.iter())
            .rev()
            .fold(handler, |handler, wrap| wrap(handler));

        trace!(method, path, route = route.pattern(), "matched");
        Lookup::Matched(Match {
            route,
            params,
            handler,
        })
    }
}

#[derive(Clone)]
struct Node<H> {
    statics: Edges<H>,
    param: Option<Box<ParamChild<H>>>,
    wildcard: Option<Box<WildChild<H>>>,
    methods: HashMap<String, H>,
    middlewares: Vec<Wrapper<H>>,
    route: Option<Route>,
}

impl<H> Default for Node<H> {
    fn default() -> Self {
        Self {
            statics: Edges::default(),
            param: None,
            wildcard: None,
            methods: HashMap::new(),
            middlewares: vec![],
            route: None,
        }
    }
}

impl<H> Node<H> {
    fn allowed(&self) -> Vec<String> {
        let mut allowed: Vec<_> = self.methods.keys().cloned().collect();
        allowed.sort();
        allowed
    }
}

/// Sibling radix edges, indexed by their first byte.
#[derive(Clone)]
struct Edges<H> {
    indices: Vec<u8>,
    children: Vec<Edge<H>>,
}

impl<H> Default for Edges<H> {
    fn default() -> Self {
        Self {
            indices: vec![],
            children: vec![],
        }
    }
}

#[derive(Clone)]
struct Edge<H> {
    label: Vec<u8>,
    edges: Edges<H>,
    // set if a whole segment ends at this edge
    next: Option<Box<Node<H>>>,
}

impl<H> Edges<H> {
    /// Returns the boundary node for the (non-empty) segment `text`, creating it and
    /// splitting edges as needed.
    fn insert(&mut self, text: &[u8]) -> &mut Node<H> {
        let first = text[0];

        match self.indices.iter().position(|&c| c == first) {
            Some(pos) => self.children[pos].insert(text),

            None => {
                self.indices.push(first);
                self.children.push(Edge {
                    label: text.to_vec(),
                    edges: Edges::default(),
                    next: None,
                });
                let pos = self.children.len() - 1;
                self.children[pos].next.get_or_insert_with(Box::default)
            }
        }
    }

    /// Returns the boundary node reached by consuming exactly `text`.
    fn find(&self, mut text: &[u8]) -> Option<&Node<H>> {
        let mut edges = self;

        loop {
            let first = *text.first()?;
            let pos = edges.indices.iter().position(|&c| c == first)?;
            let edge = &edges.children[pos];

            if !text.starts_with(&edge.label) {
                return None;
            }
            text = &text[edge.label.len()..];

            if text.is_empty() {
                return edge.next.as_deref();
            }
            edges = &edge.edges;
        }
    }
}

impl<H> Edge<H> {
    fn insert(&mut self, text: &[u8]) -> &mut Node<H> {
        let i = longest_common_prefix(text, &self.label);

        // split edge
        if i < self.label.len() {
            let child = Edge {
                label: self.label.split_off(i),
                edges: mem::take(&mut self.edges),
                next: self.next.take(),
            };

            self.edges.indices.push(child.label[0]);
            self.edges.children.push(child);
        }

        if i < text.len() {
            return self.edges.insert(&text[i..]);
        }

        self.next.get_or_insert_with(Box::default)
    }
}

#[derive(Clone)]
struct Constraint {
    source: String,
    re: Regex,
}

#[derive(Clone)]
struct ParamChild<H> {
    name: String,
    constraint: Option<Constraint>,
    node: Node<H>,
}

impl<H> ParamChild<H> {
    fn constraint_source(&self) -> Option<&str> {
        self.constraint.as_ref().map(|c| c.source.as_str())
    }

    fn accepts(&self, seg: &str) -> bool {
        (self.constraint.as_ref()).map_or(true, |c| c.re.is_match(seg))
    }
}

impl<H> fmt::Display for ParamChild<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.constraint_source() {
            Some(source) => write!(f, "{{{}:{}}}", self.name, source),
            None => write!(f, "{{{}}}", self.name),
        }
    }
}

#[derive(Clone)]
struct WildChild<H> {
    name: String,
    node: Node<H>,
}

enum Segment<'p> {
    Static(&'p str),
    Param(&'p str, Option<Constraint>),
    CatchAll(&'p str),
}

impl fmt::Display for Segment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Static(text) => write!(f, "{}", text),
            Segment::Param(name, Some(c)) => write!(f, "{{{}:{}}}", name, c.source),
            Segment::Param(name, None) => write!(f, "{{{}}}", name),
            Segment::CatchAll(name) => write!(f, "*{}", name),
        }
    }
}

/// The syntactic kind of a pattern segment.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Kind<'p> {
    Static,
    Param(&'p str, Option<&'p str>),
    CatchAll(&'p str),
}

fn classify(seg: &str) -> Kind<'_> {
    if let Some(inner) = seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        if let Some(name) = inner.strip_prefix('*') {
            return Kind::CatchAll(name);
        }

        // the regex may itself contain ':', so only split on the first one
        return match inner.find(':') {
            Some(i) => Kind::Param(&inner[..i], Some(&inner[i + 1..])),
            None => Kind::Param(inner, None),
        };
    }

    if let Some(name) = seg.strip_prefix(':') {
        return Kind::Param(name, None);
    }

    if let Some(name) = seg.strip_prefix('*') {
        return Kind::CatchAll(name);
    }

    Kind::Static
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn normalize(segs: &[Segment<'_>]) -> String {
    if segs.is_empty() {
        return "/".into();
    }

    segs.iter().map(|s| format!("/{}", s)).collect()
}

fn longest_common_prefix(a: &[u8], b: &[u8]) -> usize {
    let mut i = 0;
    let max = cmp::min(a.len(), b.len());
    while i < max && a[i] == b[i] {
        i += 1;
    }
    i
}
