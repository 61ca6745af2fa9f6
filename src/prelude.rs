//! A prelude designed to be bulk imported for ease of use.
//!
//! ```
//! # #[allow(unused_imports)]
//! use muxtree::prelude::*;
//! ```

#[doc(inline)]
pub use super::{
    current_route, handler_fn, mw, params,
    reply::{self, Reply},
    App, BoxHandler, Handler, Params, Route, RouteError,
};
