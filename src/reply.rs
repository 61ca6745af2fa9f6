//! Helpers for replying to requests.
use super::{handler::Handler, params::params, Response};
use futures::future::{BoxFuture, FutureExt};
use headers::{ContentType, Header, HeaderMapExt};
use http::{request::Parts, HeaderValue, StatusCode};
use hyper::{header::X_CONTENT_TYPE_OPTIONS, Body, Request};
use hyper_staticfile::{resolve_path, ResponseBuilder};
use mime::Mime;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use std::{borrow::Cow, convert::Infallible, io, path::PathBuf};
use thiserror::Error;
use tracing::{error, warn};

/// A type that can be converted into an http [Response].
pub trait Reply: Sized + Send {
    /// Perform the conversion.
    fn into_response(self) -> Response;

    /// Change the status code to `code`.
    ///
    /// ```
    /// use hyper::StatusCode;
    /// use muxtree::{reply::Reply, Response};
    ///
    /// let _: Response = "some message" //
    ///     .with_status(StatusCode::OK);
    /// ```
    #[inline]
    fn with_status(self, code: StatusCode) -> Response {
        let mut resp = self.into_response();
        *resp.status_mut() = code;
        resp
    }

    /// Include a typed `header` in the response.
    ///
    /// ```
    /// use headers::ContentType;
    /// use muxtree::{reply::Reply, Response};
    ///
    /// let _: Response = "some message" //
    ///     .with_header(ContentType::text());
    /// ```
    #[inline]
    fn with_header<H: Header>(self, header: H) -> Response {
        let mut resp = self.into_response();
        resp.headers_mut().typed_insert(header);
        resp
    }
}

impl Reply for Response {
    #[inline]
    fn into_response(self) -> Response {
        self
    }

    #[inline]
    fn with_status(mut self, code: StatusCode) -> Response {
        *self.status_mut() = code;
        self
    }

    #[inline]
    fn with_header<H: Header>(mut self, header: H) -> Response {
        self.headers_mut().typed_insert(header);
        self
    }
}

impl<R: Reply, E: Reply> Reply for Result<R, E> {
    #[inline]
    fn into_response(self) -> Response {
        self.map_or_else(E::into_response, R::into_response)
    }
}

impl Reply for Infallible {
    #[inline]
    fn into_response(self) -> Response {
        match self {}
    }
}

impl<T: Reply> Reply for Box<T> {
    #[inline]
    fn into_response(self) -> Response {
        (*self).into_response()
    }
}

impl Reply for Cow<'static, str> {
    #[inline]
    fn into_response(self) -> Response {
        match self {
            Cow::Borrowed(s) => s.into_response(),
            Cow::Owned(s) => s.into_response(),
        }
    }
}

/// Replies with the status code and its canonical reason as the body.
impl Reply for StatusCode {
    #[inline]
    fn into_response(self) -> Response {
        (self.canonical_reason().unwrap_or_default()).with_status(self)
    }
}

fn with_content_type(body: Body, mime: Mime) -> Response {
    let mut resp = hyper::Response::new(body);
    let h = resp.headers_mut();
    h.typed_insert(ContentType::from(mime));
    h.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    resp
}

macro_rules! content_type {
    ($mime:path; $( $re_type:ty ),+ $(,)?) => {
        $(impl Reply for $re_type {
            #[inline]
            fn into_response(self) -> Response {
                with_content_type(self.into(), $mime)
            }
        })+
    };
}

content_type! { mime::TEXT_PLAIN_UTF_8;
    String,
    &'static str,
}

content_type! { mime::APPLICATION_OCTET_STREAM;
    Vec<u8>,
    &'static [u8],
}

/// Returns a json [Response] from an arbitrary serializable value.
///
/// If `value` fails to serialize, the response is a `500 Internal Server Error`.
pub fn json<T: Serialize + ?Sized>(value: &T) -> Response {
    match serde_json::to_string(value) {
        Ok(ser) => with_content_type(ser.into(), mime::APPLICATION_JSON),
        Err(e) => {
            error!(error = %e, "failed to serialize json reply");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// A filesystem error.
#[derive(Debug, Error)]
pub enum FsError {
    /// An IO error.
    #[error("io error: {}", .0)]
    Io(#[from] io::Error),

    /// An HTTP error.
    #[error("http error: {}", .0)]
    Http(#[from] http::Error),
}

impl Reply for FsError {
    #[inline]
    fn into_response(self) -> Response {
        warn!(error = %self, "failed to serve file");
        "500 internal server error".with_status(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Escaped in a captured path before it is resolved. Params are already decoded, and the
/// resolver decodes its input once more.
const CAPTURED_PATH: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'#').add(b'%').add(b'?');

/// Serve files from the filesystem. See [filesystem].
#[derive(Clone, Debug)]
pub struct Files {
    root: PathBuf,
    param: Option<String>,
}

impl Files {
    /// Serve the value captured by the path parameter `name` instead of the full request path.
    ///
    /// If the request has no such parameter, the full request path is used.
    pub fn param(mut self, name: &str) -> Self {
        self.param = Some(name.to_owned());
        self
    }

    fn request_path<B>(&self, req: &Request<B>) -> String {
        let captured = (self.param.as_deref())
            .and_then(|name| params(req).and_then(|ps| ps.get(name)))
            .map(|p| format!("/{}", utf8_percent_encode(p, CAPTURED_PATH)));

        captured.unwrap_or_else(|| req.uri().path().to_owned())
    }
}

impl Handler for Files {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'static, Response> {
        let path = self.request_path(&req);
        let (parts, _) = req.into_parts();

        fs_inner(self.root.clone(), path, parts)
            .map(Reply::into_response)
            .boxed()
    }
}

/// Handle a request by serving a file from the filesystem. The file path to be served will be
/// the request uri path appended to `root`, or a captured path parameter if [Files::param] is
/// set.
///
/// # Examples
/// ```
/// use muxtree::{reply, App};
///
/// let mut app = App::new();
/// app.not_found(reply::filesystem("/srv"));
/// app.get("/a/whatever.jpg", reply::filesystem("/srv")).unwrap();
/// app.get("/b/*extra", reply::filesystem("/opt").param("extra"))
///     .unwrap();
/// ```
pub fn filesystem<P: Into<PathBuf>>(root: P) -> Files {
    Files {
        root: root.into(),
        param: None,
    }
}

async fn fs_inner(root: PathBuf, path: String, parts: Parts) -> Result<Response, FsError> {
    let resolved = resolve_path(root, &path).await?;

    ResponseBuilder::new()
        .request_parts(&parts.method, &parts.uri, &parts.headers)
        .build(resolved)
        .map_err(|e| e.into())
}
