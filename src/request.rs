//! Incoming HTTP request type.
//!
//! The body is kept as a stream until someone asks for it. Reading it with
//! [`Request::read_body`] consumes it; middleware that wants to look at the
//! bytes without stealing them from the handler puts them back with
//! [`Request::set_body`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HOST, USER_AGENT};
use http::{Extensions, HeaderMap, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};

use crate::error::{BoxError, Error};
use crate::middleware::request_id::RequestId;

/// Type-erased request body.
pub type Body = UnsyncBoxBody<Bytes, BoxError>;

/// An incoming HTTP request.
pub struct Request {
    pub(crate) head: http::request::Parts,
    pub(crate) body: Body,
    pub(crate) params: HashMap<String, String>,
    pub(crate) route: Option<Arc<str>>,
    pub(crate) remote_addr: Option<SocketAddr>,
}

impl Request {
    /// Wraps any `http::Request` whose body yields [`Bytes`].
    ///
    /// The server does this for every connection; tests do it to drive the
    /// pipeline without a socket.
    pub fn new<B>(req: http::Request<B>) -> Self
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (head, body) = req.into_parts();
        Self {
            head,
            body: body.map_err(Into::<BoxError>::into).boxed_unsync(),
            params: HashMap::new(),
            route: None,
            remote_addr: None,
        }
    }

    pub fn method(&self) -> &http::Method { &self.head.method }
    pub fn uri(&self) -> &Uri { &self.head.uri }
    pub fn path(&self) -> &str { self.head.uri.path() }
    pub fn query(&self) -> Option<&str> { self.head.uri.query() }
    pub fn headers(&self) -> &HeaderMap { &self.head.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.head.headers }
    pub fn extensions(&self) -> &Extensions { &self.head.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.head.extensions }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Path plus raw query string, exactly as requested.
    pub fn path_and_query(&self) -> &str {
        self.head.uri.path_and_query().map_or("/", |pq| pq.as_str())
    }

    /// Header lookup. `None` when missing or not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The route pattern that matched (`/users/{id}`), not the concrete path.
    pub fn matched_path(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// The correlation ID assigned by the request-id middleware.
    pub fn request_id(&self) -> Option<&str> {
        self.head.extensions.get::<RequestId>().map(RequestId::as_str)
    }

    /// `Host` header, falling back to the URI authority (HTTP/2).
    pub fn host(&self) -> &str {
        self.header(HOST.as_str())
            .or_else(|| self.head.uri.authority().map(|a| a.as_str()))
            .unwrap_or_default()
    }

    pub fn user_agent(&self) -> &str {
        self.header(USER_AGENT.as_str()).unwrap_or_default()
    }

    /// Best guess at the originating client.
    ///
    /// First hop of `X-Forwarded-For`, then `X-Real-IP`, then the peer
    /// address of the TCP connection.
    pub fn client_ip(&self) -> String {
        if let Some(forwarded) = self.header("x-forwarded-for") {
            if let Some(first) = forwarded.split(',').next().map(str::trim) {
                if !first.is_empty() {
                    return first.to_owned();
                }
            }
        }
        if let Some(real) = self.header("x-real-ip").map(str::trim) {
            if !real.is_empty() {
                return real.to_owned();
            }
        }
        self.remote_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default()
    }

    /// Reads the whole body. The request is left with an empty body.
    pub async fn read_body(&mut self) -> Result<Bytes, Error> {
        let body = std::mem::replace(&mut self.body, empty_body());
        let collected = body.collect().await.map_err(Error::Body)?;
        Ok(collected.to_bytes())
    }

    /// Replaces the body with the given bytes, unread.
    pub fn set_body(&mut self, bytes: Bytes) {
        self.body = Full::new(bytes).map_err(|never| match never {}).boxed_unsync();
    }
}

fn empty_body() -> Body {
    Empty::new().map_err(|never| match never {}).boxed_unsync()
}
