//! Middleware layer.
//!
//! A middleware receives the request and a [`Next`] that runs the rest of the
//! chain. It may act before calling `next`, after it, or instead of it:
//!
//! ```rust
//! use gantry::middleware::Next;
//! use gantry::{HandlerResult, Request};
//!
//! async fn timing(req: Request, next: Next) -> HandlerResult {
//!     let start = std::time::Instant::now();
//!     let result = next.run(req).await;
//!     tracing::debug!(elapsed = ?start.elapsed(), "handled");
//!     result
//! }
//! ```
//!
//! Built-in middleware, in the order the server installs them:
//!
//! 1. [`recover`] — turns panics into `500` errors
//! 2. [`request_id`] — establishes the `X-Request-ID` correlation ID
//! 3. [`logger`] — one structured access-log record per request
//! 4. [`cors`] — cross-origin policy, when enabled
//!
//! User middleware added with [`Server::add_middleware`](crate::Server::add_middleware)
//! runs inside those, and per-route middleware inside that.

pub mod cors;
pub mod logger;
pub mod recover;
pub mod request_id;

use std::future::Future;
use std::sync::Arc;

use http::HeaderMap;
use http::header::VARY;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, HandlerResult};
use crate::request::Request;

/// A request/response interceptor.
///
/// Implemented automatically for any `async fn(Request, Next) -> HandlerResult`.
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, req: Request, next: Next) -> BoxFuture<HandlerResult>;
}

impl<F, Fut> Middleware for F
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, req: Request, next: Next) -> BoxFuture<HandlerResult> {
        Box::pin((self)(req, next))
    }
}

/// A middleware shared across concurrent requests.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// The remainder of a middleware chain, ending in a handler.
#[derive(Clone)]
pub struct Next {
    stack: Arc<[BoxedMiddleware]>,
    index: usize,
    endpoint: BoxedHandler,
}

impl Next {
    pub(crate) fn new(stack: Arc<[BoxedMiddleware]>, endpoint: BoxedHandler) -> Self {
        Self { stack, index: 0, endpoint }
    }

    /// Runs the next middleware, or the handler once the stack is exhausted.
    pub fn run(self, req: Request) -> BoxFuture<HandlerResult> {
        match self.stack.get(self.index) {
            Some(middleware) => {
                let middleware = Arc::clone(middleware);
                let next = Self { index: self.index + 1, ..self };
                middleware.call(req, next)
            }
            None => self.endpoint.call(req),
        }
    }
}

/// A handler wrapped in its own middleware; what a route table entry calls.
pub(crate) struct Chain {
    stack: Arc<[BoxedMiddleware]>,
    endpoint: BoxedHandler,
}

impl Chain {
    pub(crate) fn wrap(middlewares: Vec<BoxedMiddleware>, endpoint: BoxedHandler) -> BoxedHandler {
        if middlewares.is_empty() {
            return endpoint;
        }
        Arc::new(Self { stack: middlewares.into(), endpoint })
    }
}

impl ErasedHandler for Chain {
    fn call(&self, req: Request) -> BoxFuture<HandlerResult> {
        Next::new(Arc::clone(&self.stack), Arc::clone(&self.endpoint)).run(req)
    }
}

/// Copies `headers` onto whichever side of the result came back, so error
/// responses carry them too.
///
/// Headers already set downstream are replaced, except `Vary`: its values are
/// a list, so new ones are appended and duplicates skipped.
pub(crate) fn with_headers(result: HandlerResult, headers: &HeaderMap) -> HandlerResult {
    fn merge(target: &mut HeaderMap, headers: &HeaderMap) {
        for name in headers.keys() {
            if name != VARY {
                target.remove(name);
            }
        }
        for (name, value) in headers {
            if name == VARY && target.get_all(VARY).iter().any(|v| v == value) {
                continue;
            }
            target.append(name.clone(), value.clone());
        }
    }

    match result {
        Ok(mut res) => {
            merge(res.headers_mut(), headers);
            Ok(res)
        }
        Err(mut err) => {
            merge(err.headers_mut(), headers);
            Err(err)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers for driving middleware without a server.

    use bytes::Bytes;
    use http_body_util::Full;

    use super::*;
    use crate::handler::Handler;

    pub(crate) fn request(method: &str, uri: &str, body: &'static str) -> Request {
        let req = http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap();
        Request::new(req)
    }

    pub(crate) fn run(
        stack: Vec<BoxedMiddleware>,
        handler: impl Handler,
        req: Request,
    ) -> BoxFuture<HandlerResult> {
        Next::new(stack.into(), handler.into_boxed_handler()).run(req)
    }
}
