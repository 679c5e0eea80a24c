//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The route table holds handlers of *different* types in one map, so each
//! one is hidden behind a trait object (`dyn ErasedHandler`):
//!
//! ```text
//! async fn hello(req: Request) -> Response { … }   ← user writes this
//!        ↓ Endpoint::new("/", hello)
//! hello.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(hello))                       ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! handler.call(req)  at request time               ← one vtable dispatch
//!        ↓
//! Box::pin(async { hello(req).await.into_result() })  ← BoxFuture
//! ```
//!
//! Handlers and middleware share one currency: [`HandlerResult`]. A handler
//! that fails returns `Err(HttpError)`, middleware sees the error on the way
//! back out, and only the server turns it into bytes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::StatusCode;

use crate::error::HttpError;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// What every handler and middleware resolves to.
pub type HandlerResult = Result<Response, HttpError>;

/// A heap-allocated, type-erased future.
///
/// `Send + 'static` let tokio move the future across worker threads.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture<HandlerResult>;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Handler return values ─────────────────────────────────────────────────────

/// Anything a handler may return.
///
/// Plain responses succeed. `Result<T, E>` lets a handler fail with anything
/// that converts into [`HttpError`]; the error is seen by every middleware on
/// the way out, including the access log.
pub trait IntoHandlerResult {
    fn into_result(self) -> HandlerResult;
}

impl IntoHandlerResult for Response {
    fn into_result(self) -> HandlerResult { Ok(self) }
}

impl IntoHandlerResult for StatusCode {
    fn into_result(self) -> HandlerResult { Ok(self.into_response()) }
}

impl IntoHandlerResult for String {
    fn into_result(self) -> HandlerResult { Ok(self.into_response()) }
}

impl IntoHandlerResult for &'static str {
    fn into_result(self) -> HandlerResult { Ok(self.into_response()) }
}

impl IntoHandlerResult for HttpError {
    fn into_result(self) -> HandlerResult { Err(self) }
}

impl<T, E> IntoHandlerResult for Result<T, E>
where
    T: IntoResponse,
    E: Into<HttpError>,
{
    fn into_result(self) -> HandlerResult {
        self.map(IntoResponse::into_response).map_err(Into::into)
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` with the signature:
///
/// ```text
/// async fn name(req: Request) -> impl IntoHandlerResult
/// ```
///
/// The trait is **sealed** (via the private `Sealed` supertrait): only the
/// blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Bridges a concrete handler `F` to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<HandlerResult> {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_result() })
    }
}

/// Handler that always fails with the given status. Used for unmatched routes.
pub(crate) fn status_handler(status: StatusCode) -> BoxedHandler {
    Arc::new(StatusHandler(status))
}

struct StatusHandler(StatusCode);

impl ErasedHandler for StatusHandler {
    fn call(&self, _req: Request) -> BoxFuture<HandlerResult> {
        let status = self.0;
        Box::pin(async move { Err(HttpError::from_status(status)) })
    }
}
