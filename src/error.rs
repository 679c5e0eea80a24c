//! Error types.
//!
//! Two kinds of failure exist and they never mix:
//!
//! - [`Error`] — infrastructure. Binding the port, building the route table,
//!   reading a request body off the socket, draining connections on shutdown.
//! - [`HttpError`] — a handler (or middleware) decided the request failed.
//!   It travels back up the middleware chain as the `Err` side of
//!   [`HandlerResult`](crate::HandlerResult) and is turned into a response by
//!   the server's error responder once nothing else claims it.

use std::net::SocketAddr;
use std::time::Duration;

use http::{HeaderMap, StatusCode};

use crate::method::Method;

/// Boxed error used for body and transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The error type returned by gantry's fallible operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid route `{method} {path}`: {reason}")]
    InvalidRoute {
        method: Method,
        path: String,
        reason: String,
    },

    #[error("route `{method} {path}` is registered more than once")]
    DuplicateRoute { method: Method, path: String },

    #[error("failed to read request body: {0}")]
    Body(#[source] BoxError),

    #[error("graceful shutdown did not finish within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("failed to initialise logging: {0}")]
    Telemetry(String),
}

/// A failed request, as reported by a handler or middleware.
///
/// Carries the status to answer with, a human-readable message and any
/// headers middleware attached on the way out (correlation ID, CORS).
///
/// ```rust
/// use gantry::{HttpError, Request};
/// use http::StatusCode;
///
/// async fn get_user(req: Request) -> Result<String, HttpError> {
///     match req.param("id") {
///         Some("42") => Ok("alice".to_owned()),
///         _ => Err(HttpError::new(StatusCode::NOT_FOUND, "no such user")),
///     }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HttpError {
    status: StatusCode,
    message: String,
    headers: HeaderMap,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), headers: HeaderMap::new() }
    }

    /// An error whose message is the status' standard reason phrase.
    pub fn from_status(status: StatusCode) -> Self {
        Self::new(status, status.canonical_reason().unwrap_or_default())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found() -> Self {
        Self::from_status(StatusCode::NOT_FOUND)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn message(&self) -> &str { &self.message }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
}

impl From<Error> for HttpError {
    fn from(e: Error) -> Self {
        match e {
            Error::Body(_) => Self::bad_request(e.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}
