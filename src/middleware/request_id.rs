//! Correlation IDs.
//!
//! Every request leaves this middleware with an `X-Request-ID`. A non-empty
//! value sent by the caller is reused verbatim, byte for byte; otherwise a
//! random v4 UUID is generated. The ID is then visible in three places:
//!
//! - the [`RequestId`] request extension ([`Request::request_id`])
//! - the inbound `X-Request-ID` header, for code that only looks at headers
//! - the outbound `X-Request-ID` header, including on error responses
//!
//! [`Recover`](super::recover::Recover) runs first and establishes the header
//! too, so a panic's `500` carries the same ID this middleware reuses.
//!
//! Generation is stateless, so any number of requests can ask at once.

use std::fmt;

use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::error;
use uuid::Uuid;

use crate::handler::{BoxFuture, HandlerResult};
use crate::middleware::{Middleware, Next, with_headers};
use crate::request::Request;

/// The correlation header, request and response side.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// A request's correlation ID, stored in the request extensions.
///
/// Header bytes that are not UTF-8 are replaced with `U+FFFD` here; the
/// header itself keeps the original bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestId(String);

impl RequestId {
    /// A fresh random ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_header(value: &HeaderValue) -> Self {
        Self(String::from_utf8_lossy(value.as_bytes()).into_owned())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns the request's `X-Request-ID`, generating and inserting one when
/// it is missing or empty.
///
/// `None` only if a generated ID is rejected as a header value; the request
/// then goes on without one rather than with a blank ID.
pub(crate) fn ensure_header(req: &mut Request) -> Option<HeaderValue> {
    if let Some(value) = req.headers().get(X_REQUEST_ID).filter(|v| !v.is_empty()) {
        return Some(value.clone());
    }

    let id = RequestId::generate();
    match HeaderValue::try_from(id.as_str()) {
        Ok(value) => {
            req.headers_mut().insert(X_REQUEST_ID, value.clone());
            Some(value)
        }
        Err(e) => {
            error!(request_id = %id, "generated request id is not a valid header value: {e}");
            None
        }
    }
}

/// Middleware that establishes the correlation ID.
#[derive(Clone, Copy, Debug, Default)]
pub struct SetRequestId;

impl Middleware for SetRequestId {
    fn call(&self, mut req: Request, next: Next) -> BoxFuture<HandlerResult> {
        let Some(value) = ensure_header(&mut req) else {
            return next.run(req);
        };
        req.extensions_mut().insert(RequestId::from_header(&value));

        let mut outbound = HeaderMap::with_capacity(1);
        outbound.insert(X_REQUEST_ID, value);

        Box::pin(async move { with_headers(next.run(req).await, &outbound) })
    }
}
