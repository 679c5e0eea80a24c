//! Panic recovery.
//!
//! Outermost layer of the chain. A panicking handler costs one request, not
//! the connection task: the panic is logged and answered with `500`.
//!
//! The unwind skips every layer inside this one, so the correlation ID is
//! established here first and put on the `500` directly.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tracing::error;

use crate::error::HttpError;
use crate::handler::{BoxFuture, HandlerResult};
use crate::middleware::request_id::{X_REQUEST_ID, ensure_header};
use crate::middleware::{Middleware, Next};
use crate::request::Request;

#[derive(Clone, Copy, Debug, Default)]
pub struct Recover;

impl Middleware for Recover {
    fn call(&self, mut req: Request, next: Next) -> BoxFuture<HandlerResult> {
        let method = req.method().clone();
        let path = req.path().to_owned();
        let request_id = ensure_header(&mut req);

        Box::pin(async move {
            match AssertUnwindSafe(next.run(req)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let id = request_id.as_ref().map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
                    error!(
                        %method,
                        %path,
                        request_id = id.as_deref(),
                        panic = panic_message(panic.as_ref()),
                        "handler panicked"
                    );

                    let mut err = HttpError::internal("Internal Server Error");
                    if let Some(value) = request_id {
                        err.headers_mut().insert(X_REQUEST_ID, value);
                    }
                    Err(err)
                }
            }
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}
