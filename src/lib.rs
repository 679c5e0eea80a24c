//! # gantry
//!
//! The request pipeline of an HTTP service: route groups, correlation IDs,
//! selective access logging, CORS and a graceful start/stop lifecycle.
//!
//! ## The pipeline
//!
//! Every request goes through the same fixed chain:
//!
//! ```text
//! recover → request-id → access log → CORS → your middleware → route middleware → handler
//! ```
//!
//! - **Correlation ID.** `X-Request-ID` is reused when the caller sent one,
//!   generated (UUID v4) otherwise, and echoed on the response.
//! - **Access log.** One structured record per request. Routes registered
//!   with `log_payload(true)` also get their body captured; the handler still
//!   reads it unchanged. 5xx goes to the stderr sink, everything else to
//!   stdout. Health checks and other skip paths are never logged.
//! - **CORS.** Off unless enabled. Unset policy fields take safe defaults.
//!
//! Routes are collected by a builder and frozen into per-verb radix trees
//! ([`matchit`]) when the server starts. Nothing is mutated while serving.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use gantry::{Endpoint, HttpError, Request, Response, Server};
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gantry::Error> {
//!     gantry::telemetry::init(gantry::telemetry::LogFormat::Json)?;
//!
//!     let mut server = Server::new(3000, true, true);
//!     let mut users = server.group("/users");
//!     users
//!         .get(Endpoint::new("/{id}", get_user))
//!         .post(Endpoint::new("", create_user).log_payload(true));
//!
//!     server.start().await
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#))
//! }
//!
//! async fn create_user(mut req: Request) -> Result<Response, HttpError> {
//!     let body = req.read_body().await?;
//!     if body.is_empty() {
//!         return Err(HttpError::bad_request("empty body"));
//!     }
//!     Ok(Response::builder()
//!         .status(StatusCode::CREATED)
//!         .header("location", "/users/99")
//!         .json(body))
//! }
//! ```

mod config;
mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;

pub mod health;
pub mod middleware;
pub mod telemetry;

pub use config::ServerConfig;
pub use error::{BoxError, Error, HttpError};
pub use handler::{BoxFuture, Handler, HandlerResult, IntoHandlerResult};
pub use method::Method;
pub use middleware::{Middleware, Next};
pub use request::{Body, Request};
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::{Endpoint, RouteTable, RouteTableBuilder, RouterGroup};
pub use server::{Server, ServerHandle};
