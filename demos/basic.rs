//! Minimal gantry example: a JSON users API behind the full pipeline.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/api/v1/users/42
//!   curl -i -X POST http://localhost:3000/api/v1/users \
//!        -H 'content-type: application/json' \
//!        -H 'x-request-id: demo-1' \
//!        -d '{"name":"alice"}'
//!   curl -i -X DELETE http://localhost:3000/api/v1/users/42
//!   curl -i -X OPTIONS http://localhost:3000/api/v1/users -H 'origin: https://app.example'
//!   curl http://localhost:3000/healthz          # answered, never logged

use gantry::telemetry::{self, LogFormat};
use gantry::{Endpoint, HandlerResult, HttpError, Next, Request, Response, Server};
use http::StatusCode;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), gantry::Error> {
    telemetry::init(LogFormat::Pretty)?;

    let mut server = Server::new(3000, true, true);
    server.add_middleware(audit);

    let mut api = server.group("/api");
    let mut v1 = api.group("/v1");
    v1.get(Endpoint::new("/users/{id}", get_user))
        // Bodies of POST /api/v1/users show up in the access log.
        .post(Endpoint::new("/users", create_user).log_payload(true))
        .delete(Endpoint::new("/users/{id}", delete_user));

    info!(routes = ?server.route_paths(), "routes registered");
    server.start().await
}

// Global middleware: runs after request-id, so the ID is already known.
async fn audit(req: Request, next: Next) -> HandlerResult {
    if let Some(id) = req.request_id() {
        tracing::debug!(request_id = id, path = req.path(), "audit");
    }
    next.run(req).await
}

// GET /api/v1/users/{id}
async fn get_user(req: Request) -> Response {
    let id = req.param("id").unwrap_or("unknown");
    Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#))
}

// POST /api/v1/users
//
// The access log read the body first and put it back; this sees it intact.
async fn create_user(mut req: Request) -> Result<Response, HttpError> {
    let body = req.read_body().await?;
    if body.is_empty() {
        return Err(HttpError::bad_request("request body is empty"));
    }

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/api/v1/users/99")
        .json(r#"{"id":"99","name":"new_user"}"#))
}

// DELETE /api/v1/users/{id} → 204 No Content
async fn delete_user(_req: Request) -> StatusCode {
    StatusCode::NO_CONTENT
}
