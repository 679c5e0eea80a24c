//! Predefined health-check routes.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Can the pod serve traffic? Failure → pulled from load-balancer. |
//!
//! `Server::new(port, cors, true)` registers both and keeps them out of the
//! access log. Register your own readiness handler instead if the service
//! must gate on its dependencies.

use crate::{Request, Response};

pub const LIVENESS_PATH: &str = "/healthz";
pub const READINESS_PATH: &str = "/readyz";

/// Liveness probe. `200 OK`, body `"ok"`; no dependencies on purpose.
pub async fn liveness(_req: Request) -> Response {
    Response::text("ok")
}

/// Readiness probe (default implementation). `200 OK`, body `"ready"`.
pub async fn readiness(_req: Request) -> Response {
    Response::text("ready")
}
