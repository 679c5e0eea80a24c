//! HTTP server and graceful shutdown.
//!
//! [`Server`] collects routes, middleware and configuration. [`Server::start`]
//! freezes all of it, in this order:
//!
//! 1. derives the access log's per-route policy from the route table,
//! 2. stacks recover → request-id → access log → CORS (if enabled) → user
//!    middleware,
//! 3. builds the per-verb radix trees (route-local middleware wrapped in),
//! 4. binds and accepts until asked to stop.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! On SIGTERM, Ctrl-C or [`ServerHandle::stop`] the server:
//! 1. Stops `listener.accept()` so no new connections are made.
//! 2. Tells every live connection to finish its in-flight request and close.
//! 3. Waits for them up to the deadline, then aborts whatever is left.
//!
//! Keep `shutdown_grace_secs` below `terminationGracePeriodSeconds`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::handler::status_handler;
use crate::health::{self, LIVENESS_PATH, READINESS_PATH};
use crate::method::Method;
use crate::middleware::cors::{Cors, CorsPolicy};
use crate::middleware::logger::{AccessLog, LogSink, LoggerConfig, TracingSink};
use crate::middleware::recover::Recover;
use crate::middleware::request_id::SetRequestId;
use crate::middleware::{BoxedMiddleware, Middleware, Next};
use crate::request::Request;
use crate::response::{IntoResponse, Response};
use crate::router::{Endpoint, Lookup, RouteTable, RouteTableBuilder, RouterGroup, verb_methods};

/// The HTTP server.
///
/// ```rust,no_run
/// use gantry::{Endpoint, Request, Server};
///
/// # async fn run() -> Result<(), gantry::Error> {
/// let mut server = Server::new(3000, true, true);
/// server.group("/api").get(Endpoint::new("/users/{id}", get_user));
/// server.start().await
/// # }
/// async fn get_user(req: Request) -> String {
///     format!("user {}", req.param("id").unwrap_or("?"))
/// }
/// ```
pub struct Server {
    config: ServerConfig,
    routes: RouteTableBuilder,
    middlewares: Vec<BoxedMiddleware>,
    skip_paths: Vec<String>,
    stdout: Arc<dyn LogSink>,
    stderr: Arc<dyn LogSink>,
    control: Arc<Control>,
}

impl Server {
    /// A server on `port` (all interfaces) with everything else defaulted.
    pub fn new(port: u16, enable_cors: bool, enable_predefined_routes: bool) -> Self {
        Self::with_config(ServerConfig {
            port,
            enable_cors,
            enable_predefined_routes,
            ..ServerConfig::default()
        })
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let mut server = Self {
            config,
            routes: RouteTableBuilder::new(),
            middlewares: Vec::new(),
            skip_paths: Vec::new(),
            stdout: Arc::new(TracingSink),
            stderr: Arc::new(TracingSink),
            control: Arc::new(Control::new()),
        };

        if server.config.enable_predefined_routes {
            server
                .get(Endpoint::new(LIVENESS_PATH, health::liveness))
                .get(Endpoint::new(READINESS_PATH, health::readiness));
            server.logger_skip_paths([LIVENESS_PATH, READINESS_PATH]);
        }
        server
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Appends global middleware. Runs after the built-in ones, in the order
    /// added, before any route-local middleware.
    pub fn add_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Route patterns the access log never records.
    pub fn logger_skip_paths<I, S>(&mut self, paths: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Replaces the access log's sinks (both default to [`TracingSink`]).
    pub fn log_sinks(&mut self, stdout: Arc<dyn LogSink>, stderr: Arc<dyn LogSink>) -> &mut Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    /// Overrides `config.cors`. Only used when CORS is enabled.
    pub fn cors_policy(&mut self, policy: CorsPolicy) -> &mut Self {
        self.config.cors = policy;
        self
    }

    /// Every registered path, in registration order.
    pub fn route_paths(&self) -> Vec<String> {
        self.routes.paths()
    }

    pub fn group(&mut self, prefix: &str) -> RouterGroup<'_> {
        self.routes.group(prefix)
    }

    pub fn route(&mut self, method: Method, endpoint: Endpoint) -> &mut Self {
        self.routes.route(method, endpoint);
        self
    }

    verb_methods!();

    /// A handle for stopping the server or learning its address. Take it
    /// before calling [`start`](Server::start).
    pub fn handle(&self) -> ServerHandle {
        ServerHandle { control: Arc::clone(&self.control) }
    }

    /// Builds the pipeline and serves until stopped.
    ///
    /// Returns `Ok(())` after a stop, graceful or not; bind and route-table
    /// errors are returned as-is. If [`ServerHandle::stop`] was called first
    /// this returns immediately without binding.
    pub async fn start(self) -> Result<(), Error> {
        let control = Arc::clone(&self.control);
        control.phase.send_replace(Phase::Starting);

        let outcome = self.serve(&control).await;

        control.phase.send_replace(Phase::Stopped { drained: !matches!(outcome, Ok(false)) });
        outcome.map(|_| ())
    }

    /// Freezes routes and middleware into the request pipeline.
    pub(crate) fn into_app(self) -> Result<App, Error> {
        let policies = self.routes.policies();
        let routes = self.routes.build()?;

        let access_log = AccessLog::new(
            self.config.port,
            LoggerConfig {
                stdout: self.stdout,
                stderr: self.stderr,
                utc: self.config.logger_utc,
                routes: policies,
                skip_paths: self.skip_paths,
            },
        );

        let mut stack: Vec<BoxedMiddleware> =
            vec![Arc::new(Recover), Arc::new(SetRequestId), Arc::new(access_log)];
        if self.config.enable_cors {
            stack.push(Arc::new(Cors::new(self.config.cors)));
        }
        stack.extend(self.middlewares);

        Ok(App { routes, stack: stack.into() })
    }

    /// The accept loop. `Ok(drained)` tells whether every connection finished
    /// before the deadline.
    async fn serve(self, control: &Control) -> Result<bool, Error> {
        let mut stop_rx = control.stop.subscribe();
        if stop_rx.borrow_and_update().is_some() {
            info!("stop requested before start, not binding");
            return Ok(true);
        }

        let addr = self.config.addr();
        let on_signal = self.config.shutdown_on_signal;
        let grace = self.config.shutdown_grace();

        // Shared by every connection task; read-only from here on.
        let app = Arc::new(self.into_app()?);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        control.phase.send_replace(Phase::Running(local_addr));
        info!(addr = %local_addr, "gantry listening");

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish, or abort them, during shutdown.
        let mut tasks = JoinSet::new();
        let (close_tx, close_rx) = watch::channel(());

        let signal = shutdown_signal(on_signal);
        tokio::pin!(signal);

        let deadline = loop {
            tokio::select! {
                // Check stop requests first so they win over queued connections.
                biased;

                deadline = stop_requested(&mut stop_rx) => break deadline,

                () = &mut signal => {
                    info!("shutdown signal received");
                    control.request_stop(grace);
                    break grace;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let mut close = close_rx.clone();
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move { dispatch(app, req, remote_addr).await }
                        });

                        let builder = ConnBuilder::new(TokioExecutor::new());
                        let conn = builder.serve_connection(io, svc);
                        tokio::pin!(conn);

                        let res = tokio::select! {
                            res = conn.as_mut() => res,
                            _ = close.changed() => {
                                conn.as_mut().graceful_shutdown();
                                conn.await
                            }
                        };
                        if let Err(e) = res {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        };

        drop(listener);
        info!(in_flight = tasks.len(), ?deadline, "draining connections");
        close_tx.send_replace(());

        let drained = tokio::time::timeout(deadline, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if !drained {
            warn!(remaining = tasks.len(), "shutdown deadline exceeded, aborting connections");
            tasks.shutdown().await;
        }

        info!(drained, "gantry stopped");
        Ok(drained)
    }
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

enum Phase {
    Idle,
    Starting,
    Running(SocketAddr),
    Stopped { drained: bool },
}

struct Control {
    /// The first stop request's deadline.
    stop: watch::Sender<Option<Duration>>,
    phase: watch::Sender<Phase>,
}

impl Control {
    fn new() -> Self {
        Self {
            stop: watch::channel(None).0,
            phase: watch::channel(Phase::Idle).0,
        }
    }

    fn request_stop(&self, deadline: Duration) {
        self.stop.send_if_modified(|requested| {
            if requested.is_some() {
                return false;
            }
            *requested = Some(deadline);
            true
        });
    }
}

/// Remote control for a [`Server`]. Cheap to clone.
#[derive(Clone)]
pub struct ServerHandle {
    control: Arc<Control>,
}

impl ServerHandle {
    /// The bound address, once the server accepts connections. `None` if it
    /// stopped (or failed) without ever accepting.
    pub async fn listening(&self) -> Option<SocketAddr> {
        let mut phase = self.control.phase.subscribe();
        let settled = phase
            .wait_for(|p| matches!(p, Phase::Running(_) | Phase::Stopped { .. }))
            .await;
        match settled.as_deref() {
            Ok(Phase::Running(addr)) => Some(*addr),
            _ => None,
        }
    }

    /// Stops accepting and waits up to `deadline` for in-flight requests.
    ///
    /// Connections still open at the deadline are closed and
    /// [`Error::ShutdownTimeout`] is returned. Before `start` this only
    /// records the request.
    pub async fn stop(&self, deadline: Duration) -> Result<(), Error> {
        self.control.request_stop(deadline);

        let mut phase = self.control.phase.subscribe();
        let drained = match phase
            .wait_for(|p| matches!(p, Phase::Idle | Phase::Stopped { .. }))
            .await
            .as_deref()
        {
            Ok(Phase::Stopped { drained }) => *drained,
            _ => true,
        };

        if drained { Ok(()) } else { Err(Error::ShutdownTimeout(deadline)) }
    }
}

async fn stop_requested(rx: &mut watch::Receiver<Option<Duration>>) -> Duration {
    let requested = rx.wait_for(Option::is_some).await.map(|r| *r);
    match requested {
        Ok(deadline) => deadline.unwrap_or_default(),
        // The sender lives as long as the server.
        Err(_) => std::future::pending().await,
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// The frozen pipeline: route table plus global middleware.
pub(crate) struct App {
    routes: RouteTable,
    stack: Arc<[BoxedMiddleware]>,
}

impl App {
    /// Routes one request and produces one response. Never fails: an error
    /// that escapes the chain is rendered by [`IntoResponse`] for
    /// [`HttpError`](crate::HttpError).
    pub(crate) async fn handle(&self, mut req: Request) -> Response {
        let endpoint = match self.routes.lookup(req.method(), req.path()) {
            Lookup::Found { pattern, handler, params } => {
                req.route = Some(pattern);
                req.params = params;
                handler
            }
            Lookup::MethodNotAllowed => status_handler(StatusCode::METHOD_NOT_ALLOWED),
            Lookup::NotFound => status_handler(StatusCode::NOT_FOUND),
        };

        match Next::new(Arc::clone(&self.stack), endpoint).run(req).await {
            Ok(res) => res,
            Err(err) => {
                debug!(status = %err.status(), error = %err, "request failed");
                err.into_response()
            }
        }
    }
}

/// Hot path. The error type is [`Infallible`]: every failure is already a
/// response by the time hyper sees it.
async fn dispatch(
    app: Arc<App>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let mut req = Request::new(req);
    req.remote_addr = Some(remote_addr);
    Ok(app.handle(req).await.into_inner())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives, or never if
/// `enabled` is false.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available.
async fn shutdown_signal(enabled: bool) {
    if !enabled {
        return std::future::pending().await;
    }

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    // `pending()` is a future that never resolves; on non-Unix platforms
    // the SIGTERM arm is effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use http::header::{ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN};
    use http::HeaderValue;
    use tracing::Level;

    use super::*;
    use crate::error::HttpError;
    use crate::middleware::logger::testing::RecordingSink;
    use crate::middleware::request_id::X_REQUEST_ID;
    use crate::middleware::testing::request;

    async fn hello(_req: Request) -> &'static str {
        "hello"
    }

    async fn boom(_req: Request) -> Result<Response, HttpError> {
        Err(HttpError::new(StatusCode::SERVICE_UNAVAILABLE, "database unavailable"))
    }

    struct Recorded {
        stdout: Arc<RecordingSink>,
        stderr: Arc<RecordingSink>,
    }

    fn recorded(server: &mut Server) -> Recorded {
        let stdout = Arc::new(RecordingSink::default());
        let stderr = Arc::new(RecordingSink::default());
        server.log_sinks(stdout.clone(), stderr.clone());
        Recorded { stdout, stderr }
    }

    fn app(server: Server) -> App {
        server.into_app().unwrap()
    }

    #[tokio::test]
    async fn incoming_request_id_is_echoed() {
        let mut server = Server::new(8080, false, false);
        server.get(Endpoint::new("/", hello));
        let app = app(server);

        let mut req = request("GET", "/", "");
        req.headers_mut().insert(X_REQUEST_ID, HeaderValue::from_static("abc-123"));
        let res = app.handle(req).await;

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[X_REQUEST_ID], "abc-123");
        assert_eq!(res.body().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn unknown_route_is_404_with_request_id_and_logged() {
        let mut server = Server::new(8080, false, false);
        let logs = recorded(&mut server);
        let app = app(server);

        let res = app.handle(request("GET", "/nope", "")).await;

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.body().as_ref(), br#"{"message":"Not Found"}"#);
        let id = res.headers()[X_REQUEST_ID].to_str().unwrap().to_owned();
        assert!(!id.is_empty());

        let records = logs.stdout.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, Level::WARN);
        assert_eq!(records[0].fields.request_id, id);
        assert_eq!(records[0].fields.path, "/nope");
        assert_eq!(records[0].error.as_deref(), Some("Not Found"));
    }

    #[tokio::test]
    async fn wrong_verb_is_405() {
        let mut server = Server::new(8080, false, false);
        server.get(Endpoint::new("/things", hello));
        let app = app(server);

        let res = app.handle(request("POST", "/things", "")).await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);

        let res = app.handle(request("TRACE", "/things", "")).await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn handler_error_is_logged_to_stderr_and_rendered() {
        let mut server = Server::new(8080, false, false);
        let logs = recorded(&mut server);
        server.get(Endpoint::new("/db", boom));
        let app = app(server);

        let res = app.handle(request("GET", "/db", "")).await;

        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(res.body().as_ref(), br#"{"message":"database unavailable"}"#);
        assert!(logs.stdout.records().is_empty());
        let records = logs.stderr.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error.as_deref(), Some("database unavailable"));
        assert_eq!(records[0].message, "HTTP request to port 8080");
    }

    #[tokio::test]
    async fn cors_headers_only_when_enabled() {
        let mut with_origin = request("GET", "/", "");
        with_origin.headers_mut().insert(ORIGIN, HeaderValue::from_static("https://a.example"));

        let mut server = Server::new(8080, false, false);
        server.get(Endpoint::new("/", hello));
        let res = app(server).handle(with_origin).await;
        assert!(res.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

        let mut with_origin = request("GET", "/", "");
        with_origin.headers_mut().insert(ORIGIN, HeaderValue::from_static("https://a.example"));

        let mut server = Server::new(8080, true, false);
        server.get(Endpoint::new("/", hello));
        let res = app(server).handle(with_origin).await;
        assert_eq!(res.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(res.headers()[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[tokio::test]
    async fn preflight_to_unrouted_verb_is_answered_by_cors() {
        let mut server = Server::new(8080, true, false);
        server.post(Endpoint::new("/things", hello));
        let app = app(server);

        let mut req = request("OPTIONS", "/things", "");
        req.headers_mut().insert(ORIGIN, HeaderValue::from_static("https://a.example"));
        let res = app.handle(req).await;

        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert_eq!(res.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn predefined_routes_answer_and_are_not_logged() {
        let mut server = Server::new(8080, false, true);
        let logs = recorded(&mut server);
        assert_eq!(server.route_paths(), ["/healthz", "/readyz"]);
        let app = app(server);

        let res = app.handle(request("GET", "/healthz", "")).await;
        assert_eq!(res.body().as_ref(), b"ok");
        let res = app.handle(request("GET", "/readyz", "")).await;
        assert_eq!(res.body().as_ref(), b"ready");

        assert!(logs.stdout.records().is_empty());
    }

    #[tokio::test]
    async fn user_middleware_runs_after_builtins_and_before_route_middleware() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let global = {
            let seen = Arc::clone(&seen);
            move |req: Request, next: Next| {
                let seen = Arc::clone(&seen);
                async move {
                    let id = req.request_id().map(str::to_owned);
                    seen.lock().unwrap().push(format!("global:{}", id.is_some()));
                    next.run(req).await
                }
            }
        };
        let local = {
            let seen = Arc::clone(&seen);
            move |req: Request, next: Next| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push("route".to_owned());
                    next.run(req).await
                }
            }
        };

        let mut server = Server::new(8080, false, false);
        server.add_middleware(global);
        server.group("/api").get(Endpoint::new("/x", hello).middleware(local));
        let app = app(server);

        let res = app.handle(request("GET", "/api/x", "")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(*seen.lock().unwrap(), ["global:true", "route"]);
    }

    #[tokio::test]
    async fn panicking_handler_becomes_500() {
        async fn panics(_req: Request) -> &'static str {
            panic!("kaboom")
        }

        let mut server = Server::new(8080, false, false);
        server.get(Endpoint::new("/panic", panics));
        let app = app(server);

        let res = app.handle(request("GET", "/panic", "")).await;

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body().as_ref(), br#"{"message":"Internal Server Error"}"#);
        assert!(!res.headers()[X_REQUEST_ID].is_empty());

        let mut req = request("GET", "/panic", "");
        req.headers_mut().insert(X_REQUEST_ID, HeaderValue::from_static("abc-123"));
        let res = app.handle(req).await;

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.headers()[X_REQUEST_ID], "abc-123");
    }

    #[tokio::test]
    async fn duplicate_route_fails_start_without_binding() {
        let mut server = Server::with_config(ServerConfig {
            port: 0,
            shutdown_on_signal: false,
            ..ServerConfig::default()
        });
        server.get(Endpoint::new("/users", hello));
        server.group("/us").get(Endpoint::new("ers", hello));
        let handle = server.handle();

        let err = server.start().await.unwrap_err();

        assert!(matches!(err, Error::DuplicateRoute { method: Method::Get, ref path } if path == "/users"));
        assert_eq!(handle.listening().await, None);
        handle.stop(Duration::from_secs(1)).await.unwrap();
    }
}
