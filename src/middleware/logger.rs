//! Access log.
//!
//! One structured record per request, written after the handler returns:
//!
//! | Status      | Level   | Sink     |
//! |-------------|---------|----------|
//! | `< 400`     | `INFO`  | stdout   |
//! | `400..=499` | `WARN`  | stdout   |
//! | `>= 500`    | `ERROR` | stderr   |
//!
//! Both sinks receive the same [`LogFields`]; only the level and the sink
//! change. Client and server error responses always carry an error message:
//! the handler's own, or the status' reason phrase when the handler produced
//! the error response without returning an error.
//!
//! Routes registered with `log_payload` have their request body captured into
//! the record. The body is read once and put back, so the handler sees it
//! untouched. Everything the middleware consults (payload policy, skip set,
//! sinks) is fixed when it is constructed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, SecondsFormat, Utc};
use http::StatusCode;
use tracing::{Level, debug, error, info, warn};

use crate::error::HttpError;
use crate::handler::{BoxFuture, HandlerResult};
use crate::method::Method;
use crate::middleware::{Middleware, Next};
use crate::request::Request;

/// Payload placeholder for requests whose body is not captured.
pub const NOT_CAPTURED: &str = "-";

// ── Records ───────────────────────────────────────────────────────────────────

/// Everything one access-log record says about a request.
#[derive(Clone, Debug, PartialEq)]
pub struct LogFields {
    pub request_id: String,
    pub status: u16,
    pub method: String,
    /// Path including the raw query string.
    pub path: String,
    pub client_ip: String,
    pub host: String,
    pub latency: Duration,
    pub user_agent: String,
    /// Request body, or [`NOT_CAPTURED`].
    pub payload: String,
    /// RFC 3339 time the request finished.
    pub time: String,
}

/// Destination for access-log records.
pub trait LogSink: Send + Sync + 'static {
    fn log(&self, level: Level, fields: &LogFields, error: Option<&str>, message: &str);
}

/// Emits records as `tracing` events under the `gantry::access` target.
///
/// Which stream an event lands on is the subscriber's call;
/// [`telemetry::init`](crate::telemetry::init) routes `ERROR` to stderr and
/// everything else to stdout.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

macro_rules! access_event {
    ($macro:ident, $fields:expr, $error:expr, $message:expr) => {
        $macro!(
            target: "gantry::access",
            request_id = %$fields.request_id,
            status = $fields.status,
            method = %$fields.method,
            path = %$fields.path,
            client_ip = %$fields.client_ip,
            host = %$fields.host,
            latency = ?$fields.latency,
            user_agent = %$fields.user_agent,
            payload = %$fields.payload,
            time = %$fields.time,
            error = $error,
            "{}",
            $message
        )
    };
}

impl LogSink for TracingSink {
    fn log(&self, level: Level, fields: &LogFields, error: Option<&str>, message: &str) {
        match level {
            Level::ERROR => access_event!(error, fields, error, message),
            Level::WARN => access_event!(warn, fields, error, message),
            Level::INFO => access_event!(info, fields, error, message),
            _ => access_event!(debug, fields, error, message),
        }
    }
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// Logging policy of one route, taken from the route table at startup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoutePolicy {
    pub method: Method,
    pub path: String,
    pub log_payload: bool,
}

/// Access-log configuration. Read-only once the middleware is built.
#[derive(Clone)]
pub struct LoggerConfig {
    pub stdout: Arc<dyn LogSink>,
    pub stderr: Arc<dyn LogSink>,
    /// Stamp records in UTC instead of local time.
    pub utc: bool,
    pub routes: Vec<RoutePolicy>,
    /// Route patterns never logged (health checks and the like).
    pub skip_paths: Vec<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            stdout: Arc::new(TracingSink),
            stderr: Arc::new(TracingSink),
            utc: false,
            routes: Vec::new(),
            skip_paths: Vec::new(),
        }
    }
}

// ── Middleware ────────────────────────────────────────────────────────────────

/// The access-log middleware.
#[derive(Clone)]
pub struct AccessLog {
    inner: Arc<Inner>,
}

struct Inner {
    message: String,
    stdout: Arc<dyn LogSink>,
    stderr: Arc<dyn LogSink>,
    utc: bool,
    payload_routes: HashMap<Method, HashMap<String, bool>>,
    skip: HashSet<String>,
}

impl AccessLog {
    pub fn new(port: u16, config: LoggerConfig) -> Self {
        let mut payload_routes: HashMap<Method, HashMap<String, bool>> = HashMap::new();
        for route in config.routes {
            payload_routes.entry(route.method).or_default().insert(route.path, route.log_payload);
        }

        Self {
            inner: Arc::new(Inner {
                message: format!("HTTP request to port {port}"),
                stdout: config.stdout,
                stderr: config.stderr,
                utc: config.utc,
                payload_routes,
                skip: config.skip_paths.into_iter().collect(),
            }),
        }
    }
}

impl Inner {
    fn logs_payload(&self, method: &http::Method, route: &str) -> bool {
        Method::from_http(method)
            .and_then(|m| self.payload_routes.get(&m))
            .and_then(|routes| routes.get(route))
            .copied()
            .unwrap_or(false)
    }

    fn now(&self) -> String {
        if self.utc {
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        } else {
            Local::now().to_rfc3339_opts(SecondsFormat::Millis, false)
        }
    }
}

impl Middleware for AccessLog {
    fn call(&self, mut req: Request, next: Next) -> BoxFuture<HandlerResult> {
        let inner = Arc::clone(&self.inner);

        Box::pin(async move {
            let start = Instant::now();
            // Unmatched requests fall back to their concrete path.
            let route = req.matched_path().unwrap_or(req.path()).to_owned();

            // A body that fails while being captured fails the request: the
            // handler must never see a truncated body as a complete one.
            let mut payload = NOT_CAPTURED.to_owned();
            let mut capture_failed = None;
            if inner.logs_payload(req.method(), &route) {
                match req.read_body().await {
                    Ok(body) => {
                        payload = String::from_utf8_lossy(&body).into_owned();
                        req.set_body(body);
                    }
                    Err(e) => {
                        debug!(error = %e, path = %route, "could not capture request payload");
                        capture_failed = Some(HttpError::from(e));
                    }
                }
            }

            let mut fields = LogFields {
                request_id: req.request_id().unwrap_or_default().to_owned(),
                status: 0,
                method: req.method().to_string(),
                path: req.path_and_query().to_owned(),
                client_ip: req.client_ip(),
                host: req.host().to_owned(),
                latency: Duration::ZERO,
                user_agent: req.user_agent().to_owned(),
                payload,
                time: String::new(),
            };

            let result = match capture_failed {
                Some(err) => Err(err),
                None => next.run(req).await,
            };

            if inner.skip.contains(&route) {
                return result;
            }

            fields.latency = start.elapsed();
            fields.time = inner.now();

            let status = match &result {
                Ok(res) => res.status(),
                Err(err) => err.status(),
            };
            fields.status = status.as_u16();

            let error = match &result {
                Err(err) => Some(err.message().to_owned()),
                Ok(_) if is_error_status(status) => status.canonical_reason().map(str::to_owned),
                Ok(_) => None,
            };

            let (sink, level) = if status.is_server_error() {
                (&inner.stderr, Level::ERROR)
            } else if status.is_client_error() {
                (&inner.stdout, Level::WARN)
            } else {
                (&inner.stdout, Level::INFO)
            };
            let error = if level == Level::INFO { None } else { error };

            sink.log(level, &fields, error.as_deref(), &inner.message);
            result
        })
    }
}

/// 400 through 511: the range with standard reason phrases.
fn is_error_status(status: StatusCode) -> bool {
    (400..=511).contains(&status.as_u16())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    #[derive(Clone, Debug)]
    pub(crate) struct Record {
        pub(crate) level: Level,
        pub(crate) fields: LogFields,
        pub(crate) error: Option<String>,
        pub(crate) message: String,
    }

    /// Sink that keeps every record in memory.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        records: Mutex<Vec<Record>>,
    }

    impl RecordingSink {
        pub(crate) fn records(&self) -> Vec<Record> {
            self.records.lock().unwrap().clone()
        }
    }

    impl LogSink for RecordingSink {
        fn log(&self, level: Level, fields: &LogFields, error: Option<&str>, message: &str) {
            self.records.lock().unwrap().push(Record {
                level,
                fields: fields.clone(),
                error: error.map(str::to_owned),
                message: message.to_owned(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use futures_util::stream;
    use http_body_util::StreamBody;
    use hyper::body::Frame;

    use super::testing::RecordingSink;
    use super::*;
    use crate::middleware::BoxedMiddleware;
    use crate::middleware::testing::{request, run};
    use crate::response::Response;

    struct Harness {
        stdout: Arc<RecordingSink>,
        stderr: Arc<RecordingSink>,
        log: BoxedMiddleware,
    }

    fn harness(routes: Vec<RoutePolicy>, skip_paths: Vec<&str>) -> Harness {
        let stdout = Arc::new(RecordingSink::default());
        let stderr = Arc::new(RecordingSink::default());
        let config = LoggerConfig {
            stdout: stdout.clone(),
            stderr: stderr.clone(),
            utc: true,
            routes,
            skip_paths: skip_paths.into_iter().map(str::to_owned).collect(),
        };
        Harness { stdout, stderr, log: Arc::new(AccessLog::new(8080, config)) }
    }

    fn policy(method: Method, path: &str, log_payload: bool) -> RoutePolicy {
        RoutePolicy { method, path: path.to_owned(), log_payload }
    }

    fn routed(method: &str, uri: &str, pattern: &str, body: &'static str) -> Request {
        let mut req = request(method, uri, body);
        req.route = Some(Arc::from(pattern));
        req
    }

    async fn echo_body(mut req: Request) -> Result<Response, HttpError> {
        let body = req.read_body().await?;
        Ok(Response::builder().text(String::from_utf8_lossy(&body).into_owned()))
    }

    #[tokio::test]
    async fn payload_is_captured_and_still_readable_by_handler() {
        let h = harness(vec![policy(Method::Post, "/users", true)], vec![]);
        let body = r#"{"name":"alice"}"#;

        let res = run(vec![h.log], echo_body, routed("POST", "/users", "/users", body)).await.unwrap();

        assert_eq!(res.body(), &Bytes::from_static(body.as_bytes()));
        let records = h.stdout.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields.payload, body);
        assert_eq!(records[0].level, Level::INFO);
        assert_eq!(records[0].error, None);
        assert_eq!(records[0].message, "HTTP request to port 8080");
    }

    #[tokio::test]
    async fn broken_body_during_capture_fails_the_request() {
        let h = harness(vec![policy(Method::Post, "/upload", true)], vec![]);
        let chunks: Vec<Result<Frame<Bytes>, std::io::Error>> = vec![
            Ok(Frame::data(Bytes::from_static(b"part"))),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset")),
        ];
        let body = StreamBody::new(stream::iter(chunks));
        let mut req = Request::new(
            http::Request::builder().method("POST").uri("/upload").body(body).unwrap(),
        );
        req.route = Some(Arc::from("/upload"));

        async fn must_not_run(_req: Request) -> &'static str {
            panic!("handler must not see a truncated body")
        }
        let err = run(vec![h.log], must_not_run, req).await.unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.message().contains("connection reset"), "{}", err.message());
        let records = h.stdout.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, Level::WARN);
        assert_eq!(records[0].fields.status, 400);
        assert_eq!(records[0].fields.payload, NOT_CAPTURED);
        assert_eq!(records[0].error.as_deref(), Some(err.message()));
    }

    #[tokio::test]
    async fn payload_is_not_captured_without_policy() {
        let h = harness(
            vec![policy(Method::Post, "/users", false), policy(Method::Put, "/users", true)],
            vec![],
        );

        let res = run(vec![h.log], echo_body, routed("POST", "/users", "/users", "secret")).await.unwrap();

        assert_eq!(res.body().as_ref(), b"secret");
        assert_eq!(h.stdout.records()[0].fields.payload, NOT_CAPTURED);
    }

    #[tokio::test]
    async fn policy_matches_route_pattern_not_concrete_path() {
        let h = harness(vec![policy(Method::Put, "/users/{id}", true)], vec![]);

        run(vec![h.log], echo_body, routed("PUT", "/users/7?dry=1", "/users/{id}", "x")).await.unwrap();

        let fields = &h.stdout.records()[0].fields;
        assert_eq!(fields.payload, "x");
        assert_eq!(fields.path, "/users/7?dry=1");
        assert_eq!(fields.method, "PUT");
    }

    #[tokio::test]
    async fn skipped_routes_emit_nothing_whatever_the_status() {
        let h = harness(vec![], vec!["/healthz"]);

        let ok = |_req: Request| async { "ok" };
        run(vec![h.log.clone()], ok, routed("GET", "/healthz", "/healthz", "")).await.unwrap();
        let down = |_req: Request| async { StatusCode::SERVICE_UNAVAILABLE };
        run(vec![h.log], down, routed("GET", "/healthz", "/healthz", "")).await.unwrap();

        assert!(h.stdout.records().is_empty());
        assert!(h.stderr.records().is_empty());
    }

    #[tokio::test]
    async fn not_found_response_is_warned_on_stdout_with_reason() {
        let h = harness(vec![], vec![]);

        let missing = |_req: Request| async { StatusCode::NOT_FOUND };
        let res = run(vec![h.log], missing, routed("GET", "/nope", "/nope", "")).await;

        assert!(res.is_ok(), "a response is not turned into an error");
        assert!(h.stderr.records().is_empty());
        let records = h.stdout.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, Level::WARN);
        assert_eq!(records[0].fields.status, 404);
        assert_eq!(records[0].error.as_deref(), Some("Not Found"));
    }

    #[tokio::test]
    async fn server_errors_go_to_stderr_and_propagate() {
        let h = harness(vec![], vec![]);

        let failing = |_req: Request| async { Err::<Response, _>(HttpError::internal("db down")) };
        let err = run(vec![h.log], failing, routed("GET", "/orders", "/orders", "")).await.unwrap_err();

        assert_eq!(err.message(), "db down");
        assert!(h.stdout.records().is_empty());
        let records = h.stderr.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, Level::ERROR);
        assert_eq!(records[0].fields.status, 500);
        assert_eq!(records[0].error.as_deref(), Some("db down"));
    }

    #[tokio::test]
    async fn record_carries_request_metadata() {
        let h = harness(vec![], vec![]);
        let mut req = routed("GET", "/items?page=2", "/items", "");
        req.headers_mut().insert("host", "api.example.com".parse().unwrap());
        req.headers_mut().insert("user-agent", "curl/8.0".parse().unwrap());
        req.headers_mut().insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
        req.extensions_mut().insert(crate::middleware::request_id::RequestId::generate());

        run(vec![h.log], |_req: Request| async { "ok" }, req).await.unwrap();

        let fields = &h.stdout.records()[0].fields;
        assert_eq!(fields.status, 200);
        assert_eq!(fields.path, "/items?page=2");
        assert_eq!(fields.host, "api.example.com");
        assert_eq!(fields.user_agent, "curl/8.0");
        assert_eq!(fields.client_ip, "203.0.113.9");
        assert_eq!(fields.request_id.len(), 36);
        assert!(fields.time.ends_with('Z'));
    }
}
