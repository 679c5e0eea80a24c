//! Cross-origin resource sharing.
//!
//! [`CorsPolicy`] is what the caller configures; any field left empty is
//! filled from the defaults below when the server starts, exactly once.
//! [`Cors`] is the resolved, immutable middleware built from it.
//!
//! Defaults follow the Fetch standard's safelisted request headers, minus the
//! forbidden ones a browser would never let a script set anyway:
//! <https://fetch.spec.whatwg.org/#cors-safelisted-request-header>.

use std::time::Duration;

use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, ORIGIN, VARY,
};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::Deserialize;

use crate::handler::{BoxFuture, HandlerResult};
use crate::middleware::{Middleware, Next, with_headers};
use crate::request::Request;
use crate::response::Response;

pub const DEFAULT_ALLOW_ORIGINS: &[&str] = &["*"];
pub const DEFAULT_ALLOW_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];
pub const DEFAULT_ALLOW_HEADERS: &[&str] = &[
    "Accept",
    "Accept-Charset",
    "Accept-Encoding",
    "Accept-Language",
    "Content-Language",
    "Content-Length",
    "Content-Type",
    "Host",
    "Origin",
];
pub const DEFAULT_ALLOW_CREDENTIALS: bool = true;
pub const DEFAULT_MAX_AGE: Duration = Duration::ZERO;

/// Caller-facing CORS configuration. Empty lists mean "use the default".
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorsPolicy {
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub allow_credentials: bool,
    /// How long browsers may cache a preflight. Zero omits the header.
    pub max_age: Option<Duration>,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            allow_origins: Vec::new(),
            allow_methods: Vec::new(),
            allow_headers: Vec::new(),
            allow_credentials: DEFAULT_ALLOW_CREDENTIALS,
            max_age: None,
        }
    }
}

impl CorsPolicy {
    /// Fills every unset field from the defaults.
    pub fn resolve(mut self) -> Self {
        fn or_default(list: &mut Vec<String>, default: &[&str]) {
            if list.is_empty() {
                *list = default.iter().map(|s| (*s).to_owned()).collect();
            }
        }

        or_default(&mut self.allow_origins, DEFAULT_ALLOW_ORIGINS);
        or_default(&mut self.allow_methods, DEFAULT_ALLOW_METHODS);
        or_default(&mut self.allow_headers, DEFAULT_ALLOW_HEADERS);
        self.max_age = Some(self.max_age.unwrap_or(DEFAULT_MAX_AGE));
        self
    }
}

/// The CORS middleware. Header values are rendered once, at construction.
#[derive(Clone, Debug)]
pub struct Cors {
    origins: Vec<String>,
    any_origin: bool,
    credentials: bool,
    allow_methods: Option<HeaderValue>,
    allow_headers: Option<HeaderValue>,
    max_age: Option<HeaderValue>,
}

impl Cors {
    pub fn new(policy: CorsPolicy) -> Self {
        let policy = policy.resolve();
        let joined = |list: &[String]| HeaderValue::try_from(list.join(",")).ok();
        let max_age = policy
            .max_age
            .filter(|age| !age.is_zero())
            .map(|age| HeaderValue::from(age.as_secs()));

        Self {
            any_origin: policy.allow_origins.iter().any(|o| o == "*"),
            allow_methods: joined(&policy.allow_methods),
            allow_headers: joined(&policy.allow_headers),
            origins: policy.allow_origins,
            credentials: policy.allow_credentials,
            max_age,
        }
    }

    /// The `Access-Control-Allow-Origin` value for `origin`, if it is allowed.
    fn allow_origin(&self, origin: &str) -> Option<HeaderValue> {
        if self.any_origin {
            return Some(HeaderValue::from_static("*"));
        }
        self.origins
            .iter()
            .find(|o| o.as_str() == origin)
            .and_then(|o| HeaderValue::try_from(o.as_str()).ok())
    }
}

impl Middleware for Cors {
    fn call(&self, req: Request, next: Next) -> BoxFuture<HandlerResult> {
        let preflight = req.method() == http::Method::OPTIONS;
        let mut headers = HeaderMap::new();
        headers.append(VARY, HeaderValue::from_static("Origin"));

        let allowed = req.header(ORIGIN.as_str()).and_then(|origin| self.allow_origin(origin));

        let Some(allow_origin) = allowed else {
            // No origin, or one we do not serve: no CORS headers at all.
            if preflight {
                return Box::pin(async move { Ok(preflight_response(headers)) });
            }
            return Box::pin(async move { with_headers(next.run(req).await, &headers) });
        };

        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
        if self.credentials {
            headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }

        if !preflight {
            return Box::pin(async move { with_headers(next.run(req).await, &headers) });
        }

        headers.append(VARY, HeaderValue::from_static("Access-Control-Request-Method"));
        headers.append(VARY, HeaderValue::from_static("Access-Control-Request-Headers"));
        if let Some(methods) = &self.allow_methods {
            headers.insert(ACCESS_CONTROL_ALLOW_METHODS, methods.clone());
        }
        if let Some(allowed) = &self.allow_headers {
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, allowed.clone());
        }
        if let Some(max_age) = &self.max_age {
            headers.insert(ACCESS_CONTROL_MAX_AGE, max_age.clone());
        }

        Box::pin(async move { Ok(preflight_response(headers)) })
    }
}

fn preflight_response(headers: HeaderMap) -> Response {
    let mut res = Response::with_status(StatusCode::NO_CONTENT);
    res.headers_mut().extend(headers);
    res
}
