//! Route registration and lookup.
//!
//! Registration and serving are two different types:
//!
//! - [`RouteTableBuilder`] accumulates [`Endpoint`]s in registration order.
//!   [`RouterGroup`]s write into the same builder with their prefix applied.
//! - [`RouteTable`] is what the builder turns into when the server starts:
//!   one radix tree per method, O(path-length) lookup, never mutated again.
//!
//! Group prefixes are joined by plain string concatenation. `group("/api")`
//! then `group("/v1")` then `"/users"` is `/api/v1/users`; `group("/api")`
//! then `"users"` is `/apiusers`. Slashes are the caller's job.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;
use crate::middleware::logger::RoutePolicy;
use crate::middleware::{BoxedMiddleware, Chain, Middleware};

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// A path, its handler, and how it is treated by middleware.
///
/// ```rust
/// # use gantry::{Endpoint, Request, Response};
/// # async fn create_user(_: Request) -> Response { Response::text("") }
/// Endpoint::new("/users", create_user).log_payload(true);
/// ```
pub struct Endpoint {
    path: String,
    handler: BoxedHandler,
    middlewares: Vec<BoxedMiddleware>,
    log_payload: bool,
}

impl Endpoint {
    pub fn new(path: impl Into<String>, handler: impl Handler) -> Self {
        Self {
            path: path.into(),
            handler: handler.into_boxed_handler(),
            middlewares: Vec::new(),
            log_payload: false,
        }
    }

    /// Adds route-local middleware. Runs after all global middleware, in the
    /// order added.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Capture the request body into the access log for this route.
    pub fn log_payload(mut self, yes: bool) -> Self {
        self.log_payload = yes;
        self
    }
}

/// One registered route. Immutable once appended.
struct Route {
    method: Method,
    path: String,
    handler: BoxedHandler,
    middlewares: Vec<BoxedMiddleware>,
    log_payload: bool,
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Generates one registration method per verb, all funnelling into `route`.
macro_rules! verb_methods {
    () => {
        /// Registers a `GET` route.
        pub fn get(&mut self, endpoint: $crate::Endpoint) -> &mut Self {
            self.route($crate::Method::Get, endpoint)
        }

        /// Registers a `POST` route.
        pub fn post(&mut self, endpoint: $crate::Endpoint) -> &mut Self {
            self.route($crate::Method::Post, endpoint)
        }

        /// Registers a `PUT` route.
        pub fn put(&mut self, endpoint: $crate::Endpoint) -> &mut Self {
            self.route($crate::Method::Put, endpoint)
        }

        /// Registers a `PATCH` route.
        pub fn patch(&mut self, endpoint: $crate::Endpoint) -> &mut Self {
            self.route($crate::Method::Patch, endpoint)
        }

        /// Registers a `DELETE` route.
        pub fn delete(&mut self, endpoint: $crate::Endpoint) -> &mut Self {
            self.route($crate::Method::Delete, endpoint)
        }

        /// Registers a `HEAD` route.
        pub fn head(&mut self, endpoint: $crate::Endpoint) -> &mut Self {
            self.route($crate::Method::Head, endpoint)
        }

        /// Registers an `OPTIONS` route.
        pub fn options(&mut self, endpoint: $crate::Endpoint) -> &mut Self {
            self.route($crate::Method::Options, endpoint)
        }
    };
}

pub(crate) use verb_methods;

/// Accumulates routes until the server starts.
#[derive(Default)]
pub struct RouteTableBuilder {
    routes: Vec<Route>,
}

impl RouteTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route. Each call returns `self` so registrations chain.
    pub fn route(&mut self, method: Method, endpoint: Endpoint) -> &mut Self {
        self.routes.push(Route {
            method,
            path: endpoint.path,
            handler: endpoint.handler,
            middlewares: endpoint.middlewares,
            log_payload: endpoint.log_payload,
        });
        self
    }

    verb_methods!();

    /// A prefix scope over this builder.
    pub fn group(&mut self, prefix: &str) -> RouterGroup<'_> {
        RouterGroup { prefix: prefix.to_owned(), routes: self }
    }

    /// Full paths in registration order.
    pub fn paths(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.path.clone()).collect()
    }

    /// Access-log policy of every route, in registration order.
    pub fn policies(&self) -> Vec<RoutePolicy> {
        self.routes
            .iter()
            .map(|r| RoutePolicy { method: r.method, path: r.path.clone(), log_payload: r.log_payload })
            .collect()
    }

    /// Freezes the routes into a lookup table.
    ///
    /// Rejects paths that are empty or relative, the same method and path
    /// registered twice, and patterns the radix tree cannot tell apart.
    pub fn build(self) -> Result<RouteTable, Error> {
        let mut seen = HashSet::new();
        let mut trees: HashMap<Method, MatchitRouter<Bound>> = HashMap::new();

        for route in self.routes {
            if !route.path.starts_with('/') {
                return Err(Error::InvalidRoute {
                    method: route.method,
                    path: route.path,
                    reason: "path must start with `/`".to_owned(),
                });
            }
            if !seen.insert((route.method, route.path.clone())) {
                return Err(Error::DuplicateRoute { method: route.method, path: route.path });
            }

            let bound = Bound {
                pattern: Arc::from(route.path.as_str()),
                handler: Chain::wrap(route.middlewares, route.handler),
            };
            if let Err(e) = trees.entry(route.method).or_default().insert(route.path.as_str(), bound) {
                return Err(Error::InvalidRoute {
                    method: route.method,
                    path: route.path,
                    reason: e.to_string(),
                });
            }
        }

        Ok(RouteTable { trees })
    }
}

// ── Groups ────────────────────────────────────────────────────────────────────

/// A path-prefix scope. Owns nothing: every registration is forwarded to the
/// underlying builder with the prefix prepended, for every verb alike.
pub struct RouterGroup<'a> {
    prefix: String,
    routes: &'a mut RouteTableBuilder,
}

impl RouterGroup<'_> {
    /// A nested scope whose prefix is this one's followed by `prefix`.
    pub fn group(&mut self, prefix: &str) -> RouterGroup<'_> {
        RouterGroup { prefix: format!("{}{prefix}", self.prefix), routes: &mut *self.routes }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn route(&mut self, method: Method, mut endpoint: Endpoint) -> &mut Self {
        endpoint.path = format!("{}{}", self.prefix, endpoint.path);
        self.routes.route(method, endpoint);
        self
    }

    verb_methods!();
}

// ── Table ─────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Bound {
    pattern: Arc<str>,
    handler: BoxedHandler,
}

/// Outcome of looking a request up.
pub(crate) enum Lookup {
    Found {
        pattern: Arc<str>,
        handler: BoxedHandler,
        params: HashMap<String, String>,
    },
    /// The path exists, but not for this method (or the method is not routable).
    MethodNotAllowed,
    NotFound,
}

/// The frozen route table. Read-only while serving.
pub struct RouteTable {
    trees: HashMap<Method, MatchitRouter<Bound>>,
}

impl RouteTable {
    pub(crate) fn lookup(&self, method: &http::Method, path: &str) -> Lookup {
        let found = Method::from_http(method)
            .and_then(|m| self.trees.get(&m))
            .and_then(|tree| tree.at(path).ok());

        if let Some(matched) = found {
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Lookup::Found {
                pattern: Arc::clone(&matched.value.pattern),
                handler: Arc::clone(&matched.value.handler),
                params,
            };
        }

        if self.trees.values().any(|tree| tree.at(path).is_ok()) {
            Lookup::MethodNotAllowed
        } else {
            Lookup::NotFound
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ErasedHandler;
    use crate::middleware::testing::request;
    use crate::request::Request;
    use crate::response::Response;

    async fn noop(_req: Request) -> Response {
        Response::text("noop")
    }

    fn endpoint(path: &str) -> Endpoint {
        Endpoint::new(path, noop)
    }

    #[test]
    fn nested_groups_concatenate_prefixes_exactly() {
        let mut routes = RouteTableBuilder::new();
        let mut api = routes.group("/api");
        let mut v1 = api.group("/v1");
        v1.get(endpoint("/users"));

        assert_eq!(routes.paths(), ["/api/v1/users"]);
    }

    #[test]
    fn prefix_concatenation_does_not_normalise_slashes() {
        let mut routes = RouteTableBuilder::new();
        routes.group("").get(endpoint("/a"));
        routes.group("/").get(endpoint("b"));
        routes.group("/x/").get(endpoint("/c"));
        routes.group("/api").get(endpoint(""));
        routes.group("/api").get(endpoint("users"));

        assert_eq!(routes.paths(), ["/a", "/b", "/x//c", "/api", "/apiusers"]);
    }

    #[test]
    fn options_through_a_group_is_prefixed_like_every_verb() {
        let mut routes = RouteTableBuilder::new();
        let mut api = routes.group("/api");
        api.get(endpoint("/r"))
            .post(endpoint("/r"))
            .put(endpoint("/r"))
            .patch(endpoint("/r"))
            .delete(endpoint("/r"))
            .head(endpoint("/r"))
            .options(endpoint("/r"));

        let paths = routes.paths();
        assert_eq!(paths.len(), 7);
        assert!(paths.iter().all(|p| p == "/api/r"), "{paths:?}");
        let policies = routes.policies();
        assert_eq!(policies.last().map(|p| p.method), Some(Method::Options));
    }

    #[test]
    fn paths_keep_registration_order() {
        let mut routes = RouteTableBuilder::new();
        routes.post(endpoint("/z")).get(endpoint("/a")).delete(endpoint("/m"));
        routes.group("/g").get(endpoint("/b"));

        assert_eq!(routes.paths(), ["/z", "/a", "/m", "/g/b"]);
    }

    #[test]
    fn duplicate_routes_are_rejected() {
        let mut routes = RouteTableBuilder::new();
        routes.get(endpoint("/users"));
        routes.group("/us").get(endpoint("ers"));

        match routes.build() {
            Err(Error::DuplicateRoute { method, path }) => {
                assert_eq!(method, Method::Get);
                assert_eq!(path, "/users");
            }
            other => panic!("expected duplicate route error, got {:?}", other.err()),
        }
    }

    #[test]
    fn same_path_under_different_verbs_is_fine() {
        let mut routes = RouteTableBuilder::new();
        routes.get(endpoint("/users")).post(endpoint("/users"));
        assert!(routes.build().is_ok());
    }

    #[test]
    fn relative_and_conflicting_paths_are_rejected() {
        let mut routes = RouteTableBuilder::new();
        routes.get(endpoint("users"));
        assert!(matches!(routes.build(), Err(Error::InvalidRoute { .. })));

        let mut routes = RouteTableBuilder::new();
        routes.get(endpoint("/users/{id}")).get(endpoint("/users/{name}"));
        assert!(matches!(routes.build(), Err(Error::InvalidRoute { .. })));
    }

    #[tokio::test]
    async fn lookup_reports_pattern_params_and_misses() {
        let mut routes = RouteTableBuilder::new();
        routes.get(endpoint("/users/{id}"));
        let table = routes.build().unwrap();

        match table.lookup(&http::Method::GET, "/users/42") {
            Lookup::Found { pattern, handler, params } => {
                assert_eq!(&*pattern, "/users/{id}");
                assert_eq!(params.get("id").map(String::as_str), Some("42"));
                let res = handler.call(request("GET", "/users/42", "")).await.unwrap();
                assert_eq!(res.body().as_ref(), b"noop");
            }
            _ => panic!("expected a match"),
        }
        assert!(matches!(table.lookup(&http::Method::POST, "/users/42"), Lookup::MethodNotAllowed));
        assert!(matches!(table.lookup(&http::Method::TRACE, "/users/42"), Lookup::MethodNotAllowed));
        assert!(matches!(table.lookup(&http::Method::GET, "/nope"), Lookup::NotFound));
    }
}
