//! Router core - hot path for request routing.

use http::Method;
use regex::Regex;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, warn};

/// Maximum number of path parameters before heap allocation.
/// Most route tables here have ≤4 path params (e.g., `/users/:id/orders/:oid`).
pub const MAX_INLINE_PARAMS: usize = 8;

/// Stack-allocated parameter storage for the hot path.
///
/// Param names use `Arc<str>` because they come from the static route table
/// (known at registration); values are per-request data from the URL.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// A registered route: method, compiled path pattern, and the handler it
/// dispatches to.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: Method,
    /// Original pattern as registered (e.g., `/users/:userId/orders/:orderId`).
    pub pattern: Arc<str>,
    regex: Regex,
    param_names: Vec<Arc<str>>,
    pub handler_name: Arc<str>,
}

impl Route {
    /// Compile a route. Panics on a malformed pattern, which surfaces at
    /// registration time rather than per request.
    pub fn new(method: Method, pattern: &str, handler_name: Arc<str>) -> Self {
        let (regex, param_names) = path_to_regex(pattern);
        Route {
            method,
            pattern: Arc::from(pattern),
            regex,
            param_names,
            handler_name,
        }
    }
}

/// Result of successfully matching a request path to a route.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// Name of the handler that should process this request.
    pub handler_name: Arc<str>,
    /// The matched route pattern (used for logging and metrics, where the
    /// actual path would explode cardinality).
    pub pattern: Arc<str>,
    /// Path parameters extracted from the URL (e.g., `:id` → `("id", "123")`).
    pub path_params: ParamVec,
}

impl RouteMatch {
    /// Get a path parameter by name.
    ///
    /// Uses "last write wins" semantics: if duplicate parameter names exist
    /// at different path depths, the deepest occurrence is returned.
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Regex-table router. Routes are scanned linearly in registration order and
/// the first match wins; tables in this crate are small enough that a prefix
/// tree would not pay for itself.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    #[must_use]
    pub fn new(routes: Vec<Route>) -> Self {
        debug!(routes_count = routes.len(), "routing table loaded");
        Router { routes }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Iterate registered routes in registration order.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    /// Add a route to the table. Registering the same method and pattern
    /// again replaces the earlier entry in place, keeping its position.
    pub fn add(&mut self, route: Route) {
        if let Some(existing) = self
            .routes
            .iter_mut()
            .find(|r| r.method == route.method && r.pattern == route.pattern)
        {
            warn!(
                method = %route.method,
                pattern = %route.pattern,
                "route registered twice, replacing the earlier handler"
            );
            *existing = route;
            return;
        }
        debug!(
            method = %route.method,
            pattern = %route.pattern,
            handler_name = %route.handler_name,
            "route registered"
        );
        self.routes.push(route);
    }

    /// Match an HTTP request to a route.
    ///
    /// The path must already be stripped of its query string. A path that
    /// matches a pattern under a different method is a plain miss (404, not
    /// 405), matching the rest of this harness.
    #[must_use]
    pub fn route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        for route in &self.routes {
            if route.method != *method {
                continue;
            }
            let Some(caps) = route.regex.captures(path) else {
                continue;
            };
            let mut path_params = ParamVec::new();
            for (i, name) in route.param_names.iter().enumerate() {
                if let Some(m) = caps.get(i + 1) {
                    path_params.push((Arc::clone(name), m.as_str().to_string()));
                }
            }
            debug!(
                method = %method,
                path = %path,
                pattern = %route.pattern,
                handler_name = %route.handler_name,
                "route matched"
            );
            return Some(RouteMatch {
                handler_name: Arc::clone(&route.handler_name),
                pattern: Arc::clone(&route.pattern),
                path_params,
            });
        }
        debug!(method = %method, path = %path, "no route matched");
        None
    }
}

/// Convert a route pattern to a regex and extract parameter names.
///
/// `:name` segments match one non-empty path segment; a trailing `*` segment
/// captures the remainder of the path under the name `*`. Literal segments
/// are regex-escaped.
pub(crate) fn path_to_regex(path: &str) -> (Regex, Vec<Arc<str>>) {
    if path == "/" {
        return (
            Regex::new(r"^/$").expect("failed to compile route regex"),
            Vec::new(),
        );
    }

    let mut pattern = String::with_capacity(path.len() + 8);
    pattern.push('^');
    let mut param_names: Vec<Arc<str>> = Vec::new();

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for (i, segment) in segments.iter().enumerate() {
        let is_last = i + 1 == segments.len();
        if let Some(name) = segment.strip_prefix(':') {
            pattern.push_str("/([^/]+)");
            param_names.push(Arc::from(name));
        } else if *segment == "*" && is_last {
            pattern.push_str("/(.*)");
            param_names.push(Arc::from("*"));
        } else {
            pattern.push('/');
            pattern.push_str(&regex::escape(segment));
        }
    }

    pattern.push('$');
    let regex = Regex::new(&pattern).expect("failed to compile route regex");

    (regex, param_names)
}
