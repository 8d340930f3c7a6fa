//! # App Module
//!
//! The assembly layer: an [`App`] owns the routing table, the dispatcher,
//! and the static mounts, and turns them into a running server.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mayfly::app::{App, AppConfig};
//! use mayfly::dispatcher::Reply;
//!
//! let mut app = App::with_config(AppConfig::default());
//! app.get("/hello", |ctx| {
//!     let name = ctx.query_or("name", "Guest");
//!     Ok(Reply::text(format!("Hello {name}")))
//! });
//! app.listen("127.0.0.1:3000").unwrap();
//! ```
//!
//! Registration compiles the route and pre-spawns its handler coroutine in
//! one step, so the router and the dispatcher can never disagree about what
//! is registered. [`listen`](App::listen) drives the process role: with
//! prefork enabled the first process becomes the supervisor and its children
//! serve the shared listener.

use std::io;
use std::net::{TcpListener, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context;
use http::Method;
use tracing::info;

use crate::dispatcher::{Dispatcher, Reply, RequestCtx};
use crate::error::{ErrorHandler, HandlerError};
use crate::middleware::Middleware;
use crate::prefork;
use crate::router::{Route, Router};
use crate::runtime_config::RuntimeConfig;
use crate::server::{AppService, HttpServer, ServerConfig, ServerHandle, StaticMount};
use crate::static_files::StaticFiles;
use crate::views::ViewEngine;

/// Application settings, all optional.
///
/// Timeouts are socket deadlines: `read_timeout` bounds reading a request,
/// `idle_timeout` bounds the keep-alive wait between requests, and
/// `write_timeout` bounds writing a response. `None` leaves the socket
/// unbounded.
#[derive(Clone, Default)]
pub struct AppConfig {
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    /// Serve from multiple worker processes sharing one listener.
    pub prefork: bool,
    /// Worker processes when preforking; 0 means one per cpu.
    pub workers: usize,
    /// Connection threads per process; 0 derives from available parallelism.
    pub connection_threads: usize,
    /// Maps handler errors (and recovered panics) to replies. Defaults to
    /// the error's status with its message as plain text.
    pub error_handler: Option<ErrorHandler>,
    /// Template engine for `Reply::view` bodies.
    pub views: Option<ViewEngine>,
}

/// Routes, handlers, middleware, and static mounts, ready to serve.
pub struct App {
    router: Arc<RwLock<Router>>,
    dispatcher: Arc<RwLock<Dispatcher>>,
    static_mounts: Vec<StaticMount>,
    config: AppConfig,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    /// Build an app from settings. The coroutine runtime is configured here,
    /// before any handler coroutine spawns, and the error handler and view
    /// engine are installed before any registration can capture them.
    #[must_use]
    pub fn with_config(config: AppConfig) -> Self {
        RuntimeConfig::from_env().apply();
        let mut dispatcher = Dispatcher::new();
        if let Some(handler) = &config.error_handler {
            dispatcher.set_error_handler(Arc::clone(handler));
        }
        if let Some(views) = &config.views {
            dispatcher.set_views(Arc::new(views.clone()));
        }
        App {
            router: Arc::new(RwLock::new(Router::new(Vec::new()))),
            dispatcher: Arc::new(RwLock::new(dispatcher)),
            static_mounts: Vec::new(),
            config,
        }
    }

    /// Register a route and spawn its handler coroutine.
    ///
    /// The handler name is `"{method} {path}"`; registering the same method
    /// and path again replaces both the route entry and the handler.
    pub fn route<F>(&mut self, method: Method, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&RequestCtx) -> Result<Reply, HandlerError> + Send + 'static,
    {
        let name: Arc<str> = Arc::from(format!("{method} {path}").as_str());
        self.router
            .write()
            .unwrap()
            .add(Route::new(method, path, Arc::clone(&name)));
        // SAFETY: the runtime config was applied in the constructor, before
        // any coroutine spawns.
        unsafe {
            self.dispatcher
                .write()
                .unwrap()
                .register_handler(name, handler);
        }
        self
    }

    pub fn get<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&RequestCtx) -> Result<Reply, HandlerError> + Send + 'static,
    {
        self.route(Method::GET, path, handler)
    }

    pub fn post<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&RequestCtx) -> Result<Reply, HandlerError> + Send + 'static,
    {
        self.route(Method::POST, path, handler)
    }

    pub fn put<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&RequestCtx) -> Result<Reply, HandlerError> + Send + 'static,
    {
        self.route(Method::PUT, path, handler)
    }

    pub fn delete<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&RequestCtx) -> Result<Reply, HandlerError> + Send + 'static,
    {
        self.route(Method::DELETE, path, handler)
    }

    pub fn patch<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&RequestCtx) -> Result<Reply, HandlerError> + Send + 'static,
    {
        self.route(Method::PATCH, path, handler)
    }

    pub fn head<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&RequestCtx) -> Result<Reply, HandlerError> + Send + 'static,
    {
        self.route(Method::HEAD, path, handler)
    }

    /// Open a route group under `prefix`. Routes and middleware registered
    /// through the group are scoped below it; groups nest.
    pub fn group(&mut self, prefix: &str) -> RouteGroup<'_> {
        RouteGroup {
            prefix: normalize_prefix(prefix),
            app: self,
        }
    }

    /// Serve files from `dir` under `prefix`. Mounts are checked before
    /// routing for GET and HEAD; a miss falls through to the routes.
    pub fn static_dir<P: Into<PathBuf>>(&mut self, prefix: &str, dir: P) -> &mut Self {
        self.static_mounts.push(StaticMount {
            prefix: normalize_prefix(prefix),
            files: StaticFiles::new(dir),
        });
        self
    }

    /// Install middleware for every request.
    pub fn use_middleware(&mut self, mw: Arc<dyn Middleware>) -> &mut Self {
        self.dispatcher.write().unwrap().add_middleware("", mw);
        self
    }

    /// Serve on `addr` until shutdown.
    ///
    /// With prefork enabled the calling process binds the listener, becomes
    /// the supervisor, and re-executes itself into worker children that
    /// serve the inherited socket. Without it this process serves directly.
    pub fn listen(&self, addr: &str) -> anyhow::Result<()> {
        if self.config.prefork && !prefork::is_child() {
            let listener = TcpListener::bind(addr)
                .with_context(|| format!("binding listener on {addr}"))?;
            let workers = self.resolved_workers();
            info!(addr, workers, pid = std::process::id(), "prefork supervisor up");
            return prefork::supervise(listener, workers);
        }

        let handle = if prefork::is_child() {
            let listener =
                prefork::inherited_listener().context("adopting inherited listener")?;
            info!(pid = std::process::id(), "worker serving inherited listener");
            HttpServer(self.service()).start_on(listener, self.server_config())?
        } else {
            let handle = HttpServer(self.service()).start(addr, self.server_config())?;
            info!(addr = %handle.addr(), pid = std::process::id(), "serving");
            handle
        };
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("server thread panicked"))
    }

    /// Start serving in background threads and hand back the handle.
    /// Prefork does not apply here; tests and embedders drive one process.
    pub fn spawn<A: ToSocketAddrs>(&self, addr: A) -> io::Result<ServerHandle> {
        HttpServer(self.service()).start(addr, self.server_config())
    }

    fn service(&self) -> AppService {
        AppService::new(
            Arc::clone(&self.router),
            Arc::clone(&self.dispatcher),
            self.static_mounts.clone(),
        )
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            read_timeout: self.config.read_timeout,
            write_timeout: self.config.write_timeout,
            idle_timeout: self.config.idle_timeout,
            connection_threads: self.config.connection_threads,
        }
    }

    fn resolved_workers(&self) -> usize {
        if self.config.workers > 0 {
            return self.config.workers;
        }
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
    }
}

/// Routes and middleware under a shared path prefix.
pub struct RouteGroup<'a> {
    app: &'a mut App,
    prefix: String,
}

impl RouteGroup<'_> {
    /// Open a nested group; prefixes compose.
    pub fn group(&mut self, prefix: &str) -> RouteGroup<'_> {
        let prefix = join_paths(&self.prefix, &normalize_prefix(prefix));
        RouteGroup {
            app: self.app,
            prefix,
        }
    }

    pub fn route<F>(&mut self, method: Method, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&RequestCtx) -> Result<Reply, HandlerError> + Send + 'static,
    {
        let full = join_paths(&self.prefix, path);
        self.app.route(method, &full, handler);
        self
    }

    pub fn get<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&RequestCtx) -> Result<Reply, HandlerError> + Send + 'static,
    {
        self.route(Method::GET, path, handler)
    }

    pub fn post<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&RequestCtx) -> Result<Reply, HandlerError> + Send + 'static,
    {
        self.route(Method::POST, path, handler)
    }

    pub fn put<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&RequestCtx) -> Result<Reply, HandlerError> + Send + 'static,
    {
        self.route(Method::PUT, path, handler)
    }

    pub fn delete<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&RequestCtx) -> Result<Reply, HandlerError> + Send + 'static,
    {
        self.route(Method::DELETE, path, handler)
    }

    pub fn patch<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&RequestCtx) -> Result<Reply, HandlerError> + Send + 'static,
    {
        self.route(Method::PATCH, path, handler)
    }

    pub fn head<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&RequestCtx) -> Result<Reply, HandlerError> + Send + 'static,
    {
        self.route(Method::HEAD, path, handler)
    }

    /// Install middleware scoped to this group's prefix.
    pub fn use_middleware(&mut self, mw: Arc<dyn Middleware>) -> &mut Self {
        self.app
            .dispatcher
            .write()
            .unwrap()
            .add_middleware(self.prefix.clone(), mw);
        self
    }
}

/// `""` stays global; everything else gets a leading slash and loses any
/// trailing one.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn join_paths(prefix: &str, path: &str) -> String {
    if path.is_empty() || path == "/" {
        if prefix.is_empty() {
            return "/".to_string();
        }
        return prefix.to_string();
    }
    if path.starts_with('/') {
        format!("{prefix}{path}")
    } else {
        format!("{prefix}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix("/api"), "/api");
        assert_eq!(normalize_prefix("api"), "/api");
        assert_eq!(normalize_prefix("/api/"), "/api");
    }

    #[test]
    fn test_join_paths() {
        assert_eq!(join_paths("/api", "/hello"), "/api/hello");
        assert_eq!(join_paths("/api", "hello"), "/api/hello");
        assert_eq!(join_paths("/api", "/"), "/api");
        assert_eq!(join_paths("", "/hello"), "/hello");
        assert_eq!(join_paths("", "/"), "/");
    }

    #[test]
    fn test_registration_keeps_router_and_dispatcher_in_step() {
        let mut app = App::new();
        app.get("/hello", |_ctx| Ok(Reply::text("hi")));
        app.post("/hello", |_ctx| Ok(Reply::text("hi")));
        assert_eq!(app.router.read().unwrap().len(), 2);
        assert_eq!(app.dispatcher.read().unwrap().handler_count(), 2);
    }

    #[test]
    fn test_group_routes_carry_the_prefix() {
        let mut app = App::new();
        {
            let mut api = app.group("/api");
            api.get("/hello", |_ctx| Ok(Reply::text("from api")));
            let mut nested = api.group("/v2");
            nested.get("/hello", |_ctx| Ok(Reply::text("from v2")));
        }
        let router = app.router.read().unwrap();
        let patterns: Vec<String> = router.routes().map(|r| r.pattern.to_string()).collect();
        assert!(patterns.contains(&"/api/hello".to_string()));
        assert!(patterns.contains(&"/api/v2/hello".to_string()));
    }

    #[test]
    fn test_duplicate_registration_replaces() {
        let mut app = App::new();
        app.get("/x", |_ctx| Ok(Reply::text("one")));
        app.get("/x", |_ctx| Ok(Reply::text("two")));
        assert_eq!(app.router.read().unwrap().len(), 1);
        assert_eq!(app.dispatcher.read().unwrap().handler_count(), 1);
    }
}
