//! Dispatcher core - hot path for request dispatch.
//!
//! Handlers run in dedicated `may` coroutines, pre-spawned at registration.
//! A dispatch sends the request context over the handler's channel and blocks
//! on a one-shot reply channel. Failures degrade to replies, never to a dead
//! connection thread: handler errors go through the app error handler, panics
//! are caught in the coroutine, and a closed channel yields a 503.

use http::Method;
use may::coroutine;
use may::sync::mpsc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::error::{default_error_handler, ErrorHandler, HandlerError};
use crate::ids::RequestId;
use crate::middleware::Middleware;
use crate::multipart::MultipartForm;
use crate::router::{ParamVec, RouteMatch};
use crate::runtime_config::RuntimeConfig;
use crate::views::ViewEngine;

/// Maximum inline headers/cookies before heap allocation.
/// Most requests have ≤16 headers.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated header/cookie storage for the hot path.
///
/// Header names use `Arc<str>` because they repeat across requests
/// (content-type, cookie, ...); values are per-request data.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Request data passed to a handler coroutine.
///
/// Carries everything extracted from the wire plus the reply channel the
/// coroutine answers on. Accessors mirror the usual context surface: path
/// and query parameters, headers, cookies, and body binding.
#[derive(Debug, Clone)]
pub struct RequestCtx {
    /// Unique request id for log correlation.
    pub request_id: RequestId,
    pub method: Method,
    /// Actual request path (e.g., `/users/eko/orders/2`).
    pub path: String,
    /// Matched route pattern (e.g., `/users/:userId/orders/:orderId`).
    pub pattern: Arc<str>,
    pub path_params: ParamVec,
    pub query_params: ParamVec,
    pub headers: HeaderVec,
    pub cookies: HeaderVec,
    /// Raw request body. Binding helpers interpret it on demand.
    pub body: Vec<u8>,
    /// Channel the handler coroutine replies on.
    pub reply_tx: mpsc::Sender<Reply>,
}

impl RequestCtx {
    /// Get a path parameter by name.
    ///
    /// Last write wins when duplicate names exist at different depths.
    #[inline]
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a query parameter by name (last write wins on duplicates).
    #[inline]
    #[must_use]
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Query parameter with a fallback, for routes with optional parameters.
    #[inline]
    #[must_use]
    pub fn query_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.query(name).unwrap_or(default)
    }

    /// Get a header by name (case-insensitive per RFC 7230).
    #[inline]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get a cookie by name.
    #[inline]
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    #[inline]
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    #[inline]
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_str(&self) -> Result<&str, HandlerError> {
        std::str::from_utf8(&self.body)
            .map_err(|e| HandlerError::Message(format!("body is not valid utf-8: {e}")))
    }

    /// Form field by name, for urlencoded and multipart bodies alike.
    /// Returns the first value sent under the name.
    #[must_use]
    pub fn form_value(&self, name: &str) -> Option<String> {
        let content_type = self.content_type().unwrap_or("");
        if content_type.starts_with("multipart/form-data") {
            return self
                .multipart()
                .ok()
                .and_then(|form| form.value(name).map(str::to_string));
        }
        url::form_urlencoded::parse(&self.body)
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// Deserialize the raw body as JSON.
    pub fn bind_json<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Content-type driven binding: JSON bodies deserialize directly, form
    /// bodies (urlencoded or multipart) are lifted into a JSON object of
    /// string fields first. Unknown content types are tried as JSON.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        let content_type = self.content_type().unwrap_or("");
        if content_type.starts_with("application/x-www-form-urlencoded") {
            let mut map = serde_json::Map::new();
            for (k, v) in url::form_urlencoded::parse(&self.body) {
                map.insert(k.into_owned(), Value::String(v.into_owned()));
            }
            Ok(serde_json::from_value(Value::Object(map))?)
        } else if content_type.starts_with("multipart/form-data") {
            let form = self.multipart()?;
            let mut map = serde_json::Map::new();
            for (k, v) in form.fields {
                map.insert(k, Value::String(v));
            }
            Ok(serde_json::from_value(Value::Object(map))?)
        } else {
            self.bind_json()
        }
    }

    /// Parse the body as a multipart form.
    pub fn multipart(&self) -> Result<MultipartForm, HandlerError> {
        let content_type = self.content_type().ok_or_else(|| {
            HandlerError::Multipart("missing content-type for multipart body".to_string())
        })?;
        MultipartForm::parse(content_type, &self.body)
    }
}

/// Reply body variants. `Text` writes `text/plain`, `Json` writes
/// `application/json`, `Bytes` carries its own content type, and `View` is
/// rendered to html in the handler coroutine, so render failures go through
/// the app error handler like any other handler error.
#[derive(Debug, Clone)]
pub enum ReplyBody {
    Empty,
    Text(String),
    Json(Value),
    Bytes { content_type: String, data: Vec<u8> },
    View { name: String, ctx: Value },
}

/// Response data sent back from a handler coroutine.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: HeaderVec,
    pub body: ReplyBody,
}

impl Reply {
    /// 200 with a plain text body.
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Reply {
            status: 200,
            headers: HeaderVec::new(),
            body: ReplyBody::Text(body.into()),
        }
    }

    /// 200 with a JSON body. Object keys serialize in sorted order.
    #[must_use]
    pub fn json(body: Value) -> Self {
        Reply {
            status: 200,
            headers: HeaderVec::new(),
            body: ReplyBody::Json(body),
        }
    }

    /// 200 with raw bytes and an explicit content type.
    #[must_use]
    pub fn bytes(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Reply {
            status: 200,
            headers: HeaderVec::new(),
            body: ReplyBody::Bytes {
                content_type: content_type.into(),
                data,
            },
        }
    }

    /// 200 rendering the named view with a JSON context.
    #[must_use]
    pub fn view(name: impl Into<String>, ctx: Value) -> Self {
        Reply {
            status: 200,
            headers: HeaderVec::new(),
            body: ReplyBody::View {
                name: name.into(),
                ctx,
            },
        }
    }

    /// Serve a file as an attachment download. The content type comes from
    /// the file extension; `filename` is what the client is told to save as.
    pub fn download(path: &Path, filename: &str) -> Result<Self, HandlerError> {
        let data = std::fs::read(path)?;
        let content_type = crate::static_files::content_type(path);
        Ok(Reply::bytes(content_type, data).with_header(
            "content-disposition",
            format!("attachment; filename=\"{filename}\""),
        ))
    }

    /// Empty body with the given status.
    #[must_use]
    pub fn empty(status: u16) -> Self {
        Reply {
            status,
            headers: HeaderVec::new(),
            body: ReplyBody::Empty,
        }
    }

    /// JSON error body in the crate's standard shape.
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Reply::json(serde_json::json!({ "error": message })).with_status(status)
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value.into());
        self
    }

    /// Add or replace a header (case-insensitive on the name).
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }

    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Channel sender that feeds requests to a handler coroutine.
pub type HandlerSender = mpsc::Sender<RequestCtx>;

/// Request fields the service extracts from the wire before dispatch.
#[derive(Debug, Clone)]
pub struct RequestParts {
    pub request_id: RequestId,
    pub method: Method,
    pub path: String,
    pub query_params: ParamVec,
    pub headers: HeaderVec,
    pub cookies: HeaderVec,
    pub body: Vec<u8>,
}

/// Dispatcher that routes matched requests to registered handler coroutines.
#[derive(Clone)]
pub struct Dispatcher {
    /// Handler name → channel sender.
    handlers: HashMap<Arc<str>, HandlerSender>,
    /// Middleware with the path prefix it applies to ("" = every request).
    middlewares: Vec<(String, Arc<dyn Middleware>)>,
    error_handler: ErrorHandler,
    views: Option<Arc<ViewEngine>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Dispatcher {
            handlers: HashMap::new(),
            middlewares: Vec::new(),
            error_handler: default_error_handler(),
            views: None,
        }
    }

    /// Install the error mapper applied to handler failures and recovered
    /// panics. Takes effect for handlers registered afterwards, so set it
    /// before any routes.
    pub fn set_error_handler(&mut self, handler: ErrorHandler) {
        self.error_handler = handler;
    }

    /// Install the view engine that renders `Reply::view` bodies. Like the
    /// error handler, it is captured at registration time and only applies
    /// to handlers registered afterwards.
    pub fn set_views(&mut self, views: Arc<ViewEngine>) {
        self.views = Some(views);
    }

    /// Add middleware scoped to a path prefix. The empty prefix applies to
    /// every request; `/api` applies to `/api` and anything below it.
    pub fn add_middleware(&mut self, prefix: impl Into<String>, mw: Arc<dyn Middleware>) {
        self.middlewares.push((prefix.into(), mw));
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Register a handler coroutine under a name.
    ///
    /// Spawns the coroutine immediately; it loops on its request channel
    /// until the dispatcher (and with it the sender) is dropped. Replacing a
    /// name drops the old sender, which lets the old coroutine exit.
    ///
    /// # Safety
    ///
    /// Calls `may::coroutine::Builder::spawn`, which is unsafe in the `may`
    /// runtime. The caller must ensure the runtime configuration (stack
    /// size) is applied before registration, and must not block the
    /// coroutine on ordinary thread synchronization.
    pub unsafe fn register_handler<F>(&mut self, name: Arc<str>, handler_fn: F)
    where
        F: Fn(&RequestCtx) -> Result<Reply, HandlerError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<RequestCtx>();
        let stack_size = RuntimeConfig::from_env().stack_size;
        let error_handler = Arc::clone(&self.error_handler);
        let views = self.views.clone();
        let coroutine_name = name.clone();

        // SAFETY: spawn is unsafe in may; the handler is Send + 'static and
        // every request gets exactly one reply through its channel.
        let spawn_result = unsafe {
            coroutine::Builder::new()
                .stack_size(stack_size)
                .spawn(move || {
                    debug!(
                        handler_name = %coroutine_name,
                        stack_size = stack_size,
                        "handler coroutine started"
                    );
                    for ctx in rx.iter() {
                        let reply = run_handler(&handler_fn, &ctx, &error_handler, views.as_ref());
                        let _ = ctx.reply_tx.send(reply);
                    }
                    debug!(handler_name = %coroutine_name, "handler coroutine exited");
                })
        };

        match spawn_result {
            Ok(_) => {
                if self.handlers.insert(name.clone(), tx).is_some() {
                    warn!(handler_name = %name, "replaced existing handler");
                }
            }
            Err(e) => {
                error!(handler_name = %name, error = %e, "failed to spawn handler coroutine");
            }
        }
    }

    /// Dispatch a matched request to its handler and wait for the reply.
    ///
    /// Returns `None` when no handler is registered under the matched name.
    /// A dead handler (closed channel) yields a 503 reply instead of an
    /// error so the connection can still be answered.
    #[must_use]
    pub fn dispatch(&self, route_match: RouteMatch, parts: RequestParts) -> Option<Reply> {
        let tx = match self.handlers.get(route_match.handler_name.as_ref()) {
            Some(tx) => tx,
            None => {
                error!(
                    handler_name = %route_match.handler_name,
                    registered = self.handlers.len(),
                    "no handler registered for matched route"
                );
                return None;
            }
        };

        let (reply_tx, reply_rx) = mpsc::channel();
        let ctx = RequestCtx {
            request_id: parts.request_id,
            method: parts.method,
            path: parts.path,
            pattern: route_match.pattern,
            path_params: route_match.path_params,
            query_params: parts.query_params,
            headers: parts.headers,
            cookies: parts.cookies,
            body: parts.body,
            reply_tx,
        };

        let mut early: Option<Reply> = None;
        for (prefix, mw) in &self.middlewares {
            if !prefix_matches(prefix, &ctx.path) {
                continue;
            }
            let resp = mw.before(&ctx);
            if early.is_none() {
                early = resp;
            }
        }

        let (mut reply, latency) = match early {
            Some(r) => (r, Duration::ZERO),
            None => {
                let start = Instant::now();
                if tx.send(ctx.clone()).is_err() {
                    error!(
                        request_id = %ctx.request_id,
                        handler_name = %route_match.handler_name,
                        "handler channel closed before send"
                    );
                    return Some(Reply::error(503, "handler is not responding"));
                }
                match reply_rx.recv() {
                    Ok(r) => (r, start.elapsed()),
                    Err(_) => {
                        error!(
                            request_id = %ctx.request_id,
                            handler_name = %route_match.handler_name,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "handler channel closed without reply"
                        );
                        return Some(Reply::error(503, "handler is not responding"));
                    }
                }
            }
        };

        for (prefix, mw) in &self.middlewares {
            if prefix_matches(prefix, &ctx.path) {
                mw.after(&ctx, &mut reply, latency);
            }
        }

        Some(reply)
    }
}

/// Run one request through the handler with panic recovery and error
/// mapping. Always produces a reply.
fn run_handler<F>(
    handler_fn: &F,
    ctx: &RequestCtx,
    error_handler: &ErrorHandler,
    views: Option<&Arc<ViewEngine>>,
) -> Reply
where
    F: Fn(&RequestCtx) -> Result<Reply, HandlerError>,
{
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler_fn(ctx))) {
        Ok(Ok(reply)) => match render_view(reply, views) {
            Ok(reply) => reply,
            Err(err) => {
                debug!(
                    request_id = %ctx.request_id,
                    pattern = %ctx.pattern,
                    error = %err,
                    "view render failed"
                );
                error_handler(ctx, &err)
            }
        },
        Ok(Err(err)) => {
            debug!(
                request_id = %ctx.request_id,
                pattern = %ctx.pattern,
                error = %err,
                "handler returned error"
            );
            error_handler(ctx, &err)
        }
        Err(panic) => {
            let message = panic_message(&panic);
            error!(
                request_id = %ctx.request_id,
                pattern = %ctx.pattern,
                panic = %message,
                "handler panicked"
            );
            let err = HandlerError::Internal(format!("handler panicked: {message}"));
            error_handler(ctx, &err)
        }
    }
}

/// Render a `View` reply to html through the engine; every other body
/// passes through untouched.
fn render_view(mut reply: Reply, views: Option<&Arc<ViewEngine>>) -> Result<Reply, HandlerError> {
    let ReplyBody::View { name, ctx } = &reply.body else {
        return Ok(reply);
    };
    let Some(engine) = views else {
        return Err(HandlerError::Message(format!(
            "view '{name}' requested but no template directory is configured"
        )));
    };
    let html = engine.render(name, ctx)?;
    reply.body = ReplyBody::Bytes {
        content_type: "text/html; charset=utf-8".to_string(),
        data: html.into_bytes(),
    };
    Ok(reply)
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Whether a middleware prefix covers a request path. Matching is segment
/// aware: `/api` covers `/api` and `/api/hello` but not `/apiary`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    path == prefix || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
}
