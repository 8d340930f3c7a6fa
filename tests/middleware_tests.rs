//! Middleware hooks: metrics collection, short-circuiting, and prefix
//! scoping through groups.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mayfly::middleware::{MetricsMiddleware, Middleware, RequestLogMiddleware};
use mayfly::{App, Reply, RequestCtx};

mod common;
use common::fixture::TestApp;
use common::http::{get, parse_response, send_request};

/// Rejects anything that does not carry `x-token: secret`.
struct TokenGate;

impl Middleware for TokenGate {
    fn before(&self, ctx: &RequestCtx) -> Option<Reply> {
        match ctx.header("x-token") {
            Some("secret") => None,
            _ => Some(Reply::error(401, "unauthorized")),
        }
    }
}

fn get_with_token(path: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\nHost: localhost\r\nx-token: secret\r\nConnection: close\r\n\r\n"
    )
}

#[test]
fn test_metrics_middleware_counts_requests_and_errors() {
    let metrics = Arc::new(MetricsMiddleware::new());
    let mut app = App::new();
    app.use_middleware(Arc::clone(&metrics) as Arc<dyn Middleware>);
    app.get("/ok", |_ctx| Ok(Reply::text("ok")));
    app.get("/fail", |_ctx| Err::<Reply, _>("nope".into()));
    let server = TestApp::spawn(&app);

    let _ = send_request(&server.addr(), &get("/ok"));
    let _ = send_request(&server.addr(), &get("/ok"));
    let _ = send_request(&server.addr(), &get("/fail"));

    assert_eq!(metrics.request_count(), 3);
    assert_eq!(metrics.error_count(), 1);
}

#[test]
fn test_metrics_latency_covers_handler_time() {
    let metrics = Arc::new(MetricsMiddleware::new());
    let mut app = App::new();
    app.use_middleware(Arc::clone(&metrics) as Arc<dyn Middleware>);
    app.get("/slow", |_ctx| {
        may::coroutine::sleep(Duration::from_millis(20));
        Ok(Reply::text("done"))
    });
    let server = TestApp::spawn(&app);

    let _ = send_request(&server.addr(), &get("/slow"));

    assert!(metrics.average_latency() >= Duration::from_millis(10));
}

#[test]
fn test_before_short_circuits_the_handler() {
    let hits = Arc::new(AtomicUsize::new(0));
    let handler_hits = Arc::clone(&hits);
    let mut app = App::new();
    app.use_middleware(Arc::new(TokenGate));
    app.get("/count", move |_ctx| {
        handler_hits.fetch_add(1, Ordering::SeqCst);
        Ok(Reply::text("counted"))
    });
    let server = TestApp::spawn(&app);

    let resp = send_request(&server.addr(), &get("/count"));
    let (status, _, _) = parse_response(&resp);
    assert_eq!(status, 401);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    let resp = send_request(&server.addr(), &get_with_token("/count"));
    let (status, _, body) = parse_response(&resp);
    assert_eq!(status, 200);
    assert_eq!(body, "counted");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_group_scoped_middleware_only_guards_its_prefix() {
    let mut app = App::new();
    app.get("/web/hello", |_ctx| Ok(Reply::text("open")));
    {
        let mut api = app.group("/api");
        api.use_middleware(Arc::new(TokenGate));
        api.get("/hello", |_ctx| Ok(Reply::text("guarded")));
    }
    let server = TestApp::spawn(&app);

    let resp = send_request(&server.addr(), &get("/api/hello"));
    let (status, _, _) = parse_response(&resp);
    assert_eq!(status, 401);

    let resp = send_request(&server.addr(), &get_with_token("/api/hello"));
    let (status, _, body) = parse_response(&resp);
    assert_eq!(status, 200);
    assert_eq!(body, "guarded");

    let resp = send_request(&server.addr(), &get("/web/hello"));
    let (status, _, body) = parse_response(&resp);
    assert_eq!(status, 200);
    assert_eq!(body, "open");
}

#[test]
fn test_request_log_middleware_leaves_replies_alone() {
    let mut app = App::new();
    app.use_middleware(Arc::new(RequestLogMiddleware));
    app.get("/hello", |_ctx| Ok(Reply::text("hi")));
    let server = TestApp::spawn(&app);

    let resp = send_request(&server.addr(), &get("/hello"));
    let (status, _, body) = parse_response(&resp);
    assert_eq!(status, 200);
    assert_eq!(body, "hi");
}
