//! Connection-level behavior: timeouts, malformed input, shutdown, and
//! concurrent connections.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use mayfly::{App, AppConfig, Reply};

mod common;
use common::fixture::TestApp;
use common::http::{get, parse_response, post, read_response, send_request};

#[test]
fn test_idle_timeout_closes_keep_alive_connections() {
    let config = AppConfig {
        idle_timeout: Some(Duration::from_millis(300)),
        ..AppConfig::default()
    };
    let mut app = App::with_config(config);
    app.get("/ping", |_ctx| Ok(Reply::text("pong")));
    let server = TestApp::spawn(&app);

    let mut stream = TcpStream::connect(server.addr()).unwrap();
    stream
        .write_all(b"GET /ping HTTP/1.1\r\nHost: test\r\n\r\n")
        .unwrap();
    let first = read_response(&mut stream);
    assert!(first.contains("pong"));

    // Nothing else is sent; the server should hang up on its own.
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let mut buf = [0u8; 16];
    match stream.read(&mut buf) {
        Ok(0) => {}
        other => panic!("expected server-side close, got {other:?}"),
    }
}

#[test]
fn test_malformed_request_is_a_400() {
    let mut app = App::new();
    app.get("/ping", |_ctx| Ok(Reply::text("pong")));
    let server = TestApp::spawn(&app);

    let resp = send_request(&server.addr(), "NOT A REQUEST\r\n\r\n");
    let (status, _, body) = parse_response(&resp);
    assert_eq!(status, 400);
    assert_eq!(body, "Bad Request");
}

#[test]
fn test_stop_releases_the_listener() {
    let mut app = App::new();
    app.get("/ping", |_ctx| Ok(Reply::text("pong")));
    let handle = app.spawn("127.0.0.1:0").unwrap();
    handle.wait_ready().unwrap();
    let addr = handle.addr();

    let resp = send_request(&addr, &get("/ping"));
    assert!(resp.contains("pong"));

    handle.stop();
    assert!(TcpStream::connect(addr).is_err());
}

#[test]
fn test_large_body_is_read_fully() {
    let mut app = App::new();
    app.post("/size", |ctx| {
        Ok(Reply::text(format!("{} bytes", ctx.body().len())))
    });
    let server = TestApp::spawn(&app);

    let payload = "x".repeat(100_000);
    let req = post("/size", "application/octet-stream", &payload);
    let resp = send_request(&server.addr(), &req);
    let (status, _, body) = parse_response(&resp);
    assert_eq!(status, 200);
    assert_eq!(body, "100000 bytes");
}

#[test]
fn test_concurrent_connections_all_get_answers() {
    let mut app = App::new();
    app.get("/ping", |_ctx| Ok(Reply::text("pong")));
    let server = TestApp::spawn(&app);
    let addr = server.addr();

    let threads: Vec<_> = (0..4)
        .map(|_| {
            std::thread::spawn(move || {
                let resp = send_request(&addr, &get("/ping"));
                let (status, _, body) = parse_response(&resp);
                (status, body)
            })
        })
        .collect();

    for t in threads {
        let (status, body) = t.join().unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "pong");
    }
}

#[test]
fn test_http_10_closes_after_the_reply() {
    let mut app = App::new();
    app.get("/ping", |_ctx| Ok(Reply::text("pong")));
    let server = TestApp::spawn(&app);

    let mut stream = TcpStream::connect(server.addr()).unwrap();
    stream
        .write_all(b"GET /ping HTTP/1.0\r\nHost: test\r\n\r\n")
        .unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let mut resp = String::new();
    stream.read_to_string(&mut resp).unwrap();
    assert!(resp.contains("pong"));
    assert!(resp.contains("Connection: close"));
}
