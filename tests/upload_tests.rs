//! Multipart upload flow: request body in, saved file on disk out.

use std::fs;
use std::path::PathBuf;

use mayfly::{App, HandlerError, Reply};

mod common;
use common::fixture::TestApp;
use common::http::{parse_response, post, send_request};

const BOUNDARY: &str = "------------------------d74496d66958873e";

fn multipart_body(parts: &[(&str, Option<&str>, &str)]) -> String {
    let mut body = String::new();
    for (name, filename, content) in parts {
        body.push_str(&format!("--{BOUNDARY}\r\n"));
        match filename {
            Some(f) => body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n\r\n"
            )),
            None => body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
            )),
        }
        body.push_str(content);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    body
}

fn upload_app(dir: PathBuf) -> App {
    let mut app = App::new();
    app.post("/upload", move |ctx| {
        let form = ctx.multipart()?;
        let file = form
            .file("file")
            .ok_or_else(|| HandlerError::Message("missing file field".to_string()))?;
        file.save_to(&dir)?;
        Ok(Reply::text("Upload Success"))
    });
    app
}

#[test]
fn test_upload_saves_file() {
    let dir = tempfile::tempdir().unwrap();
    let app = upload_app(dir.path().to_path_buf());
    let server = TestApp::spawn(&app);

    let body = multipart_body(&[(
        "file",
        Some("contoh.txt"),
        "this is sample text file for upload",
    )]);
    let ct = format!("multipart/form-data; boundary={BOUNDARY}");
    let req = post("/upload", &ct, &body);
    let resp = send_request(&server.addr(), &req);

    let (status, _, reply_body) = parse_response(&resp);
    assert_eq!(status, 200);
    assert_eq!(reply_body, "Upload Success");

    let saved = fs::read(dir.path().join("contoh.txt")).unwrap();
    assert_eq!(saved, b"this is sample text file for upload");
}

#[test]
fn test_upload_without_file_field_fails() {
    let dir = tempfile::tempdir().unwrap();
    let app = upload_app(dir.path().to_path_buf());
    let server = TestApp::spawn(&app);

    let body = multipart_body(&[("name", None, "Eko")]);
    let ct = format!("multipart/form-data; boundary={BOUNDARY}");
    let req = post("/upload", &ct, &body);
    let resp = send_request(&server.addr(), &req);

    let (status, _, reply_body) = parse_response(&resp);
    assert_eq!(status, 500);
    assert!(
        reply_body.contains("missing file field"),
        "body was: {reply_body}"
    );
}

#[test]
fn test_upload_filename_cannot_escape_the_directory() {
    let dir = tempfile::tempdir().unwrap();
    let app = upload_app(dir.path().to_path_buf());
    let server = TestApp::spawn(&app);

    let body = multipart_body(&[("file", Some("../escape.txt"), "sneaky")]);
    let ct = format!("multipart/form-data; boundary={BOUNDARY}");
    let req = post("/upload", &ct, &body);
    let resp = send_request(&server.addr(), &req);

    let (status, _, _) = parse_response(&resp);
    assert_eq!(status, 200);
    assert!(dir.path().join("escape.txt").exists());
    assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
}

#[test]
fn test_upload_with_extra_text_fields() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = App::new();
    let save_dir = dir.path().to_path_buf();
    app.post("/upload", move |ctx| {
        let form = ctx.multipart()?;
        let from = form.value("from").unwrap_or("anonymous").to_string();
        let file = form
            .file("file")
            .ok_or_else(|| HandlerError::Message("missing file field".to_string()))?;
        file.save_to(&save_dir)?;
        Ok(Reply::text(format!("Upload Success from {from}")))
    });
    let server = TestApp::spawn(&app);

    let body = multipart_body(&[
        ("from", None, "Eko"),
        ("file", Some("notes.txt"), "some notes"),
    ]);
    let ct = format!("multipart/form-data; boundary={BOUNDARY}");
    let req = post("/upload", &ct, &body);
    let resp = send_request(&server.addr(), &req);

    let (status, _, reply_body) = parse_response(&resp);
    assert_eq!(status, 200);
    assert_eq!(reply_body, "Upload Success from Eko");
    assert_eq!(fs::read(dir.path().join("notes.txt")).unwrap(), b"some notes");
}
