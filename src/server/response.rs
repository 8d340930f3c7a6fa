use serde_json::Value;

use crate::dispatcher::{Reply, ReplyBody};

/// Reason phrase for a status code.
#[must_use]
pub fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

/// Response under construction for one request: status, headers, body.
/// Serialization appends `Content-Length` and the `Connection` header, so
/// neither should be set by hand.
#[derive(Debug)]
pub struct WireResponse {
    status: u16,
    reason: &'static str,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Default for WireResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl WireResponse {
    #[must_use]
    pub fn new() -> Self {
        WireResponse {
            status: 200,
            reason: "OK",
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn status_code(&mut self, status: u16) {
        self.status = status;
        self.reason = status_reason(status);
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn body_vec(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Serialize to wire bytes. `include_body` is false for HEAD responses,
    /// which keep their `Content-Length` but carry no payload.
    #[must_use]
    pub fn serialize(&self, keep_alive: bool, include_body: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", self.status, self.reason).as_bytes());
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        if !keep_alive {
            out.extend_from_slice(b"Connection: close\r\n");
        }
        out.extend_from_slice(b"\r\n");
        if include_body {
            out.extend_from_slice(&self.body);
        }
        out
    }
}

/// Map a handler reply onto the wire response.
///
/// Text writes `text/plain`, JSON `application/json`, bytes their own
/// content type; a content-type header already present on the reply wins.
/// `View` never reaches this point under normal operation (the dispatcher
/// renders views); if one does, it degrades to a 500.
pub fn write_reply(res: &mut WireResponse, reply: Reply) {
    res.status_code(reply.status);
    let mut content_type_set = false;
    for (name, value) in &reply.headers {
        if name.eq_ignore_ascii_case("content-type") {
            content_type_set = true;
        }
        res.header(name, value);
    }

    match reply.body {
        ReplyBody::Empty => {}
        ReplyBody::Text(s) => {
            if !content_type_set {
                res.header("Content-Type", "text/plain");
            }
            res.body_vec(s.into_bytes());
        }
        ReplyBody::Json(value) => {
            if !content_type_set {
                res.header("Content-Type", "application/json");
            }
            res.body_vec(value.to_string().into_bytes());
        }
        ReplyBody::Bytes { content_type, data } => {
            if !content_type_set {
                res.header("Content-Type", &content_type);
            }
            res.body_vec(data);
        }
        ReplyBody::View { name, .. } => {
            write_json_error(
                res,
                500,
                serde_json::json!({ "error": format!("unrendered view: {name}") }),
            );
        }
    }
}

/// Standard JSON error body.
pub fn write_json_error(res: &mut WireResponse, status: u16, body: Value) {
    res.status_code(status);
    res.header("Content-Type", "application/json");
    res.body_vec(body.to_string().into_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reason() {
        assert_eq!(status_reason(200), "OK");
        assert_eq!(status_reason(404), "Not Found");
        assert_eq!(status_reason(503), "Service Unavailable");
    }

    #[test]
    fn test_serialize_sets_length_and_close() {
        let mut res = WireResponse::new();
        res.status_code(200);
        res.header("Content-Type", "text/plain");
        res.body_vec(b"Hello World".to_vec());

        let bytes = res.serialize(false, true);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\nHello World"));
    }

    #[test]
    fn test_serialize_head_omits_body() {
        let mut res = WireResponse::new();
        res.body_vec(b"payload".to_vec());
        let text = String::from_utf8(res.serialize(true, false)).unwrap();
        assert!(text.contains("Content-Length: 7\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_write_reply_text() {
        let mut res = WireResponse::new();
        write_reply(&mut res, Reply::text("Hi Eko"));
        assert_eq!(res.status(), 200);
        assert_eq!(res.body(), b"Hi Eko");
    }

    #[test]
    fn test_write_reply_json_sorted() {
        let mut res = WireResponse::new();
        write_reply(
            &mut res,
            Reply::json(serde_json::json!({ "username": "khan", "name": "Eko Khan" })),
        );
        assert_eq!(res.body(), br#"{"name":"Eko Khan","username":"khan"}"#);
    }

    #[test]
    fn test_write_reply_respects_existing_content_type() {
        let mut res = WireResponse::new();
        write_reply(
            &mut res,
            Reply::text("<h1>x</h1>").with_header("content-type", "text/html"),
        );
        let text = String::from_utf8(res.serialize(true, true)).unwrap();
        assert!(text.contains("content-type: text/html\r\n"));
        assert!(!text.contains("Content-Type: text/plain"));
    }
}
