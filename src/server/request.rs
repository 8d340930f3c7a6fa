use std::collections::HashMap;
use std::io::{self, Read};
use std::net::TcpStream;
use std::time::Duration;

use http::Method;
use tracing::debug;

const MAX_HEADERS: usize = 32;
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Parsed HTTP request data used by `AppService`.
///
/// Headers are lowercased on parse; cookies come from the `cookie` header;
/// query parameters are percent-decoded with `+` as space. The body is kept
/// raw, binding happens on demand in the handler context.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: Method,
    /// Request path with the query string stripped.
    pub path: String,
    /// HTTP minor version (0 for 1.0, 1 for 1.1); drives keep-alive defaults.
    pub version: u8,
    /// HTTP headers (lowercase keys).
    pub headers: HashMap<String, String>,
    /// Parsed cookies from the Cookie header.
    pub cookies: HashMap<String, String>,
    /// Parsed query string parameters (last value wins on duplicates).
    pub query_params: HashMap<String, String>,
    /// Raw request body.
    pub body: Vec<u8>,
}

impl ParsedRequest {
    /// Whether the client expects the connection to stay open after this
    /// request. HTTP/1.1 defaults to keep-alive, HTTP/1.0 to close.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        match self.headers.get("connection").map(String::as_str) {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.version >= 1,
        }
    }
}

/// Split a Cookie header into name/value pairs.
pub fn parse_cookies(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .get("cookie")
        .map(|c| {
            c.split(';')
                .filter_map(|pair| {
                    let mut parts = pair.trim().splitn(2, '=');
                    let name = parts.next()?.trim().to_string();
                    let value = parts.next().unwrap_or("").trim().to_string();
                    Some((name, value))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse query string parameters from a URL path.
///
/// Extracts everything after the `?` and URL-decodes names and values.
pub fn parse_query_params(path: &str) -> HashMap<String, String> {
    if let Some(pos) = path.find('?') {
        let query_str = &path[pos + 1..];
        url::form_urlencoded::parse(query_str.as_bytes())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    } else {
        HashMap::new()
    }
}

/// Read one HTTP/1.1 request from the stream.
///
/// `Ok(None)` means the peer closed cleanly before sending anything (the
/// normal end of a keep-alive connection). The idle timeout governs the wait
/// for the first byte; once bytes are flowing the read timeout takes over.
/// Timeouts surface as `WouldBlock`/`TimedOut` errors for the caller.
pub fn read_request(
    stream: &mut TcpStream,
    idle_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
) -> io::Result<Option<ParsedRequest>> {
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];
    stream.set_read_timeout(idle_timeout)?;

    loop {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parser = httparse::Request::new(&mut headers);
        match parser.parse(&buf) {
            Ok(httparse::Status::Complete(head_len)) => {
                let method = parser
                    .method
                    .unwrap_or("GET")
                    .parse::<Method>()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                let raw_path = parser.path.unwrap_or("/").to_string();
                let version = parser.version.unwrap_or(1);

                let header_map: HashMap<String, String> = parser
                    .headers
                    .iter()
                    .map(|h| {
                        (
                            h.name.to_ascii_lowercase(),
                            String::from_utf8_lossy(h.value).to_string(),
                        )
                    })
                    .collect();

                let content_length = header_map
                    .get("content-length")
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);

                let mut body = buf[head_len..].to_vec();
                while body.len() < content_length {
                    let n = stream.read(&mut chunk)?;
                    if n == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed mid-body",
                        ));
                    }
                    body.extend_from_slice(&chunk[..n]);
                }
                body.truncate(content_length);

                let path = raw_path.split('?').next().unwrap_or("/").to_string();
                let cookies = parse_cookies(&header_map);
                let query_params = parse_query_params(&raw_path);

                debug!(
                    method = %method,
                    path = %path,
                    header_count = header_map.len(),
                    cookie_count = cookies.len(),
                    body_bytes = body.len(),
                    "request parsed"
                );

                return Ok(Some(ParsedRequest {
                    method,
                    path,
                    version,
                    headers: header_map,
                    cookies,
                    query_params,
                    body,
                }));
            }
            Ok(httparse::Status::Partial) => {
                if buf.len() > MAX_HEAD_BYTES {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "request head too large",
                    ));
                }
            }
            Err(e) => {
                return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string()));
            }
        }

        let n = stream.read(&mut chunk)?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-request",
            ));
        }
        if buf.is_empty() {
            // First bytes arrived, the rest of the request is on the clock.
            stream.set_read_timeout(read_timeout)?;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
