//! # Server Module
//!
//! The HTTP/1.1 edge: listener, connection handling, request parsing, and
//! response writing.
//!
//! ## Architecture
//!
//! Accepted connections are handed to a fixed thread pool. Each connection
//! thread runs a keep-alive loop: read one request (head parsed by
//! `httparse`, body by `Content-Length`), build a [`ParsedRequest`], call
//! the [`HttpService`], serialize the [`WireResponse`] back. Handler work
//! itself runs on `may` coroutines behind the dispatcher, so connection
//! threads block only on socket I/O and the reply channel.
//!
//! Timeouts map onto socket deadlines: the idle timeout applies while
//! waiting for the first byte of a request, the read timeout for the rest
//! of it, and the write timeout to responses. A timed-out connection is
//! closed quietly.
//!
//! The listener can be inherited from a parent process (prefork), which is
//! why the accept loop lives in this crate rather than behind an HTTP
//! engine that insists on binding its own socket.

pub mod http_server;
pub mod pool;
pub mod request;
pub mod response;
pub mod service;

use std::time::Duration;

pub use http_server::{HttpServer, HttpService, ServerHandle};
pub use pool::ThreadPool;
pub use request::{parse_cookies, parse_query_params, ParsedRequest};
pub use response::{status_reason, write_json_error, write_reply, WireResponse};
pub use service::{AppService, StaticMount};

/// Socket-level settings for the serve loop.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Deadline for reading a request once its first byte has arrived.
    pub read_timeout: Option<Duration>,
    /// Deadline for writing a response.
    pub write_timeout: Option<Duration>,
    /// How long a keep-alive connection may sit idle between requests.
    pub idle_timeout: Option<Duration>,
    /// Connection worker threads; 0 picks from available parallelism.
    pub connection_threads: usize,
}

impl ServerConfig {
    pub(crate) fn resolved_threads(&self) -> usize {
        if self.connection_threads > 0 {
            return self.connection_threads;
        }
        std::thread::available_parallelism()
            .map(|n| (n.get() * 2).clamp(4, 32))
            .unwrap_or(8)
    }
}
