use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use http::Method;
use tracing::{debug, info, warn};

use super::pool::ThreadPool;
use super::request::read_request;
use super::request::ParsedRequest;
use super::response::WireResponse;
use super::ServerConfig;

/// A service that turns one parsed request into one response.
///
/// Cloned once per connection; implementations share state through `Arc`
/// fields. Errors written into the response do not count as failures here;
/// an `Err` return tears the connection down.
pub trait HttpService: Clone + Send + 'static {
    fn call(&mut self, req: ParsedRequest, res: &mut WireResponse) -> io::Result<()>;
}

/// Wrapper that serves an [`HttpService`] over TCP.
pub struct HttpServer<T>(pub T);

/// Handle to a running HTTP server.
///
/// Provides methods for waiting until the server is ready, stopping it
/// gracefully, or joining the accept thread.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl ServerHandle {
    /// Address the server is bound to (useful with port 0 binds).
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the server to be ready to accept connections.
    ///
    /// Polls the server address with TCP connects. Useful in tests to make
    /// sure the server is up before sending requests.
    ///
    /// # Errors
    ///
    /// `TimedOut` if the server is not ready within ~250ms (50 × 5ms).
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Stop the server gracefully.
    ///
    /// Sets the shutdown flag, wakes the accept loop with a throwaway
    /// connection, and joins the accept thread. In-flight connections
    /// finish before this returns (the connection pool joins on drop).
    pub fn stop(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = TcpStream::connect(self.addr);
        let _ = self.handle.join();
    }

    /// Block until the accept thread exits.
    ///
    /// # Errors
    ///
    /// Returns an error if the accept thread panicked.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

impl<T: HttpService> HttpServer<T> {
    /// Bind `addr` and serve on it.
    ///
    /// # Errors
    ///
    /// Fails when the address is invalid or cannot be bound.
    pub fn start<A: ToSocketAddrs>(self, addr: A, config: ServerConfig) -> io::Result<ServerHandle> {
        let listener = TcpListener::bind(addr)?;
        self.start_on(listener, config)
    }

    /// Serve on an existing listener, which may have been inherited from a
    /// prefork parent.
    pub fn start_on(self, listener: TcpListener, config: ServerConfig) -> io::Result<ServerHandle> {
        let addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let service = self.0;
        let accept_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("mayfly-accept".to_string())
            .spawn(move || accept_loop(listener, service, config, accept_shutdown))?;
        info!(addr = %addr, "server started");
        Ok(ServerHandle {
            addr,
            shutdown,
            handle,
        })
    }
}

fn accept_loop<T: HttpService>(
    listener: TcpListener,
    service: T,
    config: ServerConfig,
    shutdown: Arc<AtomicBool>,
) {
    let pool = ThreadPool::new(config.resolved_threads());
    debug!(workers = config.resolved_threads(), "accepting connections");
    for conn in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match conn {
            Ok(stream) => {
                let service = service.clone();
                let config = config.clone();
                pool.execute(move || handle_connection(stream, service, config));
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
    debug!("accept loop exited");
}

fn handle_connection<T: HttpService>(mut stream: TcpStream, mut service: T, config: ServerConfig) {
    let _ = stream.set_nodelay(true);
    if config.write_timeout.is_some() {
        let _ = stream.set_write_timeout(config.write_timeout);
    }

    let mut first = true;
    loop {
        // The read timeout covers the first request on a fresh connection;
        // after that the idle timeout governs the keep-alive wait.
        let wait = if first {
            config.read_timeout
        } else {
            config.idle_timeout.or(config.read_timeout)
        };
        first = false;

        let req = match read_request(&mut stream, wait, config.read_timeout) {
            Ok(Some(req)) => req,
            Ok(None) => break,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                debug!("connection timed out");
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                debug!(error = %e, "malformed request");
                let mut res = WireResponse::new();
                res.status_code(400);
                res.header("Content-Type", "text/plain");
                res.body_vec(b"Bad Request".to_vec());
                let _ = stream.write_all(&res.serialize(false, true));
                break;
            }
            Err(e) => {
                debug!(error = %e, "read failed");
                break;
            }
        };

        let keep_alive = req.keep_alive();
        let include_body = req.method != Method::HEAD;
        let mut res = WireResponse::new();
        if service.call(req, &mut res).is_err() {
            break;
        }
        let bytes = res.serialize(keep_alive, include_body);
        if stream.write_all(&bytes).and_then(|_| stream.flush()).is_err() {
            break;
        }
        if !keep_alive {
            break;
        }
    }
}
