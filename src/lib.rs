//! # Mayfly
//!
//! **Mayfly** is a compact, coroutine-powered web harness for Rust: explicit
//! route registration, request binding, file uploads, template views, and a
//! prefork listener, all on the `may` runtime.
//!
//! ## Overview
//!
//! Routes are registered in code against an [`app::App`]; each registration
//! compiles the path pattern into the routing table and pre-spawns a handler
//! coroutine behind a channel. The HTTP edge is a plain `std` TCP accept
//! loop feeding a fixed thread pool, which keeps the listener ownable and
//! therefore inheritable across processes when prefork is on.
//!
//! ## Architecture
//!
//! - **[`app`]** - route registration, groups, static mounts, and serving
//! - **[`router`]** - path matching and route resolution with regex matchers
//! - **[`dispatcher`]** - coroutine-based handler dispatch and the reply model
//! - **[`server`]** - HTTP/1.1 listener, parsing, and response writing
//! - **[`middleware`]** - pluggable before/after hooks (logging, metrics)
//! - **[`error`]** - handler error type and the app error handler seam
//! - **[`views`]** - template rendering for `Reply::view` bodies
//! - **[`multipart`]** - multipart form parsing and upload handling
//! - **[`static_files`]** - directory mounts with traversal-safe resolution
//! - **[`prefork`]** - multi-process serving over one inherited listener
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Server as Connection Thread
//!     participant Service as AppService
//!     participant Router as Router
//!     participant Dispatcher as Dispatcher
//!     participant Handler as Handler (Coroutine)
//!
//!     Client->>Server: HTTP Request GET /users/eko/orders/2
//!     Server->>Server: Parse head (httparse), body (Content-Length)
//!     Server->>Service: ParsedRequest
//!     Service->>Service: Static mounts (GET/HEAD), miss falls through
//!     Service->>Router: route("GET", "/users/eko/orders/2")
//!
//!     alt No Route Match
//!         Router-->>Client: 404 Not Found (JSON)
//!     end
//!
//!     Router-->>Service: RouteMatch (handler, path params)
//!     Service->>Dispatcher: dispatch(match, parts)
//!     Dispatcher->>Dispatcher: Middleware before hooks
//!     Dispatcher->>Handler: RequestCtx via channel
//!
//!     Note over Handler: Runs in a may coroutine
//!     Handler->>Handler: Bind body / read params
//!
//!     alt Handler Errors or Panics
//!         Handler-->>Dispatcher: Mapped by the app error handler
//!     end
//!
//!     Handler-->>Dispatcher: Reply (view bodies rendered here)
//!     Dispatcher->>Dispatcher: Middleware after hooks
//!     Dispatcher-->>Service: Reply
//!     Service-->>Server: WireResponse
//!     Server-->>Client: HTTP Response
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mayfly::{App, Reply};
//!
//! let mut app = App::new();
//! app.get("/hello", |ctx| {
//!     let name = ctx.query_or("name", "Guest");
//!     Ok(Reply::text(format!("Hello {name}")))
//! });
//! app.listen("127.0.0.1:3000").unwrap();
//! ```
//!
//! ## Runtime Considerations
//!
//! Mayfly uses the `may` coroutine runtime, not tokio or async-std:
//!
//! - Handlers run in coroutines with a fixed stack, configurable via the
//!   `MAYFLY_STACK_SIZE` environment variable (decimal or `0x` hex)
//! - Blocking a coroutine on ordinary thread synchronization can stall the
//!   scheduler; connection I/O stays on plain threads for that reason
//! - With prefork enabled the process re-executes itself into worker
//!   children that share the listener fd; see [`prefork`] for the protocol

pub mod app;
pub mod dispatcher;
pub mod error;
pub mod ids;
pub mod middleware;
pub mod multipart;
pub mod prefork;
pub mod router;
pub mod runtime_config;
pub mod server;
pub mod static_files;
pub mod views;

pub use app::{App, AppConfig, RouteGroup};
pub use dispatcher::{Reply, RequestCtx};
pub use error::{ErrorHandler, HandlerError};
pub use views::ViewEngine;
