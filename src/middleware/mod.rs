//! # Middleware Module
//!
//! Request/response hooks around handler dispatch.
//!
//! Middleware is registered on the app with a path prefix (the empty prefix
//! covers every route; a group registers under its own prefix). `before`
//! hooks run on the dispatching thread ahead of the handler and may
//! short-circuit it with an early reply; `after` hooks observe the final
//! reply and the handler latency.
//!
//! Two implementations ship with the crate: [`MetricsMiddleware`] (atomic
//! request/error counters and mean latency) and [`RequestLogMiddleware`]
//! (a `tracing` event per request).

mod core;
mod logger;
mod metrics;

pub use core::Middleware;
pub use logger::RequestLogMiddleware;
pub use metrics::MetricsMiddleware;
