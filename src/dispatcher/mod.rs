//! # Dispatcher Module
//!
//! Coroutine-based request handler dispatch.
//!
//! ## Overview
//!
//! Each registered handler runs in its own `may` coroutine, spawned at
//! registration. The dispatcher:
//! - keeps a registry of handler names to channel senders
//! - sends matched requests to their handler via MPSC channels
//! - waits on a one-shot reply channel for the response
//! - runs middleware before and after the handler
//! - recovers handler panics and maps handler errors through the app's
//!   error handler
//!
//! ## Request Flow
//!
//! 1. The router matches an incoming request to a handler name.
//! 2. The dispatcher builds a [`RequestCtx`] (with a fresh reply channel)
//!    and runs the `before` middleware chain; the first early reply
//!    short-circuits the handler.
//! 3. The context is sent to the handler coroutine, which answers on the
//!    reply channel with a [`Reply`].
//! 4. The `after` middleware chain observes the reply and latency.
//!
//! ## Failure Modes
//!
//! - Handler returns `Err`: mapped by the app error handler (default: the
//!   error's status and text).
//! - Handler panics: caught in the coroutine, surfaced as an internal error
//!   through the same error handler. The coroutine keeps serving.
//! - Handler coroutine gone (channel closed): 503 reply.
//! - No handler registered for the matched name: `None`, which the service
//!   turns into a 500 (a matched route without a handler is a wiring bug).

mod core;

pub use core::{
    Dispatcher, HandlerSender, HeaderVec, Reply, ReplyBody, RequestCtx, RequestParts,
    MAX_INLINE_HEADERS,
};
