use std::time::Duration;

use crate::dispatcher::{Reply, RequestCtx};

/// Hooks wrapped around handler execution.
///
/// `before` runs ahead of the handler; returning `Some` reply
/// short-circuits it (remaining middleware still observe the request).
/// `after` sees the final reply and the handler latency, and may rewrite
/// the reply.
pub trait Middleware: Send + Sync {
    fn before(&self, _ctx: &RequestCtx) -> Option<Reply> {
        None
    }
    fn after(&self, _ctx: &RequestCtx, _reply: &mut Reply, _latency: Duration) {}
}
