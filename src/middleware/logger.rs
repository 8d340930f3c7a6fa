use std::time::Duration;

use tracing::{debug, info, warn};

use super::Middleware;
use crate::dispatcher::{Reply, RequestCtx};

/// Per-request log line, emitted after the handler completes.
///
/// Logs the route pattern rather than the raw path so parameterized routes
/// aggregate under one key. Failures (5xx) log at `warn`.
pub struct RequestLogMiddleware;

impl Middleware for RequestLogMiddleware {
    fn before(&self, ctx: &RequestCtx) -> Option<Reply> {
        debug!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
            "request started"
        );
        None
    }

    fn after(&self, ctx: &RequestCtx, reply: &mut Reply, latency: Duration) {
        let latency_ms = latency.as_millis() as u64;
        if reply.status >= 500 {
            warn!(
                request_id = %ctx.request_id,
                method = %ctx.method,
                pattern = %ctx.pattern,
                status = reply.status,
                latency_ms,
                "request failed"
            );
        } else {
            info!(
                request_id = %ctx.request_id,
                method = %ctx.method,
                pattern = %ctx.pattern,
                status = reply.status,
                latency_ms,
                "request completed"
            );
        }
    }
}
