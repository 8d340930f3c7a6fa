use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use super::Middleware;
use crate::dispatcher::{Reply, RequestCtx};

/// Passive request statistics: total count, error count, and mean latency.
///
/// All counters are atomics with `Ordering::Relaxed`; the numbers are
/// eventually consistent and extremely cheap to collect. The middleware
/// never blocks a request.
#[derive(Default)]
pub struct MetricsMiddleware {
    request_count: AtomicUsize,
    error_count: AtomicUsize,
    total_latency_ns: AtomicU64,
}

impl MetricsMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of requests observed.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Requests that ended with a 5xx status.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Mean handler latency, zero when nothing has been observed yet.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        let count = self.request_count.load(Ordering::Relaxed) as u64;
        if count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }
}

impl Middleware for MetricsMiddleware {
    fn before(&self, _ctx: &RequestCtx) -> Option<Reply> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn after(&self, _ctx: &RequestCtx, reply: &mut Reply, latency: Duration) {
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        if reply.status >= 500 {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::HeaderVec;
    use crate::ids::RequestId;
    use crate::router::ParamVec;
    use http::Method;
    use may::sync::mpsc;
    use std::sync::Arc;

    fn ctx() -> RequestCtx {
        let (reply_tx, _rx) = mpsc::channel();
        RequestCtx {
            request_id: RequestId::new(),
            method: Method::GET,
            path: "/".to_string(),
            pattern: Arc::from("/"),
            path_params: ParamVec::new(),
            query_params: ParamVec::new(),
            headers: HeaderVec::new(),
            cookies: HeaderVec::new(),
            body: Vec::new(),
            reply_tx,
        }
    }

    #[test]
    fn test_counts_and_average() {
        let mw = MetricsMiddleware::new();
        let ctx = ctx();
        let mut ok = Reply::text("ok");
        let mut boom = Reply::text("boom").with_status(500);

        assert!(mw.before(&ctx).is_none());
        mw.after(&ctx, &mut ok, Duration::from_millis(2));
        assert!(mw.before(&ctx).is_none());
        mw.after(&ctx, &mut boom, Duration::from_millis(4));

        assert_eq!(mw.request_count(), 2);
        assert_eq!(mw.error_count(), 1);
        assert_eq!(mw.average_latency(), Duration::from_millis(3));
    }

    #[test]
    fn test_average_latency_empty() {
        let mw = MetricsMiddleware::new();
        assert_eq!(mw.average_latency(), Duration::ZERO);
    }
}
