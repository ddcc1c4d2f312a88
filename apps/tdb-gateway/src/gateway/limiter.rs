use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use parking_lot::Mutex;
use tdb_token::Clock;

use super::{Component, Rejection, RequestContext};

/// Sliding-window hit counter keyed by tenant.
pub(crate) trait CounterStore: Send + Sync {
    /// Record a hit at `now_ms`; returns the hits inside the window ending
    /// at `now_ms`, this one included.
    fn hit(&self, key: &str, now_ms: u64, window_ms: u64) -> u64;
}

/// Process-local store. Counts are lost on restart and not shared between
/// gateway instances.
#[derive(Default)]
pub(crate) struct MemoryCounterStore {
    hits: Mutex<HashMap<String, VecDeque<u64>>>,
}

impl CounterStore for MemoryCounterStore {
    fn hit(&self, key: &str, now_ms: u64, window_ms: u64) -> u64 {
        let floor = now_ms.saturating_sub(window_ms);
        let mut hits = self.hits.lock();
        let log = hits.entry(key.to_string()).or_default();
        while log.front().is_some_and(|t| *t <= floor) {
            log.pop_front();
        }
        log.push_back(now_ms);
        log.len() as u64
    }
}

/// Caps requests per tenant within a sliding window.
pub(crate) struct ActivityLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    limit: u64,
    window: Duration,
}

impl ActivityLimiter {
    pub(crate) fn new(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        limit: u64,
        window: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            limit,
            window,
        }
    }
}

impl Component for ActivityLimiter {
    fn name(&self) -> &'static str {
        "activity"
    }

    fn priority(&self) -> u16 {
        40
    }

    fn apply(&self, ctx: RequestContext) -> Result<RequestContext, Rejection> {
        let Some(tenant) = ctx.tenant.as_deref() else {
            return Ok(ctx);
        };
        let window_ms = self.window.as_millis() as u64;
        let count = self.store.hit(tenant, self.clock.now_ms(), window_ms);
        if count > self.limit {
            return Err(Rejection::new(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                format!(
                    "more than {} requests in {}s",
                    self.limit,
                    self.window.as_secs()
                ),
            ));
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdb_token::ManualClock;

    #[test]
    fn window_slides() {
        let store = MemoryCounterStore::default();
        assert_eq!(store.hit("a", 1_000, 1_000), 1);
        assert_eq!(store.hit("a", 1_500, 1_000), 2);
        assert_eq!(store.hit("b", 1_500, 1_000), 1);
        assert_eq!(store.hit("a", 2_000, 1_000), 2);
        assert_eq!(store.hit("a", 3_600, 1_000), 1);
    }

    #[test]
    fn limiter_rejects_over_limit_per_tenant() {
        let clock = Arc::new(ManualClock::new(10_000));
        let limiter = ActivityLimiter::new(
            Arc::new(MemoryCounterStore::default()),
            clock.clone(),
            2,
            Duration::from_secs(1),
        );
        let ctx = |t: &str| RequestContext {
            tenant: Some(t.to_string()),
            ..Default::default()
        };
        assert!(limiter.apply(ctx("acme")).is_ok());
        assert!(limiter.apply(ctx("acme")).is_ok());
        let err = limiter.apply(ctx("acme")).unwrap_err();
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert!(limiter.apply(ctx("other")).is_ok());

        clock.advance(1_001);
        assert!(limiter.apply(ctx("acme")).is_ok());
    }
}
