//! Call spacing for the quoting API.
//!
//! Default policy: one call start every 100ms (≤10 req/s), burst of one.

use governor::{Quota, RateLimiter as GovLimiter};
use std::sync::Arc;
use std::time::Duration;

type DirectLimiter =
    GovLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

/// Interval gate shared by every clone of a client.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limiter: Option<Arc<DirectLimiter>>,
    min_interval: Duration,
}

impl RateLimiter {
    /// Default provider limit.
    pub fn new() -> Self {
        Self::with_min_interval(Duration::from_millis(100))
    }

    /// One call start per `min_interval`. A zero interval disables spacing.
    pub fn with_min_interval(min_interval: Duration) -> Self {
        let limiter = Quota::with_period(min_interval).map(|q| Arc::new(GovLimiter::direct(q)));
        Self {
            limiter,
            min_interval,
        }
    }

    /// Wait until a call slot is available.
    pub async fn wait(&self) {
        if let Some(l) = &self.limiter {
            l.until_ready().await;
        }
    }

    /// Try to take a slot without waiting. Returns true if acquired.
    pub fn try_acquire(&self) -> bool {
        match &self.limiter {
            Some(l) => l.check().is_ok(),
            None => true,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
