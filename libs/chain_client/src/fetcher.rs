//! Single call policy for every external quote request.
//!
//! Bounded in-flight calls, minimum spacing between call starts, a
//! per-call timeout, and exactly one retry with backoff for transient
//! failures. Failures come back as typed `Error`s; nothing panics.
//!
//! Chains are assembled here from single-request source calls, so a full
//! chain of N expirations is N + 2 policed calls, never one long call.

use chrono::{NaiveDate, Utc};
use common::config::FetcherConfig;
use common::{ChainSnapshot, Error, ExpirationSlice, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::rate_limit::RateLimiter;
use crate::QuoteSource;

/// Counters for the batch summary log.
#[derive(Debug, Default)]
pub struct FetcherStats {
    pub calls: AtomicU64,
    pub retries: AtomicU64,
    pub timeouts: AtomicU64,
    pub failures: AtomicU64,
    pub full_chains: AtomicU64,
}

impl FetcherStats {
    /// Full-chain assemblies started.
    pub fn full_chain_fetches(&self) -> u64 {
        self.full_chains.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.calls.load(Ordering::Relaxed),
            self.retries.load(Ordering::Relaxed),
            self.timeouts.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
        )
    }
}

#[derive(Clone)]
pub struct RateLimitedFetcher {
    source: Arc<dyn QuoteSource>,
    permits: Arc<Semaphore>,
    limiter: RateLimiter,
    call_timeout: Duration,
    retry_backoff: Duration,
    stats: Arc<FetcherStats>,
}

impl std::fmt::Debug for RateLimitedFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedFetcher")
            .field("available_permits", &self.permits.available_permits())
            .field("min_interval", &self.limiter.min_interval())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl RateLimitedFetcher {
    pub fn new(source: Arc<dyn QuoteSource>, cfg: &FetcherConfig) -> Self {
        Self {
            source,
            permits: Arc::new(Semaphore::new(cfg.max_concurrent_calls.max(1))),
            limiter: RateLimiter::with_min_interval(Duration::from_millis(cfg.min_call_interval_ms)),
            call_timeout: Duration::from_millis(cfg.call_timeout_ms),
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
            stats: Arc::new(FetcherStats::default()),
        }
    }

    pub fn stats(&self) -> &FetcherStats {
        &self.stats
    }

    pub async fn list_expirations(&self, ticker: &str) -> Result<Vec<NaiveDate>> {
        self.call("list_expirations", ticker, || self.source.list_expirations(ticker))
            .await
    }

    /// One expiration plus the underlying price.
    pub async fn fetch_chain(&self, ticker: &str, expiration: NaiveDate) -> Result<ChainSnapshot> {
        let underlying_price = match self.underlying_price(ticker).await {
            Ok(p) => p,
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                warn!("Underlying quote for {} unavailable: {}", ticker, e);
                None
            }
        };
        let slice = self.fetch_expiration(ticker, expiration).await?;
        Ok(ChainSnapshot {
            ticker: ticker.to_string(),
            fetched_at: Utc::now(),
            underlying_price,
            expirations: vec![slice],
        })
    }

    /// Every listed expiration, fetched one request at a time.
    pub async fn fetch_full_chain(&self, ticker: &str) -> Result<ChainSnapshot> {
        self.stats.full_chains.fetch_add(1, Ordering::Relaxed);
        let underlying_price = self.underlying_price(ticker).await?;
        let mut dates = self.list_expirations(ticker).await?;
        dates.sort();
        dates.dedup();

        let mut expirations = Vec::with_capacity(dates.len());
        for date in dates {
            expirations.push(self.fetch_expiration(ticker, date).await?);
        }

        info!(
            "Full chain for {}: {} expirations, {} contracts",
            ticker,
            expirations.len(),
            expirations.iter().map(|e| e.contracts.len()).sum::<usize>()
        );

        Ok(ChainSnapshot {
            ticker: ticker.to_string(),
            fetched_at: Utc::now(),
            underlying_price,
            expirations,
        })
    }

    async fn underlying_price(&self, ticker: &str) -> Result<Option<f64>> {
        self.call("underlying_price", ticker, || self.source.underlying_price(ticker))
            .await
    }

    async fn fetch_expiration(&self, ticker: &str, expiration: NaiveDate) -> Result<ExpirationSlice> {
        self.call("fetch_expiration", ticker, || {
            self.source.fetch_expiration(ticker, expiration)
        })
        .await
    }

    async fn call<T, F, Fut>(&self, operation: &str, ticker: &str, make: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let first = self.attempt(operation, ticker, &make).await;
        let err = match first {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() => e,
            Err(e) => {
                debug!("{}({}) failed, not retrying: {}", operation, ticker, e);
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let backoff = match &err {
            Error::RateLimited { retry_after_ms } => {
                self.retry_backoff.max(Duration::from_millis(*retry_after_ms))
            }
            _ => self.retry_backoff,
        };
        warn!(
            "{}({}) transient failure, retrying in {}ms: {}",
            operation,
            ticker,
            backoff.as_millis(),
            err
        );
        self.stats.retries.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(backoff).await;

        let second = self.attempt(operation, ticker, &make).await;
        if second.is_err() {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
        }
        second
    }

    async fn attempt<T, F, Fut>(&self, operation: &str, ticker: &str, make: &F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Other("fetcher permits closed".into()))?;
        self.limiter.wait().await;
        self.stats.calls.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout(self.call_timeout, make()).await {
            Ok(result) => result,
            Err(_) => {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                Err(Error::Timeout {
                    operation: format!("{}({})", operation, ticker),
                    timeout_ms: self.call_timeout.as_millis() as u64,
                })
            }
        }
    }
}
