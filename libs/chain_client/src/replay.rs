//! Offline quote source backed by recorded chain snapshots.
//!
//! Serves `--replay` runs and tests. Records per-operation call counts and
//! peak concurrency, and can inject failures or latency per ticker.

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{ChainSnapshot, Error, ExpirationSlice, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use crate::QuoteSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuoteOperation {
    ListExpirations,
    UnderlyingPrice,
    FetchExpiration,
}

#[derive(Debug)]
enum Failure {
    /// Every call fails with this status.
    Always(u16),
    /// The first `remaining` calls fail with `status`, later calls succeed.
    FirstN { status: u16, remaining: AtomicU32 },
    /// Calls never complete.
    Hang,
}

/// Replays fixed snapshots through the `QuoteSource` interface.
#[derive(Debug, Default)]
pub struct StaticQuoteSource {
    snapshots: HashMap<String, ChainSnapshot>,
    failures: HashMap<String, Failure>,
    latency: Duration,
    calls: Mutex<HashMap<(QuoteOperation, String), usize>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StaticQuoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshots(snapshots: impl IntoIterator<Item = ChainSnapshot>) -> Self {
        let mut source = Self::new();
        for snap in snapshots {
            source = source.with_snapshot(snap);
        }
        source
    }

    /// Load a JSON array of snapshots recorded from a live provider.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let snapshots: Vec<ChainSnapshot> = serde_json::from_str(&raw)?;
        info!(
            "Loaded {} replay snapshots from {}",
            snapshots.len(),
            path.display()
        );
        Ok(Self::from_snapshots(snapshots))
    }

    pub fn with_snapshot(mut self, snapshot: ChainSnapshot) -> Self {
        self.snapshots
            .insert(snapshot.ticker.to_ascii_uppercase(), snapshot);
        self
    }

    /// Every call for `ticker` fails with HTTP `status`.
    pub fn with_failure(mut self, ticker: &str, status: u16) -> Self {
        self.failures
            .insert(ticker.to_ascii_uppercase(), Failure::Always(status));
        self
    }

    /// The first `count` calls for `ticker` fail with HTTP `status`.
    pub fn with_transient_failures(mut self, ticker: &str, status: u16, count: u32) -> Self {
        self.failures.insert(
            ticker.to_ascii_uppercase(),
            Failure::FirstN {
                status,
                remaining: AtomicU32::new(count),
            },
        );
        self
    }

    /// Calls for `ticker` never return.
    pub fn with_hang(mut self, ticker: &str) -> Self {
        self.failures
            .insert(ticker.to_ascii_uppercase(), Failure::Hang);
        self
    }

    /// Artificial latency applied to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Calls of `op` across all tickers.
    pub fn calls(&self, op: QuoteOperation) -> usize {
        self.calls
            .lock()
            .map(|m| m.iter().filter(|((o, _), _)| *o == op).map(|(_, n)| *n).sum())
            .unwrap_or(0)
    }

    /// Calls of `op` for one ticker.
    pub fn calls_for(&self, op: QuoteOperation, ticker: &str) -> usize {
        self.calls
            .lock()
            .ok()
            .and_then(|m| m.get(&(op, ticker.to_ascii_uppercase())).copied())
            .unwrap_or(0)
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, op: QuoteOperation, ticker: &str) -> Result<InFlight<'_>> {
        let key = ticker.to_ascii_uppercase();
        if let Ok(mut m) = self.calls.lock() {
            *m.entry((op, key.clone())).or_insert(0) += 1;
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.failures.get(&key) {
            Some(Failure::Always(status)) => Err(injected(*status, &key)),
            Some(Failure::FirstN { status, remaining }) => {
                let took = remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if took {
                    Err(injected(*status, &key))
                } else {
                    Ok(guard)
                }
            }
            Some(Failure::Hang) => {
                std::future::pending::<()>().await;
                Ok(guard)
            }
            None => Ok(guard),
        }
    }

    fn snapshot(&self, ticker: &str) -> Result<&ChainSnapshot> {
        self.snapshots
            .get(&ticker.to_ascii_uppercase())
            .ok_or_else(|| Error::QuoteApi {
                status: 404,
                message: format!("unknown symbol {}", ticker),
            })
    }
}

fn injected(status: u16, ticker: &str) -> Error {
    Error::QuoteApi {
        status,
        message: format!("injected failure for {}", ticker),
    }
}

#[async_trait]
impl QuoteSource for StaticQuoteSource {
    async fn list_expirations(&self, ticker: &str) -> Result<Vec<NaiveDate>> {
        let _guard = self.enter(QuoteOperation::ListExpirations, ticker).await?;
        // Unknown symbols list nothing rather than failing.
        let mut dates = match self.snapshots.get(&ticker.to_ascii_uppercase()) {
            Some(s) => s.expiration_dates(),
            None => Vec::new(),
        };
        dates.sort();
        Ok(dates)
    }

    async fn underlying_price(&self, ticker: &str) -> Result<Option<f64>> {
        let _guard = self.enter(QuoteOperation::UnderlyingPrice, ticker).await?;
        Ok(self.snapshot(ticker)?.underlying_price)
    }

    async fn fetch_expiration(&self, ticker: &str, expiration: NaiveDate) -> Result<ExpirationSlice> {
        let _guard = self.enter(QuoteOperation::FetchExpiration, ticker).await?;
        let slice = self
            .snapshot(ticker)?
            .slice(expiration)
            .cloned()
            .unwrap_or_else(|| ExpirationSlice {
                expiration,
                contracts: Vec::new(),
            });
        debug!("Replay chain {} {}: {} contracts", ticker, expiration, slice.contracts.len());
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{Contract, OptionType};

    fn make_snapshot(ticker: &str) -> ChainSnapshot {
        let exp = NaiveDate::from_ymd_opt(2026, 11, 20).unwrap();
        ChainSnapshot {
            ticker: ticker.into(),
            fetched_at: Utc::now(),
            underlying_price: Some(100.0),
            expirations: vec![ExpirationSlice {
                expiration: exp,
                contracts: vec![Contract {
                    strike: 100.0,
                    option_type: OptionType::Call,
                    expiration: exp,
                    bid: Some(2.0),
                    ask: Some(2.2),
                    open_interest: 500,
                    volume: 20,
                    delta: Some(0.5),
                    gamma: None,
                    vega: None,
                    theta: None,
                    implied_vol: Some(0.3),
                }],
            }],
        }
    }

    #[tokio::test]
    async fn test_counts_calls_per_ticker() {
        let source = StaticQuoteSource::new().with_snapshot(make_snapshot("AAPL"));
        source.list_expirations("AAPL").await.unwrap();
        source.list_expirations("aapl").await.unwrap();
        assert_eq!(source.calls_for(QuoteOperation::ListExpirations, "AAPL"), 2);
        assert_eq!(source.calls(QuoteOperation::FetchExpiration), 0);
    }

    #[tokio::test]
    async fn test_unknown_symbol_lists_nothing_but_quote_fails() {
        let source = StaticQuoteSource::new();
        assert!(source.list_expirations("ZZZ").await.unwrap().is_empty());
        let err = source.underlying_price("ZZZ").await.unwrap_err();
        assert!(matches!(err, Error::QuoteApi { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_transient_failures_run_out() {
        let source = StaticQuoteSource::new()
            .with_snapshot(make_snapshot("MSFT"))
            .with_transient_failures("MSFT", 503, 1);
        assert!(source.underlying_price("MSFT").await.is_err());
        assert_eq!(source.underlying_price("MSFT").await.unwrap(), Some(100.0));
    }

    #[tokio::test]
    async fn test_fetch_expiration_serves_one_slice() {
        let source = StaticQuoteSource::new().with_snapshot(make_snapshot("AAPL"));
        let exp = NaiveDate::from_ymd_opt(2026, 11, 20).unwrap();
        let slice = source.fetch_expiration("AAPL", exp).await.unwrap();
        assert_eq!(slice.contracts.len(), 1);

        let unlisted = NaiveDate::from_ymd_opt(2026, 12, 18).unwrap();
        let empty = source.fetch_expiration("AAPL", unlisted).await.unwrap();
        assert_eq!(empty.expiration, unlisted);
        assert!(empty.contracts.is_empty());
    }
}
