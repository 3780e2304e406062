//! Option-chain quoting client library.
//!
//! Provides the `QuoteSource` abstraction over a market-data provider, a
//! REST implementation, an offline replay implementation, and the
//! `RateLimitedFetcher` policy wrapper every caller goes through.

pub mod fetcher;
pub mod rate_limit;
pub mod replay;
pub mod rest;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{ExpirationSlice, Result};

pub use fetcher::{FetcherStats, RateLimitedFetcher};
pub use rate_limit::RateLimiter;
pub use replay::{QuoteOperation, StaticQuoteSource};
pub use rest::QuoteRestClient;

/// Provider calls, one request each. `RateLimitedFetcher` assembles
/// chains from them.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Listed expiration dates for `ticker`, any order.
    async fn list_expirations(&self, ticker: &str) -> Result<Vec<NaiveDate>>;

    /// Reference price of the underlying, `None` when the provider has none.
    async fn underlying_price(&self, ticker: &str) -> Result<Option<f64>>;

    /// Contracts for one expiration. An unlisted date gives an empty slice.
    async fn fetch_expiration(&self, ticker: &str, expiration: NaiveDate) -> Result<ExpirationSlice>;
}
