//! Shared fixtures for the explorer's unit tests.

use chrono::{Duration, NaiveDate, Utc};
use common::config::FetcherConfig;
use common::config::CacheConfig;
use common::{
    Bias, Candidate, ChainSnapshot, Contract, EngineConfig, ExpirationSlice, ExploredCandidate,
    MarketContext, OptionType, SampledCandidate, StrategyType,
};
use std::sync::Arc;

use crate::cache::ChainCache;
use crate::deep::DeepExplorer;
use crate::greeks::{black_scholes, normal_cdf, PricingContext};
use crate::sampler::SampledExplorer;
use chain_client::{RateLimitedFetcher, StaticQuoteSource};

pub const FIXTURE_IV: f64 = 0.30;

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
}

/// Expirations 14, 38, 80 and 400 days out.
pub fn fixture_expirations() -> Vec<NaiveDate> {
    [14, 38, 80, 400]
        .iter()
        .map(|d| today() + Duration::days(*d))
        .collect()
}

pub fn make_candidate(ticker: &str, strategy: StrategyType, dte_min: i64, dte_max: i64) -> Candidate {
    let bias = match strategy.family() {
        common::StrategyFamily::Volatility => Bias::Bidirectional,
        _ => match strategy {
            StrategyType::LongPut | StrategyType::BearPutSpread | StrategyType::BearCallSpread => {
                Bias::Bearish
            }
            StrategyType::IronCondor => Bias::Neutral,
            _ => Bias::Bullish,
        },
    };
    Candidate {
        ticker: ticker.into(),
        strategy_type: strategy,
        bias,
        dte_min,
        dte_max,
        underlying_price: None,
        dollar_allocation: None,
        context: MarketContext::default(),
    }
}

fn bs_price(option_type: OptionType, strike: f64, vol: f64, ctx: &PricingContext) -> f64 {
    let sqrt_t = ctx.years.sqrt();
    let d1 = ((ctx.spot / strike).ln() + (ctx.rate + 0.5 * vol * vol) * ctx.years) / (vol * sqrt_t);
    let d2 = d1 - vol * sqrt_t;
    let df = (-ctx.rate * ctx.years).exp();
    match option_type {
        OptionType::Call => ctx.spot * normal_cdf(d1) - strike * df * normal_cdf(d2),
        OptionType::Put => strike * df * normal_cdf(-d2) - ctx.spot * normal_cdf(-d1),
    }
}

pub fn make_contract(
    option_type: OptionType,
    strike: f64,
    expiration: NaiveDate,
    spot: f64,
    iv: f64,
) -> Contract {
    let ctx = PricingContext::new(spot, today(), expiration, 0.0);
    let g = black_scholes(option_type, strike, iv, &ctx);
    let fair = bs_price(option_type, strike, iv, &ctx).max(0.05);
    let half_spread = (fair * 0.02).max(0.01);
    let moneyness = (strike - spot) / spot;
    Contract {
        strike,
        option_type,
        expiration,
        bid: Some(((fair - half_spread) * 100.0).round() / 100.0),
        ask: Some(((fair + half_spread) * 100.0).round() / 100.0),
        open_interest: (2000.0 * (-moneyness * moneyness * 50.0).exp()) as u64 + 50,
        volume: 100,
        delta: Some(g.delta),
        gamma: Some(g.gamma),
        vega: Some(g.vega),
        theta: Some(g.theta),
        implied_vol: Some(iv),
    }
}

pub fn make_slice(expiration: NaiveDate, spot: f64, call_iv: f64, put_iv: f64) -> ExpirationSlice {
    let step = spot * 0.025;
    let mut contracts = Vec::new();
    for i in -12..=12 {
        let strike = ((spot + step * i as f64) * 100.0).round() / 100.0;
        contracts.push(make_contract(OptionType::Call, strike, expiration, spot, call_iv));
        contracts.push(make_contract(OptionType::Put, strike, expiration, spot, put_iv));
    }
    ExpirationSlice {
        expiration,
        contracts,
    }
}

/// A healthy chain: 25 strikes per expiration at 30 vol, tight quotes.
pub fn make_chain(ticker: &str, spot: f64) -> ChainSnapshot {
    make_chain_with_iv(ticker, spot, FIXTURE_IV, FIXTURE_IV)
}

pub fn make_chain_with_iv(ticker: &str, spot: f64, call_iv: f64, put_iv: f64) -> ChainSnapshot {
    ChainSnapshot {
        ticker: ticker.into(),
        fetched_at: Utc::now(),
        underlying_price: Some(spot),
        expirations: fixture_expirations()
            .into_iter()
            .map(|e| make_slice(e, spot, call_iv, put_iv))
            .collect(),
    }
}

pub fn make_fetcher(source: Arc<StaticQuoteSource>) -> RateLimitedFetcher {
    let cfg = FetcherConfig {
        min_call_interval_ms: 0,
        call_timeout_ms: 2_000,
        retry_backoff_ms: 5,
        ..Default::default()
    };
    RateLimitedFetcher::new(source, &cfg)
}

/// Run both phases for one candidate against a single replayed chain.
pub async fn explore(chain: ChainSnapshot, candidate: Candidate, cfg: &EngineConfig) -> ExploredCandidate {
    let fetcher = make_fetcher(Arc::new(StaticQuoteSource::new().with_snapshot(chain)));
    let cache = ChainCache::new(&CacheConfig::default());
    let sample = SampledExplorer::new(&fetcher, &cache, cfg, today())
        .sample(&candidate)
        .await;
    DeepExplorer::new(&fetcher, &cache, cfg, today())
        .explore(SampledCandidate::new(candidate, sample))
        .await
}
