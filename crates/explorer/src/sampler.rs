//! Phase 1: cheap viability sample.
//!
//! Pulls the single expiration nearest the candidate's target DTE and runs
//! four checks on it. The result is a quality signal only; this phase
//! never rejects a candidate.

use chrono::NaiveDate;
use common::{
    days_between, nearest_expiration, Candidate, ChainSnapshot, Contract, EngineConfig,
    ExpirationSlice, ExplorationStatus, SampleChecks, SampleReport, SamplingQuality,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::ChainCache;
use crate::liquidity::LiquidityGrader;
use chain_client::RateLimitedFetcher;

pub struct SampledExplorer<'a> {
    fetcher: &'a RateLimitedFetcher,
    cache: &'a ChainCache,
    cfg: &'a EngineConfig,
    today: NaiveDate,
}

impl<'a> SampledExplorer<'a> {
    pub fn new(
        fetcher: &'a RateLimitedFetcher,
        cache: &'a ChainCache,
        cfg: &'a EngineConfig,
        today: NaiveDate,
    ) -> Self {
        Self {
            fetcher,
            cache,
            cfg,
            today,
        }
    }

    pub async fn sample(&self, candidate: &Candidate) -> SampleReport {
        let target_dte = candidate.target_dte();
        let ticker = candidate.ticker.as_str();

        // A full chain cached by a sibling candidate answers Phase 1 for free.
        if !self.cfg.pipeline.force_refresh {
            if let Some(snap) = self.cache.get(ticker) {
                return match snap.nearest_slice(target_dte, self.today) {
                    Some(slice) => {
                        debug!("{}: Phase 1 served from cached chain", ticker);
                        self.grade(
                            candidate,
                            target_dte,
                            Arc::new(slice.clone()),
                            snap.underlying_price,
                            true,
                        )
                    }
                    None => no_expirations(target_dte, "cached chain has no unexpired expirations"),
                };
            }
        }

        let dates = match self.fetcher.list_expirations(ticker).await {
            Ok(d) => d,
            Err(e) => {
                warn!("{}: list_expirations failed: {}", ticker, e);
                return failed(target_dte, format!("list_expirations failed: {}", e));
            }
        };
        if dates.is_empty() {
            return no_expirations(target_dte, "provider lists no expirations");
        }
        let Some(expiration) = nearest_expiration(&dates, target_dte, self.today) else {
            return no_expirations(target_dte, "all listed expirations have passed");
        };

        let snap: ChainSnapshot = match self.fetcher.fetch_chain(ticker, expiration).await {
            Ok(s) => s,
            Err(e) => {
                warn!("{}: fetch_chain {} failed: {}", ticker, expiration, e);
                return failed(target_dte, format!("fetch_chain {} failed: {}", expiration, e));
            }
        };
        let underlying = snap.underlying_price;
        let slice = snap
            .expirations
            .into_iter()
            .find(|e| e.expiration == expiration)
            .unwrap_or(ExpirationSlice {
                expiration,
                contracts: Vec::new(),
            });

        self.grade(candidate, target_dte, Arc::new(slice), underlying, false)
    }

    fn grade(
        &self,
        candidate: &Candidate,
        target_dte: i64,
        slice: Arc<ExpirationSlice>,
        chain_underlying: Option<f64>,
        from_cache: bool,
    ) -> SampleReport {
        let dte = days_between(self.today, slice.expiration);
        let underlying = candidate.underlying_price.or(chain_underlying);
        let checks = self.run_checks(candidate, &slice, underlying, dte);

        let passed = checks.passed();
        let quality = match passed {
            4 => SamplingQuality::Good,
            0 => SamplingQuality::Poor,
            _ => SamplingQuality::Marginal,
        };

        let mut failed = Vec::new();
        if !checks.atm_present {
            failed.push("no ATM strike");
        }
        if !checks.quotes_present {
            failed.push("no two-sided quotes");
        }
        if !checks.open_interest_present {
            failed.push("no open interest near ATM");
        }
        if !checks.spread_within_loose_bound {
            failed.push("ATM spread beyond loose bound");
        }
        let note = if failed.is_empty() {
            format!("{} sampled at {} DTE: all checks passed", slice.expiration, dte)
        } else {
            format!(
                "{} sampled at {} DTE: {}/4 checks passed ({})",
                slice.expiration,
                dte,
                passed,
                failed.join(", ")
            )
        };

        debug!("{}: Phase 1 {:?} ({})", candidate.ticker, quality, note);

        SampleReport {
            target_dte,
            expiration: Some(slice.expiration),
            dte: Some(dte),
            quality,
            checks,
            status: ExplorationStatus::Sampled,
            from_cache,
            note,
            slice: Some(slice),
            underlying_price: underlying,
        }
    }

    fn run_checks(
        &self,
        candidate: &Candidate,
        slice: &ExpirationSlice,
        underlying: Option<f64>,
        dte: i64,
    ) -> SampleChecks {
        let band = self.cfg.sampling.atm_band_pct;
        let within = |c: &Contract, width: f64| match underlying {
            Some(p) if p > 0.0 => ((c.strike - p) / p).abs() <= width,
            _ => false,
        };

        let atm_present = slice.contracts.iter().any(|c| within(c, band));
        let quotes_present = slice.contracts.iter().any(Contract::is_quoted);

        let near_oi: u64 = match underlying {
            Some(_) => slice
                .contracts
                .iter()
                .filter(|c| within(c, 2.0 * band))
                .map(|c| c.open_interest)
                .sum(),
            None => slice.contracts.iter().map(|c| c.open_interest).sum(),
        };

        let grader = LiquidityGrader::new(&self.cfg.liquidity, &self.cfg.scoring);
        let loose = self.cfg.sampling.loose_spread_multiple
            * grader
                .thresholds(underlying, dte, candidate.strategy_type.shape())
                .max_spread_pct;
        let atm_spread = underlying.and_then(|p| {
            slice
                .contracts
                .iter()
                .filter(|c| c.is_quoted())
                .min_by(|a, b| {
                    (a.strike - p)
                        .abs()
                        .total_cmp(&(b.strike - p).abs())
                })
                .and_then(Contract::spread_pct)
        });

        SampleChecks {
            atm_present,
            quotes_present,
            open_interest_present: near_oi > 0,
            spread_within_loose_bound: atm_spread.map(|s| s <= loose).unwrap_or(false),
        }
    }
}

fn no_expirations(target_dte: i64, note: &str) -> SampleReport {
    SampleReport {
        target_dte,
        expiration: None,
        dte: None,
        quality: SamplingQuality::Poor,
        checks: SampleChecks::default(),
        status: ExplorationStatus::NoExpirations,
        from_cache: false,
        note: note.to_string(),
        slice: None,
        underlying_price: None,
    }
}

fn failed(target_dte: i64, note: String) -> SampleReport {
    SampleReport {
        target_dte,
        expiration: None,
        dte: None,
        quality: SamplingQuality::Poor,
        checks: SampleChecks::default(),
        status: ExplorationStatus::Error,
        from_cache: false,
        note,
        slice: None,
        underlying_price: None,
    }
}
