//! Phase 2: selection over the full chain, or over the Phase-1 sample
//! when the strategy only needs one expiration.
//!
//! Every outcome, including fetch failures and empty chains, ends in an
//! `ExploredCandidate` carrying an annotation. Nothing here returns an
//! error to the caller.

use chrono::NaiveDate;
use common::{
    Annotation, CapitalClass, Candidate, Contract, EngineConfig, ExplorationStatus,
    ExploredCandidate, LiquidityAssessment, LiquidityGrade, SampleChecks, SampleReport,
    SampledCandidate, SamplingQuality, SelectionOutcome, SelectionResult, LEAP_MIN_DTE,
};
use tracing::{debug, info, warn};

use crate::cache::ChainCache;
use crate::liquidity::LiquidityGrader;
use crate::selector::{ChainView, SelectionFailure, StrikeSelector};
use chain_client::RateLimitedFetcher;

pub struct DeepExplorer<'a> {
    fetcher: &'a RateLimitedFetcher,
    cache: &'a ChainCache,
    cfg: &'a EngineConfig,
    today: NaiveDate,
}

impl<'a> DeepExplorer<'a> {
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

    pub async fn explore(&self, sampled: SampledCandidate) -> ExploredCandidate {
        let candidate = &sampled.candidate;
        let st = candidate.strategy_type;
        let sample = &sampled.sample;
        let selector = StrikeSelector::new(
            &self.cfg.selection,
            self.cfg.pipeline.allow_multi_expiry,
            self.today,
        );

        // Single-expiration strategies can run straight off a usable sample.
        if !st.needs_full_chain() && sample.quality >= SamplingQuality::Marginal {
            if let Some(slice) = sample.slice.clone() {
                let underlying = candidate.underlying_price.or(sample.underlying_price);
                let view = ChainView {
                    underlying_price: underlying,
                    expirations: vec![slice.as_ref()],
                };
                let outcome = selector.select(candidate, &view);
                debug!("{} {}: selected from Phase-1 sample", candidate.ticker, st);
                return self.finish(sampled, ExplorationStatus::Sampled, underlying, outcome);
            }
        }

        if !st.needs_full_chain()
            && sample.quality == SamplingQuality::Poor
            && self.cfg.pipeline.skip_full_fetch_on_poor_sample
        {
            let reason = format!("full fetch skipped after poor sample: {}", sample.note);
            info!("{} {}: {}", candidate.ticker, st, reason);
            return failed(sampled, ExplorationStatus::Skipped, reason);
        }

        let ticker = candidate.ticker.clone();
        let fetched = self
            .cache
            .get_or_fetch(&ticker, self.cfg.pipeline.force_refresh, || {
                self.fetcher.fetch_full_chain(&ticker)
            })
            .await;

        match fetched {
            Ok((snapshot, from_cache)) => {
                debug!(
                    "{} {}: full chain {} ({} expirations)",
                    ticker,
                    st,
                    if from_cache { "from cache" } else { "fetched" },
                    snapshot.expirations.len()
                );
                let underlying = candidate.underlying_price.or(snapshot.underlying_price);
                let view = ChainView {
                    underlying_price: underlying,
                    expirations: snapshot.expirations.iter().collect(),
                };
                let outcome = selector.select(candidate, &view);
                self.finish(sampled, ExplorationStatus::Explored, underlying, outcome)
            }
            Err(e) => {
                warn!("{} {}: full chain fetch failed: {}", ticker, st, e);
                failed(
                    sampled,
                    ExplorationStatus::Error,
                    format!("full chain fetch failed: {}", e),
                )
            }
        }
    }

    fn finish(
        &self,
        sampled: SampledCandidate,
        status: ExplorationStatus,
        underlying: Option<f64>,
        outcome: Result<SelectionResult, SelectionFailure>,
    ) -> ExploredCandidate {
        let candidate = &sampled.candidate;
        match outcome {
            Ok(selection) => {
                let annotation = self.annotate(candidate, &selection, status, underlying);
                info!(
                    "{} {}: {} @ {} ({} DTE), {:?}, tradable={}",
                    candidate.ticker,
                    candidate.strategy_type,
                    selection.promoted.contract.strike,
                    selection.expiration,
                    selection.dte,
                    annotation.liquidity_grade,
                    annotation.tradable
                );
                ExploredCandidate {
                    sampled,
                    selection: Some(selection),
                    candidate_contracts: Vec::new(),
                    annotation,
                }
            }
            Err(failure) => {
                info!(
                    "{} {}: {:?}: {}",
                    candidate.ticker, candidate.strategy_type, failure.outcome, failure.reason
                );
                let is_leap = candidate.target_dte() >= LEAP_MIN_DTE;
                let annotation = unselected_annotation(status, failure.outcome, &failure.reason, is_leap);
                ExploredCandidate {
                    sampled,
                    selection: None,
                    candidate_contracts: failure.near_misses,
                    annotation,
                }
            }
        }
    }

    fn annotate(
        &self,
        candidate: &Candidate,
        selection: &SelectionResult,
        status: ExplorationStatus,
        underlying: Option<f64>,
    ) -> Annotation {
        let grader = LiquidityGrader::new(&self.cfg.liquidity, &self.cfg.scoring);
        let legs: Vec<&Contract> = selection.option_legs().map(|(_, c)| c).collect();
        let liq = grader.assess(
            &legs,
            underlying,
            selection.dte,
            candidate.strategy_type.shape(),
        );

        let within_allocation = candidate
            .dollar_allocation
            .zip(selection.capital_required)
            .map(|(allocation, capital)| capital <= allocation);

        let (tradable, tradable_reason) = if liq.grade == LiquidityGrade::Illiquid {
            (false, format!("illiquid: {}", liq.context))
        } else if within_allocation == Some(false) {
            (
                false,
                format!(
                    "capital {:.0} exceeds allocation {:.0}",
                    selection.capital_required.unwrap_or_default(),
                    candidate.dollar_allocation.unwrap_or_default()
                ),
            )
        } else {
            (true, format!("{:?} liquidity; {}", liq.grade, liq.context))
        };

        Annotation {
            liquidity_grade: liq.grade,
            spread_assessment: liq.spread_assessment,
            oi_assessment: liq.oi_assessment,
            liquidity_context: liq.context,
            liquidity_score: liq.score,
            capital_class: CapitalClass::from_capital(selection.capital_required),
            within_allocation,
            is_leap: selection.dte >= LEAP_MIN_DTE,
            exploration_status: status,
            selection_outcome: SelectionOutcome::Selected,
            tradable,
            tradable_reason,
        }
    }
}

fn unselected_annotation(
    status: ExplorationStatus,
    outcome: SelectionOutcome,
    reason: &str,
    is_leap: bool,
) -> Annotation {
    let liq = LiquidityAssessment::absent(reason);
    Annotation {
        liquidity_grade: liq.grade,
        spread_assessment: liq.spread_assessment,
        oi_assessment: liq.oi_assessment,
        liquidity_context: liq.context,
        liquidity_score: liq.score,
        capital_class: CapitalClass::Unknown,
        within_allocation: None,
        is_leap,
        exploration_status: status,
        selection_outcome: outcome,
        tradable: false,
        tradable_reason: reason.to_string(),
    }
}

/// Close out a sampled candidate that never reached selection.
pub fn failed(sampled: SampledCandidate, status: ExplorationStatus, reason: String) -> ExploredCandidate {
    let is_leap = sampled.candidate.target_dte() >= LEAP_MIN_DTE;
    let annotation = unselected_annotation(status, SelectionOutcome::NotAttempted, &reason, is_leap);
    ExploredCandidate {
        sampled,
        selection: None,
        candidate_contracts: Vec::new(),
        annotation,
    }
}

/// Close out a candidate that never finished Phase 1 (timeout, panic).
pub fn unexplored(candidate: Candidate, status: ExplorationStatus, reason: String) -> ExploredCandidate {
    let sample = SampleReport {
        target_dte: candidate.target_dte(),
        expiration: None,
        dte: None,
        quality: SamplingQuality::Poor,
        checks: SampleChecks::default(),
        status,
        from_cache: false,
        note: reason.clone(),
        slice: None,
        underlying_price: None,
    };
    failed(SampledCandidate::new(candidate, sample), status, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::SampledExplorer;
    use crate::testing::{make_candidate, make_chain, make_fetcher, today};
    use chain_client::{QuoteOperation, StaticQuoteSource};
    use common::config::CacheConfig;
    use common::StrategyType;
    use std::sync::Arc;

    async fn run_both(
        source: Arc<StaticQuoteSource>,
        cache: &ChainCache,
        cfg: &EngineConfig,
        candidate: Candidate,
    ) -> ExploredCandidate {
        let fetcher = make_fetcher(source);
        let sample = SampledExplorer::new(&fetcher, cache, cfg, today())
            .sample(&candidate)
            .await;
        DeepExplorer::new(&fetcher, cache, cfg, today())
            .explore(SampledCandidate::new(candidate, sample))
            .await
    }

    #[tokio::test]
    async fn test_single_leg_runs_off_sample_without_full_fetch() {
        let source = Arc::new(StaticQuoteSource::new().with_snapshot(make_chain("AAPL", 100.0)));
        let cache = ChainCache::new(&CacheConfig::default());
        let cfg = EngineConfig::default();

        let explored = run_both(
            source.clone(),
            &cache,
            &cfg,
            make_candidate("AAPL", StrategyType::LongCall, 30, 45),
        )
        .await;
        assert_eq!(explored.annotation.exploration_status, ExplorationStatus::Sampled);
        assert_eq!(explored.annotation.selection_outcome, SelectionOutcome::Selected);
        assert!(explored.selection.is_some());
        // the sample's own listing only
        assert_eq!(source.calls(QuoteOperation::ListExpirations), 1);
    }

    #[tokio::test]
    async fn test_straddle_fetches_full_chain() {
        let source = Arc::new(StaticQuoteSource::new().with_snapshot(make_chain("XYZ", 100.0)));
        let cache = ChainCache::new(&CacheConfig::default());
        let cfg = EngineConfig::default();

        let explored = run_both(
            source.clone(),
            &cache,
            &cfg,
            make_candidate("XYZ", StrategyType::LongStraddle, 30, 45),
        )
        .await;
        assert_eq!(explored.annotation.exploration_status, ExplorationStatus::Explored);
        assert_eq!(explored.selection.as_ref().unwrap().legs.len(), 2);
        assert_eq!(source.calls(QuoteOperation::ListExpirations), 2);
        assert!(cache.get("XYZ").is_some());
    }

    #[tokio::test]
    async fn test_empty_chain_is_annotated_not_dropped() {
        let mut chain = make_chain("NIL", 100.0);
        for slice in &mut chain.expirations {
            slice.contracts.clear();
        }
        let source = Arc::new(StaticQuoteSource::new().with_snapshot(chain));
        let cache = ChainCache::new(&CacheConfig::default());
        let cfg = EngineConfig::default();

        let explored = run_both(
            source,
            &cache,
            &cfg,
            make_candidate("NIL", StrategyType::IronCondor, 30, 45),
        )
        .await;
        assert_eq!(explored.annotation.selection_outcome, SelectionOutcome::ChainEmpty);
        assert!(!explored.annotation.tradable);
        assert!(!explored.annotation.tradable_reason.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_error_status() {
        let source = Arc::new(StaticQuoteSource::new());
        let cache = ChainCache::new(&CacheConfig::default());
        let cfg = EngineConfig::default();

        let explored = run_both(
            source,
            &cache,
            &cfg,
            make_candidate("GONE", StrategyType::BullPutSpread, 30, 45),
        )
        .await;
        assert_eq!(explored.annotation.exploration_status, ExplorationStatus::Error);
        assert_eq!(explored.annotation.selection_outcome, SelectionOutcome::NotAttempted);
        assert!(explored.annotation.tradable_reason.contains("full chain"));
    }

    #[tokio::test]
    async fn test_poor_sample_skip_is_opt_in() {
        let source = Arc::new(StaticQuoteSource::new());
        let cache = ChainCache::new(&CacheConfig::default());
        let mut cfg = EngineConfig::default();
        cfg.pipeline.skip_full_fetch_on_poor_sample = true;

        let explored = run_both(
            source.clone(),
            &cache,
            &cfg,
            make_candidate("NONE", StrategyType::LongPut, 30, 45),
        )
        .await;
        assert_eq!(explored.annotation.exploration_status, ExplorationStatus::Skipped);
        // the sample's own listing only
        assert_eq!(source.calls(QuoteOperation::ListExpirations), 1);
    }

    #[tokio::test]
    async fn test_allocation_breach_is_not_tradable() {
        let source = Arc::new(StaticQuoteSource::new().with_snapshot(make_chain("ABC", 100.0)));
        let cache = ChainCache::new(&CacheConfig::default());
        let cfg = EngineConfig::default();
        let mut candidate = make_candidate("ABC", StrategyType::CashSecuredPut, 30, 45);
        candidate.dollar_allocation = Some(1_000.0);

        let explored = run_both(source, &cache, &cfg, candidate).await;
        assert_eq!(explored.annotation.within_allocation, Some(false));
        assert!(!explored.annotation.tradable);
        assert!(explored.annotation.tradable_reason.contains("allocation"));
    }

    #[test]
    fn test_unexplored_keeps_candidate_fields() {
        let c = make_candidate("SLOW", StrategyType::LongCall, 400, 500);
        let explored = unexplored(c.clone(), ExplorationStatus::TimedOut, "timed out".into());
        assert_eq!(explored.sampled.candidate, c);
        assert!(explored.annotation.is_leap);
        assert_eq!(explored.annotation.exploration_status, ExplorationStatus::TimedOut);
    }
}
