//! Batch driver.
//!
//! One task per candidate, at most `workers` exploring at once, each under
//! its own wall-clock budget. Scoring and validation are synchronous and
//! run as results are collected. Output order always matches input order.

use chrono::{NaiveDate, Utc};
use common::{
    Candidate, CandidateRecord, EngineConfig, ExplorationStatus, ExploredCandidate, PcsStatus,
    SampledCandidate, VerdictStatus,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use theory::TheoryValidator;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::cache::ChainCache;
use crate::deep::{unexplored, DeepExplorer};
use crate::sampler::SampledExplorer;
use crate::scoring::PcsScorer;
use chain_client::RateLimitedFetcher;

pub struct PipelineOrchestrator {
    fetcher: RateLimitedFetcher,
    cache: Arc<ChainCache>,
    cfg: Arc<EngineConfig>,
}

impl PipelineOrchestrator {
    pub fn new(fetcher: RateLimitedFetcher, cache: Arc<ChainCache>, cfg: Arc<EngineConfig>) -> Self {
        Self {
            fetcher,
            cache,
            cfg,
        }
    }

    pub fn cache(&self) -> &ChainCache {
        &self.cache
    }

    pub fn fetcher(&self) -> &RateLimitedFetcher {
        &self.fetcher
    }

    pub async fn run(&self, candidates: Vec<Candidate>) -> Vec<CandidateRecord> {
        self.run_at(candidates, Utc::now().date_naive()).await
    }

    /// Run a batch with DTE measured from `today`.
    pub async fn run_at(&self, candidates: Vec<Candidate>, today: NaiveDate) -> Vec<CandidateRecord> {
        let workers = self.cfg.pipeline.workers.max(1);
        let budget_ms = self.cfg.pipeline.candidate_timeout_ms;
        info!(
            "Exploring {} candidates ({} workers, {}ms budget each)",
            candidates.len(),
            workers,
            budget_ms
        );

        let permits = Arc::new(Semaphore::new(workers));
        let mut handles = Vec::with_capacity(candidates.len());
        for candidate in candidates.iter().cloned() {
            let fetcher = self.fetcher.clone();
            let cache = self.cache.clone();
            let cfg = self.cfg.clone();
            let permits = permits.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let work = explore_one(&fetcher, &cache, &cfg, candidate.clone(), today);
                match tokio::time::timeout(Duration::from_millis(budget_ms), work).await {
                    Ok(explored) => explored,
                    Err(_) => {
                        warn!(
                            "{} {}: timed out after {}ms",
                            candidate.ticker, candidate.strategy_type, budget_ms
                        );
                        unexplored(
                            candidate,
                            ExplorationStatus::TimedOut,
                            format!("exploration timed out after {}ms", budget_ms),
                        )
                    }
                }
            }));
        }

        let scorer = PcsScorer::new(&self.cfg);
        let validator = TheoryValidator::new(&self.cfg.theory);
        let mut records = Vec::with_capacity(handles.len());
        for (handle, candidate) in handles.into_iter().zip(candidates) {
            let explored = match handle.await {
                Ok(explored) => explored,
                Err(e) => {
                    error!("{} {}: exploration task failed: {}", candidate.ticker, candidate.strategy_type, e);
                    unexplored(
                        candidate,
                        ExplorationStatus::Error,
                        format!("exploration task failed: {}", e),
                    )
                }
            };
            let scored = scorer.score(explored);
            let verdict = validator.validate(&scored);
            records.push(scored.into_record(verdict));
        }
        records
    }
}

async fn explore_one(
    fetcher: &RateLimitedFetcher,
    cache: &ChainCache,
    cfg: &EngineConfig,
    candidate: Candidate,
    today: NaiveDate,
) -> ExploredCandidate {
    let sample = SampledExplorer::new(fetcher, cache, cfg, today)
        .sample(&candidate)
        .await;
    DeepExplorer::new(fetcher, cache, cfg, today)
        .explore(SampledCandidate::new(candidate, sample))
        .await
}

// ── Batch summary ─────────────────────────────────────────────────────

/// Status histogram over a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub tradable: usize,
    pub exploration: BTreeMap<String, usize>,
    pub pcs: BTreeMap<String, usize>,
    pub verdicts: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn from_records(records: &[CandidateRecord]) -> Self {
        let mut summary = RunSummary {
            total: records.len(),
            ..Default::default()
        };
        for r in records {
            let annotation = r.annotation();
            if annotation.tradable {
                summary.tradable += 1;
            }
            *summary
                .exploration
                .entry(format!("{:?}", annotation.exploration_status))
                .or_default() += 1;
            *summary.pcs.entry(pcs_label(r.scored.pcs.status).into()).or_default() += 1;
            *summary
                .verdicts
                .entry(verdict_label(r.verdict.status).into())
                .or_default() += 1;
        }
        summary
    }
}

fn pcs_label(status: PcsStatus) -> &'static str {
    match status {
        PcsStatus::Valid => "valid",
        PcsStatus::Watch => "watch",
        PcsStatus::Rejected => "rejected",
    }
}

fn verdict_label(status: VerdictStatus) -> &'static str {
    match status {
        VerdictStatus::Valid => "valid",
        VerdictStatus::Watch => "watch",
        VerdictStatus::Reject => "reject",
        VerdictStatus::IncompleteData => "incomplete",
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |m: &BTreeMap<String, usize>| {
            m.iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(" ")
        };
        write!(
            f,
            "{} candidates, {} tradable | exploration: {} | pcs: {} | theory: {}",
            self.total,
            self.tradable,
            join(&self.exploration),
            join(&self.pcs),
            join(&self.verdicts)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_candidate, make_chain, make_chain_with_iv, make_fetcher, today};
    use chain_client::{QuoteOperation, StaticQuoteSource};
    use common::config::CacheConfig;
    use common::{ChainSnapshot, HardGate, MarketContext, SamplingQuality, StrategyType};

    fn make_pipeline(source: Arc<StaticQuoteSource>, cfg: EngineConfig) -> PipelineOrchestrator {
        PipelineOrchestrator::new(
            make_fetcher(source),
            Arc::new(ChainCache::new(&CacheConfig::default())),
            Arc::new(cfg),
        )
    }

    /// Every quote 60% wide: the sample grades Marginal on the spread check.
    fn make_wide_chain(ticker: &str, spot: f64) -> ChainSnapshot {
        let mut chain = make_chain(ticker, spot);
        for contract in chain.expirations.iter_mut().flat_map(|e| e.contracts.iter_mut()) {
            if let Some(mid) = contract.mid() {
                contract.bid = Some(mid * 0.7);
                contract.ask = Some(mid * 1.3);
            }
        }
        chain
    }

    #[tokio::test]
    async fn test_empty_batch_yields_empty_summary() {
        let source = Arc::new(StaticQuoteSource::new().with_snapshot(make_chain("AAPL", 100.0)));
        let pipeline = make_pipeline(source.clone(), EngineConfig::default());

        let records = pipeline.run_at(Vec::new(), today()).await;
        assert!(records.is_empty());
        let summary = RunSummary::from_records(&records);
        assert_eq!(summary, RunSummary::default());
        assert!(summary.to_string().starts_with("0 candidates"));
        assert_eq!(source.calls(QuoteOperation::ListExpirations), 0);
    }

    #[tokio::test]
    async fn test_output_matches_input_cardinality_and_order() {
        let source = Arc::new(
            StaticQuoteSource::new()
                .with_snapshot(make_chain("AAPL", 100.0))
                .with_snapshot(make_chain("MSFT", 250.0))
                .with_snapshot(make_chain("KO", 60.0)),
        );
        let pipeline = make_pipeline(source, EngineConfig::default());
        let candidates = vec![
            make_candidate("MSFT", StrategyType::IronCondor, 30, 45),
            make_candidate("AAPL", StrategyType::LongCall, 30, 45),
            make_candidate("NOPE", StrategyType::LongPut, 30, 45),
            make_candidate("KO", StrategyType::CashSecuredPut, 30, 45),
            make_candidate("AAPL", StrategyType::BullPutSpread, 30, 45),
        ];
        let expected: Vec<(String, StrategyType)> = candidates
            .iter()
            .map(|c| (c.ticker.clone(), c.strategy_type))
            .collect();

        let records = pipeline.run_at(candidates, today()).await;
        assert_eq!(records.len(), expected.len());
        for (r, (ticker, st)) in records.iter().zip(&expected) {
            assert_eq!(&r.candidate().ticker, ticker);
            assert_eq!(r.candidate().strategy_type, *st);
            assert!(!r.annotation().tradable_reason.is_empty());
        }
    }

    #[tokio::test]
    async fn test_call_and_straddle_share_one_full_fetch() {
        let source = Arc::new(StaticQuoteSource::new().with_snapshot(make_chain("AAPL", 100.0)));
        let pipeline = make_pipeline(source.clone(), EngineConfig::default());

        let records = pipeline
            .run_at(
                vec![
                    make_candidate("AAPL", StrategyType::LongCall, 30, 45),
                    make_candidate("AAPL", StrategyType::LongStraddle, 30, 45),
                ],
                today(),
            )
            .await;
        assert_eq!(records.len(), 2);
        assert_eq!(pipeline.fetcher().stats().full_chain_fetches(), 1);
    }

    #[tokio::test]
    async fn test_many_candidates_one_ticker_single_flight() {
        let source = Arc::new(
            StaticQuoteSource::new()
                .with_snapshot(make_chain("SPY", 500.0))
                .with_latency(Duration::from_millis(20)),
        );
        let pipeline = make_pipeline(source.clone(), EngineConfig::default());
        let candidates = [
            StrategyType::LongStraddle,
            StrategyType::LongStrangle,
            StrategyType::IronCondor,
            StrategyType::BullPutSpread,
            StrategyType::BearCallSpread,
            StrategyType::BullCallSpread,
        ]
        .iter()
        .map(|st| make_candidate("SPY", *st, 30, 45))
        .collect();

        let records = pipeline.run_at(candidates, today()).await;
        assert_eq!(records.len(), 6);
        assert_eq!(pipeline.fetcher().stats().full_chain_fetches(), 1);
        assert!(records
            .iter()
            .all(|r| r.annotation().exploration_status == ExplorationStatus::Explored));
    }

    #[tokio::test]
    async fn test_failing_ticker_does_not_affect_siblings() {
        let source = Arc::new(
            StaticQuoteSource::new()
                .with_snapshot(make_chain("AAPL", 100.0))
                .with_snapshot(make_chain("DOWN", 100.0))
                .with_failure("DOWN", 404),
        );
        let pipeline = make_pipeline(source, EngineConfig::default());
        let records = pipeline
            .run_at(
                vec![
                    make_candidate("DOWN", StrategyType::LongStraddle, 30, 45),
                    make_candidate("AAPL", StrategyType::LongStraddle, 30, 45),
                ],
                today(),
            )
            .await;
        assert_eq!(records[0].annotation().exploration_status, ExplorationStatus::Error);
        assert!(!records[0].annotation().tradable);
        assert_eq!(records[1].annotation().exploration_status, ExplorationStatus::Explored);
        assert!(records[1].selection().is_some());
    }

    #[tokio::test]
    async fn test_hung_candidate_times_out_alone() {
        let source = Arc::new(
            StaticQuoteSource::new()
                .with_snapshot(make_chain("AAPL", 100.0))
                .with_hang("SLOW"),
        );
        let mut cfg = EngineConfig::default();
        cfg.pipeline.candidate_timeout_ms = 300;
        let pipeline = make_pipeline(source, cfg);

        let records = pipeline
            .run_at(
                vec![
                    make_candidate("SLOW", StrategyType::LongCall, 30, 45),
                    make_candidate("AAPL", StrategyType::LongCall, 30, 45),
                ],
                today(),
            )
            .await;
        assert_eq!(records[0].annotation().exploration_status, ExplorationStatus::TimedOut);
        assert!(records[0].annotation().tradable_reason.contains("timed out"));
        assert_eq!(records[1].annotation().exploration_status, ExplorationStatus::Sampled);
    }

    #[tokio::test]
    async fn test_skewed_straddle_rejected_end_to_end() {
        let source = Arc::new(
            StaticQuoteSource::new().with_snapshot(make_chain_with_iv("XYZ", 100.0, 0.30, 0.44)),
        );
        let pipeline = make_pipeline(source, EngineConfig::default());
        let records = pipeline
            .run_at(vec![make_candidate("XYZ", StrategyType::LongStraddle, 40, 50)], today())
            .await;
        let verdict = &records[0].verdict;
        assert_eq!(verdict.status, VerdictStatus::Reject);
        assert_eq!(verdict.hard_gate_triggered, Some(HardGate::PutCallSkew));
        assert!(verdict.notes.iter().any(|n| n.contains("skew") && n.contains("1.47")));
    }

    #[tokio::test]
    async fn test_summary_counts_every_record() {
        let source = Arc::new(StaticQuoteSource::new().with_snapshot(make_chain("AAPL", 100.0)));
        let pipeline = make_pipeline(source, EngineConfig::default());
        let records = pipeline
            .run_at(
                vec![
                    make_candidate("AAPL", StrategyType::LongCall, 30, 45),
                    make_candidate("NOPE", StrategyType::LongCall, 30, 45),
                ],
                today(),
            )
            .await;
        let summary = RunSummary::from_records(&records);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.exploration.values().sum::<usize>(), 2);
        assert_eq!(summary.verdicts.values().sum::<usize>(), 2);
        assert!(summary.to_string().starts_with("2 candidates"));
    }

    #[tokio::test]
    async fn test_marginal_sample_serves_single_leg_without_full_fetch() {
        let source = Arc::new(StaticQuoteSource::new().with_snapshot(make_wide_chain("WIDE", 100.0)));
        let pipeline = make_pipeline(source.clone(), EngineConfig::default());

        let records = pipeline
            .run_at(vec![make_candidate("WIDE", StrategyType::LongCall, 30, 45)], today())
            .await;
        let sample = &records[0].scored.explored.sampled.sample;
        assert_eq!(sample.quality, SamplingQuality::Marginal, "{}", sample.note);
        assert!(sample.note.contains("ATM spread beyond loose bound"));
        assert_eq!(records[0].annotation().exploration_status, ExplorationStatus::Sampled);
        assert_eq!(pipeline.fetcher().stats().full_chain_fetches(), 0);
        assert_eq!(source.calls(QuoteOperation::ListExpirations), 1);
    }

    #[tokio::test]
    async fn test_skewed_strangle_rejected_end_to_end() {
        let source = Arc::new(
            StaticQuoteSource::new().with_snapshot(make_chain_with_iv("XYZ", 100.0, 0.30, 0.44)),
        );
        let pipeline = make_pipeline(source, EngineConfig::default());
        let records = pipeline
            .run_at(vec![make_candidate("XYZ", StrategyType::LongStrangle, 40, 50)], today())
            .await;
        assert_eq!(records[0].annotation().exploration_status, ExplorationStatus::Explored);
        let verdict = &records[0].verdict;
        assert_eq!(verdict.status, VerdictStatus::Reject);
        assert_eq!(verdict.hard_gate_triggered, Some(HardGate::PutCallSkew));
    }

    #[tokio::test]
    async fn test_straddle_with_rich_realized_vol_rejected_end_to_end() {
        let source = Arc::new(StaticQuoteSource::new().with_snapshot(make_chain("XYZ", 100.0)));
        let pipeline = make_pipeline(source, EngineConfig::default());
        let mut candidate = make_candidate("XYZ", StrategyType::LongStraddle, 40, 50);
        candidate.context = MarketContext {
            realized_vol: Some(0.40),
            ..Default::default()
        };

        let records = pipeline.run_at(vec![candidate], today()).await;
        let verdict = &records[0].verdict;
        assert_eq!(verdict.status, VerdictStatus::Reject);
        assert_eq!(verdict.hard_gate_triggered, Some(HardGate::RealizedImpliedRatio));
        assert!(verdict.notes.iter().any(|n| n.contains("realized/implied 1.33")));
    }
}
