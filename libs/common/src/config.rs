//! Engine configuration types.
//!
//! Every threshold the explorer, grader, scorer and validator use lives
//! here and is passed explicitly into each component.

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// External quoting API client settings.
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Chain cache tiers.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Worker pool and phase policy.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Phase-1 viability checks.
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Strike selection targets.
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Liquidity grading thresholds.
    #[serde(default)]
    pub liquidity: LiquidityConfig,

    /// PCS weights and floors.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Theory validator gates.
    #[serde(default)]
    pub theory: TheoryConfig,
}

/// Quoting API connection and call policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// REST base URL of the quoting provider.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token for the provider (empty = unauthenticated).
    #[serde(default)]
    pub api_token: String,

    /// Max in-flight calls.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_calls: usize,

    /// Minimum spacing between call starts (ms). 0 disables spacing.
    #[serde(default = "default_min_interval_ms")]
    pub min_call_interval_ms: u64,

    /// Per-call timeout (ms).
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Backoff before the single retry of a transient failure (ms).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Chain cache tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Tickers kept in the memory tier before LRU eviction.
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    /// Max age of a snapshot in either tier (seconds).
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Directory for the persisted tier. `None` = memory only.
    #[serde(default)]
    pub persist_dir: Option<String>,
}

/// Worker pool and phase policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Candidates explored concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Wall-clock budget per candidate (ms).
    #[serde(default = "default_candidate_timeout_ms")]
    pub candidate_timeout_ms: u64,

    /// Let calendar/diagonal structures through as simplified single-expiry builds.
    #[serde(default)]
    pub allow_multi_expiry: bool,

    /// Skip the full fetch for single-expiration strategies whose sample is Poor.
    #[serde(default)]
    pub skip_full_fetch_on_poor_sample: bool,

    /// Bypass cache reads (fetches are still single-flighted and written back).
    #[serde(default)]
    pub force_refresh: bool,
}

/// Phase-1 viability checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// ATM strike must lie within this fraction of the underlying price.
    #[serde(default = "default_atm_band_pct")]
    pub atm_band_pct: f64,

    /// Loose spread bound as a multiple of the eventual grading ceiling.
    #[serde(default = "default_loose_spread_multiple")]
    pub loose_spread_multiple: f64,
}

/// Strike selection targets (absolute deltas).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default = "default_min_delta")]
    pub min_delta: f64,
    #[serde(default = "default_max_delta")]
    pub max_delta: f64,
    /// Target delta for short-dated long single legs.
    #[serde(default = "default_directional_target_delta")]
    pub directional_target_delta: f64,
    /// LEAP single legs must sit at or beyond this delta.
    #[serde(default = "default_leap_min_delta")]
    pub leap_min_delta: f64,
    #[serde(default = "default_leap_target_delta")]
    pub leap_target_delta: f64,
    /// Short option of CSP / covered call / buy-write.
    #[serde(default = "default_short_option_delta")]
    pub short_option_delta: f64,
    #[serde(default = "default_debit_long_delta")]
    pub debit_long_delta: f64,
    #[serde(default = "default_debit_short_delta")]
    pub debit_short_delta: f64,
    #[serde(default = "default_credit_short_delta")]
    pub credit_short_delta: f64,
    #[serde(default = "default_credit_long_delta")]
    pub credit_long_delta: f64,
    #[serde(default = "default_condor_short_delta")]
    pub condor_short_delta: f64,
    #[serde(default = "default_condor_long_delta")]
    pub condor_long_delta: f64,
    /// Strangle legs sit this fraction OTM on each side.
    #[serde(default = "default_strangle_otm_pct")]
    pub strangle_otm_pct: f64,
    /// Annualized risk-free rate used by the Greek approximation.
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    /// Nearest misses kept when no strike qualifies.
    #[serde(default = "default_max_near_misses")]
    pub max_near_misses: usize,
}

/// One row of the price-tier table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTier {
    /// Tier applies when the underlying is at or above this price.
    pub min_price: f64,
    /// Max (ask - bid) / mid for short-dated contracts.
    pub max_spread_pct: f64,
    /// Min open interest for short-dated contracts.
    pub min_open_interest: u64,
}

/// Liquidity grading thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityConfig {
    /// Short-term tiers, highest `min_price` first.
    #[serde(default = "default_price_tiers")]
    pub price_tiers: Vec<PriceTier>,

    /// DTE at which the medium tier starts.
    #[serde(default = "default_medium_min_dte")]
    pub medium_min_dte: i64,

    /// DTE at which the LEAP tier starts.
    #[serde(default = "default_leap_min_dte")]
    pub leap_min_dte: i64,

    #[serde(default = "default_medium_spread_multiplier")]
    pub medium_spread_multiplier: f64,
    #[serde(default = "default_medium_oi_multiplier")]
    pub medium_oi_multiplier: f64,
    #[serde(default = "default_leap_spread_multiplier")]
    pub leap_spread_multiplier: f64,
    #[serde(default = "default_leap_oi_multiplier")]
    pub leap_oi_multiplier: f64,

    /// Combined-spread tolerance for two-leg volatility structures.
    #[serde(default = "default_volatility_spread_multiplier")]
    pub volatility_spread_multiplier: f64,
}

/// Scoring mode. Strict tightens liquidity before the same rules run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    Standard,
    Strict,
}

/// PCS weights and floors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_scoring_mode")]
    pub mode: ScoringMode,
    /// Strict-mode multiplier on the OI floor.
    #[serde(default = "default_strict_oi_multiplier")]
    pub strict_oi_multiplier: f64,
    /// Strict-mode multiplier on the spread ceiling.
    #[serde(default = "default_strict_spread_multiplier")]
    pub strict_spread_multiplier: f64,
    /// DTE below this is a critical failure.
    #[serde(default = "default_min_dte_floor")]
    pub min_dte_floor: i64,
    /// DTE adequacy saturates here.
    #[serde(default = "default_dte_cap")]
    pub dte_cap: i64,
    #[serde(default = "default_liquidity_weight")]
    pub liquidity_weight: f64,
    #[serde(default = "default_dte_weight")]
    pub dte_weight: f64,
    #[serde(default = "default_risk_weight")]
    pub risk_weight: f64,
    #[serde(default = "default_strategy_weight")]
    pub strategy_weight: f64,
    /// Strategy sub-score below this is a critical failure.
    #[serde(default = "default_min_strategy_score")]
    pub min_strategy_score: f64,
    /// Liquidity sub-score below this is a (non-critical) issue.
    #[serde(default = "default_min_liquidity_score")]
    pub min_liquidity_score: f64,
}

/// Theory validator gates and scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TheoryConfig {
    /// Put IV / call IV above this rejects a volatility structure.
    #[serde(default = "default_max_put_call_skew")]
    pub max_put_call_skew: f64,
    /// Realized vol / implied vol above this rejects a long-vol structure.
    #[serde(default = "default_max_rv_iv_ratio")]
    pub max_rv_iv_ratio: f64,
    /// Income structures below this POP are rejected.
    #[serde(default = "default_min_pop")]
    pub min_probability_of_profit: f64,
    #[serde(default = "default_weak_delta")]
    pub weak_delta: f64,
    #[serde(default = "default_weak_gamma")]
    pub weak_gamma: f64,
    #[serde(default = "default_base_score")]
    pub base_score: f64,
    #[serde(default = "default_valid_score")]
    pub valid_score: f64,
    #[serde(default = "default_watch_score")]
    pub watch_score: f64,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://api.tradier.com/v1".into()
}
fn default_max_concurrent() -> usize {
    8
}
fn default_min_interval_ms() -> u64 {
    100
}
fn default_call_timeout_ms() -> u64 {
    30_000
}
fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_memory_capacity() -> usize {
    100
}
fn default_max_age_secs() -> u64 {
    86_400
}

fn default_workers() -> usize {
    8
}
fn default_candidate_timeout_ms() -> u64 {
    30_000
}

fn default_atm_band_pct() -> f64 {
    0.02
}
fn default_loose_spread_multiple() -> f64 {
    2.0
}

fn default_min_delta() -> f64 {
    0.15
}
fn default_max_delta() -> f64 {
    0.85
}
fn default_directional_target_delta() -> f64 {
    0.50
}
fn default_leap_min_delta() -> f64 {
    0.60
}
fn default_leap_target_delta() -> f64 {
    0.70
}
fn default_short_option_delta() -> f64 {
    0.30
}
fn default_debit_long_delta() -> f64 {
    0.60
}
fn default_debit_short_delta() -> f64 {
    0.30
}
fn default_credit_short_delta() -> f64 {
    0.30
}
fn default_credit_long_delta() -> f64 {
    0.15
}
fn default_condor_short_delta() -> f64 {
    0.20
}
fn default_condor_long_delta() -> f64 {
    0.10
}
fn default_strangle_otm_pct() -> f64 {
    0.05
}
fn default_risk_free_rate() -> f64 {
    0.04
}
fn default_max_near_misses() -> usize {
    5
}

fn default_price_tiers() -> Vec<PriceTier> {
    vec![
        PriceTier {
            min_price: 1000.0,
            max_spread_pct: 0.10,
            min_open_interest: 25,
        },
        PriceTier {
            min_price: 500.0,
            max_spread_pct: 0.08,
            min_open_interest: 50,
        },
        PriceTier {
            min_price: 200.0,
            max_spread_pct: 0.06,
            min_open_interest: 75,
        },
        PriceTier {
            min_price: 0.0,
            max_spread_pct: 0.05,
            min_open_interest: 100,
        },
    ]
}
fn default_medium_min_dte() -> i64 {
    90
}
fn default_leap_min_dte() -> i64 {
    crate::types::LEAP_MIN_DTE
}
fn default_medium_spread_multiplier() -> f64 {
    1.5
}
fn default_medium_oi_multiplier() -> f64 {
    0.6
}
fn default_leap_spread_multiplier() -> f64 {
    2.5
}
fn default_leap_oi_multiplier() -> f64 {
    0.3
}
fn default_volatility_spread_multiplier() -> f64 {
    1.8
}

fn default_scoring_mode() -> ScoringMode {
    ScoringMode::Standard
}
fn default_strict_oi_multiplier() -> f64 {
    1.5
}
fn default_strict_spread_multiplier() -> f64 {
    0.7
}
fn default_min_dte_floor() -> i64 {
    5
}
fn default_dte_cap() -> i64 {
    60
}
fn default_liquidity_weight() -> f64 {
    0.30
}
fn default_dte_weight() -> f64 {
    0.20
}
fn default_risk_weight() -> f64 {
    0.20
}
fn default_strategy_weight() -> f64 {
    0.30
}
fn default_min_strategy_score() -> f64 {
    50.0
}
fn default_min_liquidity_score() -> f64 {
    40.0
}

fn default_max_put_call_skew() -> f64 {
    1.20
}
fn default_max_rv_iv_ratio() -> f64 {
    1.15
}
fn default_min_pop() -> f64 {
    0.65
}
fn default_weak_delta() -> f64 {
    0.45
}
fn default_weak_gamma() -> f64 {
    0.03
}
fn default_base_score() -> f64 {
    70.0
}
fn default_valid_score() -> f64 {
    70.0
}
fn default_watch_score() -> f64 {
    50.0
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: String::new(),
            max_concurrent_calls: default_max_concurrent(),
            min_call_interval_ms: default_min_interval_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: default_memory_capacity(),
            max_age_secs: default_max_age_secs(),
            persist_dir: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            candidate_timeout_ms: default_candidate_timeout_ms(),
            allow_multi_expiry: false,
            skip_full_fetch_on_poor_sample: false,
            force_refresh: false,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            atm_band_pct: default_atm_band_pct(),
            loose_spread_multiple: default_loose_spread_multiple(),
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            min_delta: default_min_delta(),
            max_delta: default_max_delta(),
            directional_target_delta: default_directional_target_delta(),
            leap_min_delta: default_leap_min_delta(),
            leap_target_delta: default_leap_target_delta(),
            short_option_delta: default_short_option_delta(),
            debit_long_delta: default_debit_long_delta(),
            debit_short_delta: default_debit_short_delta(),
            credit_short_delta: default_credit_short_delta(),
            credit_long_delta: default_credit_long_delta(),
            condor_short_delta: default_condor_short_delta(),
            condor_long_delta: default_condor_long_delta(),
            strangle_otm_pct: default_strangle_otm_pct(),
            risk_free_rate: default_risk_free_rate(),
            max_near_misses: default_max_near_misses(),
        }
    }
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            price_tiers: default_price_tiers(),
            medium_min_dte: default_medium_min_dte(),
            leap_min_dte: default_leap_min_dte(),
            medium_spread_multiplier: default_medium_spread_multiplier(),
            medium_oi_multiplier: default_medium_oi_multiplier(),
            leap_spread_multiplier: default_leap_spread_multiplier(),
            leap_oi_multiplier: default_leap_oi_multiplier(),
            volatility_spread_multiplier: default_volatility_spread_multiplier(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            mode: default_scoring_mode(),
            strict_oi_multiplier: default_strict_oi_multiplier(),
            strict_spread_multiplier: default_strict_spread_multiplier(),
            min_dte_floor: default_min_dte_floor(),
            dte_cap: default_dte_cap(),
            liquidity_weight: default_liquidity_weight(),
            dte_weight: default_dte_weight(),
            risk_weight: default_risk_weight(),
            strategy_weight: default_strategy_weight(),
            min_strategy_score: default_min_strategy_score(),
            min_liquidity_score: default_min_liquidity_score(),
        }
    }
}

impl Default for TheoryConfig {
    fn default() -> Self {
        Self {
            max_put_call_skew: default_max_put_call_skew(),
            max_rv_iv_ratio: default_max_rv_iv_ratio(),
            min_probability_of_profit: default_min_pop(),
            weak_delta: default_weak_delta(),
            weak_gamma: default_weak_gamma(),
            base_score: default_base_score(),
            valid_score: default_valid_score(),
            watch_score: default_watch_score(),
        }
    }
}

impl ScoringConfig {
    pub fn is_strict(&self) -> bool {
        self.mode == ScoringMode::Strict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_limits() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.fetcher.max_concurrent_calls, 8);
        assert_eq!(cfg.fetcher.min_call_interval_ms, 100);
        assert_eq!(cfg.fetcher.call_timeout_ms, 30_000);
        assert_eq!(cfg.cache.memory_capacity, 100);
        assert_eq!(cfg.cache.max_age_secs, 24 * 3600);
        assert_eq!(cfg.pipeline.workers, 8);
        assert!(!cfg.pipeline.allow_multi_expiry);
        assert_eq!(cfg.scoring.mode, ScoringMode::Standard);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let raw = r#"
            [scoring]
            mode = "strict"

            [pipeline]
            workers = 2
        "#;
        let cfg: EngineConfig = toml::from_str(raw).unwrap();
        assert!(cfg.scoring.is_strict());
        assert_eq!(cfg.pipeline.workers, 2);
        assert_eq!(cfg.pipeline.candidate_timeout_ms, 30_000);
        assert_eq!(cfg.liquidity.price_tiers.len(), 4);
        assert!((cfg.theory.max_put_call_skew - 1.20).abs() < 1e-9);
    }

    #[test]
    fn test_scoring_weights_sum_to_one() {
        let s = ScoringConfig::default();
        let total = s.liquidity_weight + s.dte_weight + s.risk_weight + s.strategy_weight;
        assert!((total - 1.0).abs() < 1e-9, "weights sum to {}", total);
    }
}
