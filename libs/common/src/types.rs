//! Domain types shared across the explorer.
//!
//! Records grow append-only through the pipeline: every stage wraps the
//! previous stage's record and adds its own fields, so nothing set
//! upstream is ever overwritten.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Days at or beyond which a candidate is treated as a LEAP.
pub const LEAP_MIN_DTE: i64 = 365;

/// Contract multiplier for US equity options.
pub const CONTRACT_MULTIPLIER: f64 = 100.0;

// ── Strategy catalogue ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    LongCall,
    LongPut,
    CashSecuredPut,
    CoveredCall,
    BuyWrite,
    BullCallSpread,
    BearPutSpread,
    BullPutSpread,
    BearCallSpread,
    LongStraddle,
    LongStrangle,
    IronCondor,
    CalendarSpread,
    DiagonalSpread,
}

/// Theory family a strategy is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyFamily {
    Directional,
    Volatility,
    Income,
}

/// Leg structure the strike selector has to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureShape {
    SingleLeg,
    Vertical,
    Straddle,
    Strangle,
    IronCondor,
    BuyWrite,
    MultiExpiry,
}

impl StrategyType {
    pub const ALL: [StrategyType; 14] = [
        StrategyType::LongCall,
        StrategyType::LongPut,
        StrategyType::CashSecuredPut,
        StrategyType::CoveredCall,
        StrategyType::BuyWrite,
        StrategyType::BullCallSpread,
        StrategyType::BearPutSpread,
        StrategyType::BullPutSpread,
        StrategyType::BearCallSpread,
        StrategyType::LongStraddle,
        StrategyType::LongStrangle,
        StrategyType::IronCondor,
        StrategyType::CalendarSpread,
        StrategyType::DiagonalSpread,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StrategyType::LongCall => "Long Call",
            StrategyType::LongPut => "Long Put",
            StrategyType::CashSecuredPut => "Cash-Secured Put",
            StrategyType::CoveredCall => "Covered Call",
            StrategyType::BuyWrite => "Buy-Write",
            StrategyType::BullCallSpread => "Bull Call Spread",
            StrategyType::BearPutSpread => "Bear Put Spread",
            StrategyType::BullPutSpread => "Bull Put Spread",
            StrategyType::BearCallSpread => "Bear Call Spread",
            StrategyType::LongStraddle => "Long Straddle",
            StrategyType::LongStrangle => "Long Strangle",
            StrategyType::IronCondor => "Iron Condor",
            StrategyType::CalendarSpread => "Calendar Spread",
            StrategyType::DiagonalSpread => "Diagonal Spread",
        }
    }

    pub fn family(self) -> StrategyFamily {
        match self {
            StrategyType::LongCall
            | StrategyType::LongPut
            | StrategyType::BullCallSpread
            | StrategyType::BearPutSpread => StrategyFamily::Directional,
            StrategyType::LongStraddle
            | StrategyType::LongStrangle
            | StrategyType::CalendarSpread
            | StrategyType::DiagonalSpread => StrategyFamily::Volatility,
            StrategyType::CashSecuredPut
            | StrategyType::CoveredCall
            | StrategyType::BuyWrite
            | StrategyType::BullPutSpread
            | StrategyType::BearCallSpread
            | StrategyType::IronCondor => StrategyFamily::Income,
        }
    }

    pub fn shape(self) -> StructureShape {
        match self {
            StrategyType::LongCall
            | StrategyType::LongPut
            | StrategyType::CashSecuredPut
            | StrategyType::CoveredCall => StructureShape::SingleLeg,
            StrategyType::BuyWrite => StructureShape::BuyWrite,
            StrategyType::BullCallSpread
            | StrategyType::BearPutSpread
            | StrategyType::BullPutSpread
            | StrategyType::BearCallSpread => StructureShape::Vertical,
            StrategyType::LongStraddle => StructureShape::Straddle,
            StrategyType::LongStrangle => StructureShape::Strangle,
            StrategyType::IronCondor => StructureShape::IronCondor,
            StrategyType::CalendarSpread | StrategyType::DiagonalSpread => {
                StructureShape::MultiExpiry
            }
        }
    }

    /// Net-credit structures (premium received at entry).
    pub fn is_credit(self) -> bool {
        matches!(
            self,
            StrategyType::CashSecuredPut
                | StrategyType::CoveredCall
                | StrategyType::BuyWrite
                | StrategyType::BullPutSpread
                | StrategyType::BearCallSpread
                | StrategyType::IronCondor
        )
    }

    /// Only single-expiration single-contract strategies can be served
    /// from the Phase-1 sample.
    pub fn needs_full_chain(self) -> bool {
        !matches!(
            self,
            StrategyType::LongCall
                | StrategyType::LongPut
                | StrategyType::CashSecuredPut
                | StrategyType::CoveredCall
        )
    }

    /// Option type of the defining leg for single-type structures.
    pub fn primary_option_type(self) -> Option<OptionType> {
        match self {
            StrategyType::LongCall
            | StrategyType::CoveredCall
            | StrategyType::BuyWrite
            | StrategyType::BullCallSpread
            | StrategyType::BearCallSpread
            | StrategyType::CalendarSpread
            | StrategyType::DiagonalSpread => Some(OptionType::Call),
            StrategyType::LongPut
            | StrategyType::CashSecuredPut
            | StrategyType::BearPutSpread
            | StrategyType::BullPutSpread => Some(OptionType::Put),
            StrategyType::LongStraddle | StrategyType::LongStrangle | StrategyType::IronCondor => {
                None
            }
        }
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn normalize_token(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

impl FromStr for StrategyType {
    type Err = Error;

    /// Accepts both the display label ("Long Straddle", "Cash-Secured Put")
    /// and the snake_case wire form ("long_straddle").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize_token(s);
        let alias = match wanted.as_str() {
            "csp" => Some(StrategyType::CashSecuredPut),
            "callleap" | "leapcall" => Some(StrategyType::LongCall),
            "putleap" | "leapput" => Some(StrategyType::LongPut),
            "straddle" => Some(StrategyType::LongStraddle),
            "strangle" => Some(StrategyType::LongStrangle),
            _ => None,
        };
        if let Some(st) = alias {
            return Ok(st);
        }
        StrategyType::ALL
            .iter()
            .copied()
            .find(|st| normalize_token(st.label()) == wanted)
            .ok_or_else(|| Error::ContractViolation(format!("unknown strategy_type '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
    Bidirectional,
}

impl FromStr for Bias {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "bullish" | "bull" | "long" => Ok(Bias::Bullish),
            "bearish" | "bear" | "short" => Ok(Bias::Bearish),
            "neutral" => Ok(Bias::Neutral),
            "bidirectional" | "both" => Ok(Bias::Bidirectional),
            _ => Err(Error::ContractViolation(format!("unknown bias '{}'", s))),
        }
    }
}

// ── Upstream market context ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Sideways,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolRegime {
    Compressed,
    Normal,
    Expanded,
}

/// Indicator readings computed upstream. All optional; evaluators note
/// what is missing instead of assuming a value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    /// Annualized realized volatility, same units as contract implied vol.
    #[serde(default)]
    pub realized_vol: Option<f64>,
    #[serde(default)]
    pub iv_rank: Option<f64>,
    #[serde(default)]
    pub trend: Option<Trend>,
    #[serde(default)]
    pub volume_confirmed: Option<bool>,
    #[serde(default)]
    pub catalyst_confirmed: Option<bool>,
    #[serde(default)]
    pub vol_regime: Option<VolRegime>,
}

// ── Candidates ────────────────────────────────────────────────────────

/// A strategy idea for one ticker, as emitted by the upstream generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub ticker: String,
    pub strategy_type: StrategyType,
    pub bias: Bias,
    pub dte_min: i64,
    pub dte_max: i64,
    #[serde(default)]
    pub underlying_price: Option<f64>,
    #[serde(default)]
    pub dollar_allocation: Option<f64>,
    #[serde(default)]
    pub context: MarketContext,
}

impl Candidate {
    /// Midpoint of the requested DTE window.
    pub fn target_dte(&self) -> i64 {
        (self.dte_min + self.dte_max) / 2
    }
}

/// Candidate as it arrives on the wire, before contract checks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCandidate {
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub strategy_type: Option<String>,
    #[serde(default)]
    pub bias: Option<String>,
    #[serde(default)]
    pub dte_min: Option<i64>,
    #[serde(default)]
    pub dte_max: Option<i64>,
    #[serde(default)]
    pub underlying_price: Option<f64>,
    #[serde(default)]
    pub dollar_allocation: Option<f64>,
    #[serde(default)]
    pub context: MarketContext,
}

impl RawCandidate {
    /// Enforce the producer/consumer contract for one row.
    pub fn into_candidate(self, row: usize) -> Result<Candidate, Error> {
        let missing =
            |field: &str| Error::ContractViolation(format!("row {}: missing required field '{}'", row, field));

        let ticker = self.ticker.ok_or_else(|| missing("ticker"))?;
        let ticker = ticker.trim().to_ascii_uppercase();
        if ticker.is_empty() {
            return Err(Error::ContractViolation(format!("row {}: empty ticker", row)));
        }

        let strategy_type: StrategyType = self
            .strategy_type
            .ok_or_else(|| missing("strategy_type"))?
            .parse()
            .map_err(|e| Error::ContractViolation(format!("row {} ({}): {}", row, ticker, e)))?;
        let bias: Bias = self
            .bias
            .ok_or_else(|| missing("bias"))?
            .parse()
            .map_err(|e| Error::ContractViolation(format!("row {} ({}): {}", row, ticker, e)))?;
        let dte_min = self.dte_min.ok_or_else(|| missing("dte_min"))?;
        let dte_max = self.dte_max.ok_or_else(|| missing("dte_max"))?;

        if dte_min < 0 || dte_max < 0 {
            return Err(Error::ContractViolation(format!(
                "row {} ({}): negative DTE window [{}, {}]",
                row, ticker, dte_min, dte_max
            )));
        }
        if dte_min > dte_max {
            return Err(Error::ContractViolation(format!(
                "row {} ({}): dte_min {} > dte_max {}",
                row, ticker, dte_min, dte_max
            )));
        }
        if let Some(price) = self.underlying_price {
            if !(price.is_finite() && price > 0.0) {
                return Err(Error::ContractViolation(format!(
                    "row {} ({}): underlying_price must be > 0",
                    row, ticker
                )));
            }
        }

        Ok(Candidate {
            ticker,
            strategy_type,
            bias,
            dte_min,
            dte_max,
            underlying_price: self.underlying_price,
            dollar_allocation: self.dollar_allocation,
            context: self.context,
        })
    }
}

/// Validate a whole upstream batch. Any violation fails the batch.
pub fn ingest(raw: Vec<RawCandidate>) -> Result<Vec<Candidate>, Error> {
    raw.into_iter()
        .enumerate()
        .map(|(row, r)| r.into_candidate(row))
        .collect()
}

// ── Option chains ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionType {
    Call,
    Put,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub vega: f64,
    pub theta: f64,
}

/// A single quoted option contract. Never mutated after fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub strike: f64,
    pub option_type: OptionType,
    pub expiration: NaiveDate,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default)]
    pub open_interest: u64,
    #[serde(default)]
    pub volume: u64,
    #[serde(default)]
    pub delta: Option<f64>,
    #[serde(default)]
    pub gamma: Option<f64>,
    #[serde(default)]
    pub vega: Option<f64>,
    #[serde(default)]
    pub theta: Option<f64>,
    /// Annualized implied volatility as a decimal (0.30 = 30%).
    #[serde(default)]
    pub implied_vol: Option<f64>,
}

impl Contract {
    /// Both sides present with a positive ask.
    pub fn is_quoted(&self) -> bool {
        matches!((self.bid, self.ask), (Some(b), Some(a)) if a > 0.0 && b >= 0.0 && a >= b)
    }

    pub fn mid(&self) -> Option<f64> {
        if !self.is_quoted() {
            return None;
        }
        Some((self.bid? + self.ask?) / 2.0)
    }

    pub fn spread(&self) -> Option<f64> {
        if !self.is_quoted() {
            return None;
        }
        Some(self.ask? - self.bid?)
    }

    /// (ask - bid) / mid.
    pub fn spread_pct(&self) -> Option<f64> {
        let mid = self.mid()?;
        if mid <= 0.0 {
            return None;
        }
        Some(self.spread()? / mid)
    }

    /// All four Greeks as quoted by the provider.
    pub fn quoted_greeks(&self) -> Option<Greeks> {
        Some(Greeks {
            delta: self.delta?,
            gamma: self.gamma?,
            vega: self.vega?,
            theta: self.theta?,
        })
    }
}

/// Every contract for one expiration date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpirationSlice {
    pub expiration: NaiveDate,
    #[serde(default)]
    pub contracts: Vec<Contract>,
}

impl ExpirationSlice {
    pub fn of_type(&self, option_type: OptionType) -> impl Iterator<Item = &Contract> {
        self.contracts
            .iter()
            .filter(move |c| c.option_type == option_type)
    }

    pub fn find(&self, option_type: OptionType, strike: f64) -> Option<&Contract> {
        self.of_type(option_type)
            .find(|c| (c.strike - strike).abs() < 1e-6)
    }

    pub fn dte(&self, today: NaiveDate) -> i64 {
        days_between(today, self.expiration)
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

/// A ticker's chain as fetched at one instant. Shared read-only once
/// published to the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub ticker: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub underlying_price: Option<f64>,
    #[serde(default)]
    pub expirations: Vec<ExpirationSlice>,
}

impl ChainSnapshot {
    pub fn contract_count(&self) -> usize {
        self.expirations.iter().map(|e| e.contracts.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.contract_count() == 0
    }

    pub fn expiration_dates(&self) -> Vec<NaiveDate> {
        self.expirations.iter().map(|e| e.expiration).collect()
    }

    pub fn slice(&self, expiration: NaiveDate) -> Option<&ExpirationSlice> {
        self.expirations.iter().find(|e| e.expiration == expiration)
    }

    /// Non-empty, unexpired slice whose DTE is closest to `target_dte`.
    pub fn nearest_slice(&self, target_dte: i64, today: NaiveDate) -> Option<&ExpirationSlice> {
        self.expirations
            .iter()
            .filter(|e| !e.is_empty() && e.dte(today) >= 0)
            .min_by_key(|e| (e.dte(today) - target_dte).abs())
    }
}

pub fn days_between(today: NaiveDate, expiration: NaiveDate) -> i64 {
    (expiration - today).num_days()
}

/// Unexpired expiration closest to `target_dte`. Ties go to the earlier date.
pub fn nearest_expiration(
    expirations: &[NaiveDate],
    target_dte: i64,
    today: NaiveDate,
) -> Option<NaiveDate> {
    let mut sorted: Vec<NaiveDate> = expirations
        .iter()
        .copied()
        .filter(|d| days_between(today, *d) >= 0)
        .collect();
    sorted.sort();
    sorted
        .into_iter()
        .min_by_key(|d| (days_between(today, *d) - target_dte).abs())
}

// ── Strike selection ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GreekSource {
    Quoted,
    Approximated,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LegInstrument {
    Option(Contract),
    Underlying { price: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Leg {
    pub side: LegSide,
    /// Contracts for option legs, shares for the underlying.
    pub quantity: u32,
    pub instrument: LegInstrument,
    pub greeks: Option<Greeks>,
    pub greek_source: GreekSource,
}

impl Leg {
    pub fn contract(&self) -> Option<&Contract> {
        match &self.instrument {
            LegInstrument::Option(c) => Some(c),
            LegInstrument::Underlying { .. } => None,
        }
    }

    pub fn is_short(&self) -> bool {
        self.side == LegSide::Sell
    }

    pub fn delta(&self) -> Option<f64> {
        self.greeks.map(|g| g.delta)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskModel {
    DebitMax,
    CreditMax,
    StockDependent,
    Undefined,
}

/// The economically defining leg of a structure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotedStrike {
    pub leg_index: usize,
    pub contract: Contract,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionResult {
    pub legs: Vec<Leg>,
    pub promoted: PromotedStrike,
    pub expiration: NaiveDate,
    pub dte: i64,
    /// Signed premium per share: positive is a net credit.
    pub net_premium: f64,
    pub capital_required: Option<f64>,
    pub risk_model: RiskModel,
    /// Maximum loss per structure; `None` for undefined-risk structures.
    pub risk_per_contract: Option<f64>,
    pub probability_of_profit: Option<f64>,
    pub structure_simplified: bool,
    pub notes: Vec<String>,
}

impl SelectionResult {
    pub fn option_legs(&self) -> impl Iterator<Item = (&Leg, &Contract)> {
        self.legs.iter().filter_map(|l| l.contract().map(|c| (l, c)))
    }

    pub fn promoted_leg(&self) -> Option<&Leg> {
        self.legs.get(self.promoted.leg_index)
    }
}

// ── Exploration ───────────────────────────────────────────────────────

/// Phase-1 viability signal. Ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingQuality {
    Poor,
    Marginal,
    Good,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationStatus {
    /// Selection ran off the Phase-1 single-expiration sample.
    Sampled,
    /// Selection ran off the full (cached or fetched) chain.
    Explored,
    NoExpirations,
    /// Poor sample and the operator opted out of the full fetch.
    Skipped,
    Error,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionOutcome {
    Selected,
    ChainEmpty,
    NoOptimalStrikes,
    UnsupportedStructure,
    NotAttempted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SampleChecks {
    pub atm_present: bool,
    pub quotes_present: bool,
    pub open_interest_present: bool,
    pub spread_within_loose_bound: bool,
}

impl SampleChecks {
    pub fn passed(&self) -> usize {
        [
            self.atm_present,
            self.quotes_present,
            self.open_interest_present,
            self.spread_within_loose_bound,
        ]
        .iter()
        .filter(|c| **c)
        .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleReport {
    pub target_dte: i64,
    pub expiration: Option<NaiveDate>,
    pub dte: Option<i64>,
    pub quality: SamplingQuality,
    pub checks: SampleChecks,
    pub status: ExplorationStatus,
    pub from_cache: bool,
    pub note: String,
    /// The sampled expiration, handed to Phase 2. Not part of the output.
    #[serde(skip)]
    pub slice: Option<Arc<ExpirationSlice>>,
    #[serde(skip)]
    pub underlying_price: Option<f64>,
}

// ── Liquidity ─────────────────────────────────────────────────────────

/// Ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityGrade {
    Illiquid,
    Thin,
    Acceptable,
    Good,
    Excellent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadAssessment {
    Tight,
    Acceptable,
    Wide,
    VeryWide,
    NoQuote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OiAssessment {
    Deep,
    Adequate,
    Light,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquidityAssessment {
    pub grade: LiquidityGrade,
    pub spread_assessment: SpreadAssessment,
    pub oi_assessment: OiAssessment,
    pub spread_pct: Option<f64>,
    pub max_spread_pct: f64,
    pub open_interest: u64,
    pub min_open_interest: u64,
    /// 0–100 sub-score consumed by the PCS liquidity component.
    pub score: f64,
    pub context: String,
}

impl LiquidityAssessment {
    /// Assessment used when nothing was selected.
    pub fn absent(context: impl Into<String>) -> Self {
        Self {
            grade: LiquidityGrade::Illiquid,
            spread_assessment: SpreadAssessment::NoQuote,
            oi_assessment: OiAssessment::Absent,
            spread_pct: None,
            max_spread_pct: 0.0,
            open_interest: 0,
            min_open_interest: 0,
            score: 0.0,
            context: context.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapitalClass {
    Light,
    Moderate,
    Heavy,
    VeryHeavy,
    Unknown,
}

impl CapitalClass {
    pub fn from_capital(capital: Option<f64>) -> Self {
        match capital {
            None => CapitalClass::Unknown,
            Some(c) if c < 1_000.0 => CapitalClass::Light,
            Some(c) if c < 5_000.0 => CapitalClass::Moderate,
            Some(c) if c < 20_000.0 => CapitalClass::Heavy,
            Some(_) => CapitalClass::VeryHeavy,
        }
    }
}

/// Always present on every record, even when exploration failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub liquidity_grade: LiquidityGrade,
    pub spread_assessment: SpreadAssessment,
    pub oi_assessment: OiAssessment,
    pub liquidity_context: String,
    pub liquidity_score: f64,
    pub capital_class: CapitalClass,
    pub within_allocation: Option<bool>,
    pub is_leap: bool,
    pub exploration_status: ExplorationStatus,
    pub selection_outcome: SelectionOutcome,
    pub tradable: bool,
    pub tradable_reason: String,
}

// ── Scoring ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PcsStatus {
    Valid,
    Watch,
    Rejected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PcsBreakdown {
    pub liquidity: f64,
    pub dte: f64,
    pub risk_clarity: f64,
    pub strategy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PcsResult {
    pub pcs_score: f64,
    pub status: PcsStatus,
    pub filter_reason: Option<String>,
    pub breakdown: PcsBreakdown,
}

// ── Validation ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Valid,
    Watch,
    Reject,
    IncompleteData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardGate {
    PutCallSkew,
    RealizedImpliedRatio,
    ProbabilityOfProfit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationVerdict {
    pub family: StrategyFamily,
    pub status: VerdictStatus,
    pub compliance_score: f64,
    pub notes: Vec<String>,
    pub hard_gate_triggered: Option<HardGate>,
}

// ── Stage records ─────────────────────────────────────────────────────

/// Candidate plus its Phase-1 report.
#[derive(Debug, Clone, Serialize)]
pub struct SampledCandidate {
    #[serde(flatten)]
    pub candidate: Candidate,
    pub sample: SampleReport,
}

/// Sampled candidate plus selection and annotation.
#[derive(Debug, Clone, Serialize)]
pub struct ExploredCandidate {
    #[serde(flatten)]
    pub sampled: SampledCandidate,
    pub selection: Option<SelectionResult>,
    /// Nearest misses kept when no strike satisfied the selection rules.
    pub candidate_contracts: Vec<Contract>,
    pub annotation: Annotation,
}

/// Explored candidate plus its PCS score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    #[serde(flatten)]
    pub explored: ExploredCandidate,
    pub pcs: PcsResult,
}

/// Final output row: one per input candidate, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateRecord {
    #[serde(flatten)]
    pub scored: ScoredCandidate,
    pub verdict: ValidationVerdict,
}

impl SampledCandidate {
    pub fn new(candidate: Candidate, sample: SampleReport) -> Self {
        Self { candidate, sample }
    }
}

impl ExploredCandidate {
    pub fn candidate(&self) -> &Candidate {
        &self.sampled.candidate
    }
}

impl ScoredCandidate {
    pub fn candidate(&self) -> &Candidate {
        self.explored.candidate()
    }

    pub fn selection(&self) -> Option<&SelectionResult> {
        self.explored.selection.as_ref()
    }

    pub fn annotation(&self) -> &Annotation {
        &self.explored.annotation
    }

    pub fn into_record(self, verdict: ValidationVerdict) -> CandidateRecord {
        CandidateRecord {
            scored: self,
            verdict,
        }
    }
}

impl CandidateRecord {
    pub fn candidate(&self) -> &Candidate {
        self.scored.candidate()
    }

    pub fn annotation(&self) -> &Annotation {
        self.scored.annotation()
    }

    pub fn selection(&self) -> Option<&SelectionResult> {
        self.scored.selection()
    }
}
