//! Record builders for evaluator tests.

use chrono::NaiveDate;
use common::{
    Annotation, Bias, Candidate, CapitalClass, Contract, ExplorationStatus, ExploredCandidate,
    GreekSource, Greeks, Leg, LegInstrument, LegSide, LiquidityGrade, MarketContext, OiAssessment,
    OptionType, PcsBreakdown, PcsResult, PcsStatus, PromotedStrike, RiskModel, SampleChecks,
    SampleReport, SampledCandidate, SamplingQuality, ScoredCandidate, SelectionOutcome,
    SelectionResult, SpreadAssessment, StrategyFamily, StrategyType,
};

pub fn expiration() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, 12).unwrap()
}

/// Option leg with quoted Greeks typical of a 38-day near-ATM contract.
pub fn make_leg(side: LegSide, option_type: OptionType, strike: f64, iv: Option<f64>) -> Leg {
    let greeks = Greeks {
        delta: match option_type {
            OptionType::Call => 0.52,
            OptionType::Put => -0.48,
        },
        gamma: 0.04,
        vega: 0.12,
        theta: -0.05,
    };
    let contract = Contract {
        strike,
        option_type,
        expiration: expiration(),
        bid: Some(2.00),
        ask: Some(2.10),
        open_interest: 500,
        volume: 50,
        delta: Some(greeks.delta),
        gamma: Some(greeks.gamma),
        vega: Some(greeks.vega),
        theta: Some(greeks.theta),
        implied_vol: iv,
    };
    Leg {
        side,
        quantity: 1,
        instrument: LegInstrument::Option(contract),
        greeks: Some(greeks),
        greek_source: GreekSource::Quoted,
    }
}

fn make_candidate(strategy: StrategyType, context: MarketContext) -> Candidate {
    let bias = match strategy.family() {
        StrategyFamily::Volatility => Bias::Bidirectional,
        _ if strategy == StrategyType::IronCondor => Bias::Neutral,
        _ if strategy == StrategyType::LongPut || strategy == StrategyType::BearCallSpread => {
            Bias::Bearish
        }
        _ => Bias::Bullish,
    };
    Candidate {
        ticker: "TEST".into(),
        strategy_type: strategy,
        bias,
        dte_min: 30,
        dte_max: 45,
        underlying_price: Some(100.0),
        dollar_allocation: None,
        context,
    }
}

fn make_sample() -> SampleReport {
    SampleReport {
        target_dte: 37,
        expiration: Some(expiration()),
        dte: Some(38),
        quality: SamplingQuality::Good,
        checks: SampleChecks::default(),
        status: ExplorationStatus::Sampled,
        from_cache: false,
        note: String::new(),
        slice: None,
        underlying_price: Some(100.0),
    }
}

fn make_annotation(selected: bool) -> Annotation {
    Annotation {
        liquidity_grade: if selected {
            LiquidityGrade::Good
        } else {
            LiquidityGrade::Illiquid
        },
        spread_assessment: SpreadAssessment::Tight,
        oi_assessment: OiAssessment::Adequate,
        liquidity_context: String::new(),
        liquidity_score: if selected { 85.0 } else { 0.0 },
        capital_class: CapitalClass::Unknown,
        within_allocation: None,
        is_leap: false,
        exploration_status: ExplorationStatus::Explored,
        selection_outcome: if selected {
            SelectionOutcome::Selected
        } else {
            SelectionOutcome::ChainEmpty
        },
        tradable: selected,
        tradable_reason: if selected {
            "good liquidity".into()
        } else {
            "chain has no unexpired contracts".into()
        },
    }
}

fn make_pcs() -> PcsResult {
    PcsResult {
        pcs_score: 80.0,
        status: PcsStatus::Valid,
        filter_reason: None,
        breakdown: PcsBreakdown::default(),
    }
}

/// Scored record for `strategy` with `legs` selected. The first short
/// option leg is promoted, else the first leg.
pub fn make_scored(
    strategy: StrategyType,
    legs: Vec<Leg>,
    probability_of_profit: Option<f64>,
    context: MarketContext,
) -> ScoredCandidate {
    let promoted = legs.iter().position(|l| l.is_short()).unwrap_or(0);
    let contract = legs[promoted].contract().cloned().unwrap();
    let selection = SelectionResult {
        legs,
        promoted: PromotedStrike {
            leg_index: promoted,
            contract,
            reason: "test".into(),
        },
        expiration: expiration(),
        dte: 38,
        net_premium: 0.0,
        capital_required: None,
        risk_model: RiskModel::DebitMax,
        risk_per_contract: None,
        probability_of_profit,
        structure_simplified: false,
        notes: Vec::new(),
    };
    ScoredCandidate {
        explored: ExploredCandidate {
            sampled: SampledCandidate::new(make_candidate(strategy, context), make_sample()),
            selection: Some(selection),
            candidate_contracts: Vec::new(),
            annotation: make_annotation(true),
        },
        pcs: make_pcs(),
    }
}

pub fn make_unselected(strategy: StrategyType) -> ScoredCandidate {
    ScoredCandidate {
        explored: ExploredCandidate {
            sampled: SampledCandidate::new(
                make_candidate(strategy, MarketContext::default()),
                make_sample(),
            ),
            selection: None,
            candidate_contracts: Vec::new(),
            annotation: make_annotation(false),
        },
        pcs: make_pcs(),
    }
}
