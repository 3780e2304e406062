//! Position confidence score (PCS).
//!
//! Weighted 0–100 blend of four components:
//! liquidity 30%, DTE adequacy 20%, risk-model clarity 20% and a
//! strategy-specific structure check 30%. Strict mode only changes the
//! liquidity thresholds the checks run against.

use common::config::EngineConfig;
use common::{
    ExploredCandidate, LiquidityGrade, PcsBreakdown, PcsResult, PcsStatus, RiskModel,
    ScoredCandidate, SelectionResult, StrategyFamily, StructureShape,
};
use tracing::debug;

use crate::liquidity::LiquidityGrader;

/// Credit below this share of the spread width is thin.
const MIN_CREDIT_TO_WIDTH: f64 = 0.20;
/// Debit above this share of the spread width leaves little upside.
const MAX_DEBIT_TO_WIDTH: f64 = 0.75;
const MIN_CONDOR_CREDIT_TO_WIDTH: f64 = 0.10;

pub struct PcsScorer<'a> {
    cfg: &'a EngineConfig,
}

impl<'a> PcsScorer<'a> {
    pub fn new(cfg: &'a EngineConfig) -> Self {
        Self { cfg }
    }

    pub fn score(&self, explored: ExploredCandidate) -> ScoredCandidate {
        let pcs = self.evaluate(&explored);
        debug!(
            "{} {}: PCS {:.1} {:?}",
            explored.candidate().ticker,
            explored.candidate().strategy_type,
            pcs.pcs_score,
            pcs.status
        );
        ScoredCandidate { explored, pcs }
    }

    pub fn evaluate(&self, explored: &ExploredCandidate) -> PcsResult {
        let scoring = &self.cfg.scoring;
        let annotation = &explored.annotation;

        let Some(selection) = explored.selection.as_ref() else {
            let breakdown = PcsBreakdown {
                liquidity: annotation.liquidity_score,
                ..Default::default()
            };
            return PcsResult {
                pcs_score: self.weighted(&breakdown),
                status: PcsStatus::Rejected,
                filter_reason: Some(format!("no selection: {}", annotation.tradable_reason)),
                breakdown,
            };
        };

        let cap = scoring.dte_cap.max(1);
        let (strategy, mut issues) = self.strategy_component(explored, selection);
        let breakdown = PcsBreakdown {
            liquidity: annotation.liquidity_score,
            dte: selection.dte.clamp(0, cap) as f64 / cap as f64 * 100.0,
            risk_clarity: match selection.risk_model {
                RiskModel::DebitMax | RiskModel::CreditMax => 100.0,
                RiskModel::StockDependent => 50.0,
                RiskModel::Undefined => 0.0,
            },
            strategy,
        };
        let pcs_score = self.weighted(&breakdown);

        let mut critical = Vec::new();
        if selection.dte < scoring.min_dte_floor {
            critical.push(format!(
                "DTE {} below {}-day floor",
                selection.dte, scoring.min_dte_floor
            ));
        }
        if strategy < scoring.min_strategy_score {
            critical.push(format!(
                "strategy checks {:.0} below {:.0}",
                strategy, scoring.min_strategy_score
            ));
        }

        if annotation.liquidity_score < scoring.min_liquidity_score {
            issues.push(format!(
                "liquidity score {:.0} below {:.0}",
                annotation.liquidity_score, scoring.min_liquidity_score
            ));
        }
        if annotation.liquidity_grade <= LiquidityGrade::Thin {
            issues.push(format!("{:?} liquidity", annotation.liquidity_grade));
        }
        if annotation.within_allocation == Some(false) {
            issues.push("exceeds dollar allocation".to_string());
        }

        let (status, reasons) = if selection.structure_simplified {
            let mut reasons = vec!["multi-expiration structure simplified".to_string()];
            reasons.extend(critical);
            reasons.extend(issues);
            (PcsStatus::Watch, reasons)
        } else if !critical.is_empty() {
            critical.extend(issues);
            (PcsStatus::Rejected, critical)
        } else if !issues.is_empty() {
            (PcsStatus::Watch, issues)
        } else {
            (PcsStatus::Valid, Vec::new())
        };

        PcsResult {
            pcs_score,
            status,
            filter_reason: if reasons.is_empty() {
                None
            } else {
                Some(reasons.join("; "))
            },
            breakdown,
        }
    }

    fn weighted(&self, b: &PcsBreakdown) -> f64 {
        let s = &self.cfg.scoring;
        (b.liquidity * s.liquidity_weight
            + b.dte * s.dte_weight
            + b.risk_clarity * s.risk_weight
            + b.strategy * s.strategy_weight)
            .clamp(0.0, 100.0)
    }

    /// Per-strategy structure checks. Returns the sub-score and the
    /// non-critical issues found.
    fn strategy_component(
        &self,
        explored: &ExploredCandidate,
        selection: &SelectionResult,
    ) -> (f64, Vec<String>) {
        let candidate = explored.candidate();
        let st = candidate.strategy_type;
        let sel_cfg = &self.cfg.selection;
        let grader = LiquidityGrader::new(&self.cfg.liquidity, &self.cfg.scoring);
        let underlying = candidate
            .underlying_price
            .or(explored.sampled.sample.underlying_price)
            .or(Some(selection.promoted.contract.strike));
        let th = grader.thresholds(underlying, selection.dte, st.shape());

        let mut score: f64 = 100.0;
        let mut issues = Vec::new();

        for (leg, contract) in selection.option_legs() {
            if contract.open_interest < th.min_open_interest {
                score -= 25.0;
                issues.push(format!(
                    "{} {:?} OI {} below {}",
                    contract.strike, contract.option_type, contract.open_interest, th.min_open_interest
                ));
            }
            if leg.greeks.is_none() {
                score -= 20.0;
                issues.push(format!("{} {:?} Greeks missing", contract.strike, contract.option_type));
            }
        }

        if let Some(delta) = selection.promoted_leg().and_then(|l| l.delta()) {
            let d = delta.abs();
            if d < sel_cfg.min_delta || d > sel_cfg.max_delta {
                score -= 30.0;
                issues.push(format!(
                    "promoted delta {:.2} outside {:.2}-{:.2}",
                    d, sel_cfg.min_delta, sel_cfg.max_delta
                ));
            }
        }

        let strikes: Vec<f64> = selection.option_legs().map(|(_, c)| c.strike).collect();
        let premium = selection.net_premium.abs();
        match st.shape() {
            StructureShape::Vertical if strikes.len() == 2 => {
                let width = (strikes[0] - strikes[1]).abs();
                if width > 0.0 {
                    let ratio = premium / width;
                    if st.is_credit() && ratio < MIN_CREDIT_TO_WIDTH {
                        score -= 25.0;
                        issues.push(format!("credit {:.0}% of width", ratio * 100.0));
                    } else if !st.is_credit() && ratio > MAX_DEBIT_TO_WIDTH {
                        score -= 25.0;
                        issues.push(format!("debit {:.0}% of width", ratio * 100.0));
                    }
                }
            }
            StructureShape::IronCondor if strikes.len() == 4 => {
                let width = (strikes[1] - strikes[0]).max(strikes[3] - strikes[2]);
                if width > 0.0 && premium / width < MIN_CONDOR_CREDIT_TO_WIDTH {
                    score -= 30.0;
                    issues.push(format!("condor credit {:.0}% of width", premium / width * 100.0));
                }
            }
            _ => {}
        }

        if st.family() == StrategyFamily::Income && selection.probability_of_profit.is_none() {
            score -= 10.0;
            issues.push("POP unavailable".to_string());
        }

        (score.clamp(0.0, 100.0), issues)
    }
}
