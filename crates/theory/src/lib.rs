//! Rule-based theory validation.
//!
//! Each strategy family has its own evaluator. Hard gates short-circuit to
//! `Reject` before any scoring; otherwise a compliance score starts at the
//! configured base and moves with each rule. Evaluation is a pure function
//! of the scored record, so validating the same record twice always gives
//! the same verdict.

pub mod directional;
pub mod income;
pub mod volatility;

#[cfg(test)]
mod testing;

use common::config::TheoryConfig;
use common::{
    Candidate, HardGate, ScoredCandidate, SelectionResult, StrategyFamily, ValidationVerdict,
    VerdictStatus,
};
use tracing::debug;

/// What every evaluator reads.
pub struct EvalInput<'a> {
    pub candidate: &'a Candidate,
    pub selection: &'a SelectionResult,
    pub is_leap: bool,
}

pub struct TheoryValidator<'a> {
    cfg: &'a TheoryConfig,
}

impl<'a> TheoryValidator<'a> {
    pub fn new(cfg: &'a TheoryConfig) -> Self {
        Self { cfg }
    }

    pub fn validate(&self, scored: &ScoredCandidate) -> ValidationVerdict {
        let candidate = scored.candidate();
        let family = candidate.strategy_type.family();

        let Some(selection) = scored.selection() else {
            return incomplete(
                family,
                format!(
                    "nothing selected to validate: {}",
                    scored.annotation().tradable_reason
                ),
            );
        };

        let input = EvalInput {
            candidate,
            selection,
            is_leap: scored.annotation().is_leap,
        };
        let verdict = match family {
            StrategyFamily::Directional => directional::evaluate(&input, self.cfg),
            StrategyFamily::Volatility => volatility::evaluate(&input, self.cfg),
            StrategyFamily::Income => income::evaluate(&input, self.cfg),
        };
        debug!(
            "{} {}: theory {:?} ({:.0})",
            candidate.ticker, candidate.strategy_type, verdict.status, verdict.compliance_score
        );
        verdict
    }
}

// ── Shared scoring ────────────────────────────────────────────────────

/// Running compliance score plus the notes explaining it.
pub(crate) struct Scorecard {
    score: f64,
    notes: Vec<String>,
}

impl Scorecard {
    pub(crate) fn new(cfg: &TheoryConfig) -> Self {
        Self {
            score: cfg.base_score,
            notes: Vec::new(),
        }
    }

    pub(crate) fn adjust(&mut self, points: f64, note: impl Into<String>) {
        self.score += points;
        self.notes.push(format!("{:+.0} {}", points, note.into()));
    }

    pub(crate) fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub(crate) fn finish(self, family: StrategyFamily, cfg: &TheoryConfig) -> ValidationVerdict {
        let score = self.score.clamp(0.0, 100.0);
        let status = if score >= cfg.valid_score {
            VerdictStatus::Valid
        } else if score >= cfg.watch_score {
            VerdictStatus::Watch
        } else {
            VerdictStatus::Reject
        };
        ValidationVerdict {
            family,
            status,
            compliance_score: score,
            notes: self.notes,
            hard_gate_triggered: None,
        }
    }
}

pub(crate) fn reject(family: StrategyFamily, gate: HardGate, note: String) -> ValidationVerdict {
    ValidationVerdict {
        family,
        status: VerdictStatus::Reject,
        compliance_score: 0.0,
        notes: vec![note],
        hard_gate_triggered: Some(gate),
    }
}

pub(crate) fn incomplete(family: StrategyFamily, note: String) -> ValidationVerdict {
    ValidationVerdict {
        family,
        status: VerdictStatus::IncompleteData,
        compliance_score: 0.0,
        notes: vec![note],
        hard_gate_triggered: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_leg, make_scored, make_unselected};
    use common::{LegSide, MarketContext, OptionType, StrategyType};

    #[test]
    fn test_validation_is_idempotent() {
        let cfg = TheoryConfig::default();
        let validator = TheoryValidator::new(&cfg);
        let scored = make_scored(
            StrategyType::LongStraddle,
            vec![
                make_leg(LegSide::Buy, OptionType::Call, 100.0, Some(0.30)),
                make_leg(LegSide::Buy, OptionType::Put, 100.0, Some(0.32)),
            ],
            None,
            MarketContext::default(),
        );
        let first = validator.validate(&scored);
        let second = validator.validate(&scored);
        assert_eq!(first.status, second.status);
        assert_eq!(first.compliance_score, second.compliance_score);
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_selection_is_incomplete() {
        let cfg = TheoryConfig::default();
        let verdict = TheoryValidator::new(&cfg).validate(&make_unselected(StrategyType::IronCondor));
        assert_eq!(verdict.status, VerdictStatus::IncompleteData);
        assert_eq!(verdict.family, StrategyFamily::Income);
        assert!(!verdict.notes.is_empty());
    }

    #[test]
    fn test_dispatch_follows_family() {
        let cfg = TheoryConfig::default();
        let validator = TheoryValidator::new(&cfg);
        let call = make_scored(
            StrategyType::LongCall,
            vec![make_leg(LegSide::Buy, OptionType::Call, 100.0, Some(0.30))],
            Some(0.42),
            MarketContext::default(),
        );
        assert_eq!(validator.validate(&call).family, StrategyFamily::Directional);
    }

    #[test]
    fn test_scorecard_thresholds() {
        let cfg = TheoryConfig::default();
        let mut card = Scorecard::new(&cfg);
        card.adjust(-15.0, "misaligned");
        let v = card.finish(StrategyFamily::Directional, &cfg);
        assert_eq!(v.status, VerdictStatus::Watch);
        assert_eq!(v.compliance_score, 55.0);
        assert_eq!(v.notes, vec!["-15 misaligned".to_string()]);
    }
}
