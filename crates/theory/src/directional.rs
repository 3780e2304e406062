//! Directional family: long calls/puts and debit verticals.
//!
//! No hard gates. The position has to move with the underlying, so weak
//! delta and (outside LEAPs) weak gamma cost points, and trend and volume
//! confirmation from upstream add or remove conviction.

use common::config::TheoryConfig;
use common::{Bias, StrategyFamily, Trend, ValidationVerdict};

use crate::{incomplete, EvalInput, Scorecard};

/// LEAP legs at or past this |delta| behave like stock replacement.
const DEEP_ITM_DELTA: f64 = 0.60;

pub fn evaluate(input: &EvalInput<'_>, cfg: &TheoryConfig) -> ValidationVerdict {
    let family = StrategyFamily::Directional;
    let Some(greeks) = input.selection.promoted_leg().and_then(|l| l.greeks) else {
        return incomplete(family, "Greeks missing on the promoted leg".into());
    };

    let mut card = Scorecard::new(cfg);
    let delta = greeks.delta.abs();

    if delta < cfg.weak_delta {
        card.adjust(
            -20.0,
            format!("weak delta {:.2} < {:.2}", delta, cfg.weak_delta),
        );
    }

    if input.is_leap {
        card.note("gamma not assessed for LEAP");
        if delta >= DEEP_ITM_DELTA {
            card.adjust(5.0, format!("deep ITM LEAP (delta {:.2})", delta));
        }
    } else if greeks.gamma < cfg.weak_gamma {
        card.adjust(
            -10.0,
            format!("weak gamma {:.3} < {:.3}", greeks.gamma, cfg.weak_gamma),
        );
    }

    let bias = input.candidate.bias;
    match (input.candidate.context.trend, bias) {
        (None, _) => card.note("trend unavailable"),
        (Some(Trend::Sideways), _) => card.adjust(-5.0, "sideways trend"),
        (Some(Trend::Up), Bias::Bullish) | (Some(Trend::Down), Bias::Bearish) => {
            card.adjust(10.0, "trend aligned with bias")
        }
        (Some(Trend::Up), Bias::Bearish) | (Some(Trend::Down), Bias::Bullish) => {
            card.adjust(-15.0, "trend against bias")
        }
        (Some(t), b) => card.note(format!("{:?} trend with {:?} bias", t, b)),
    }

    if input.candidate.context.volume_confirmed == Some(true) {
        card.adjust(5.0, "volume confirms move");
    }

    card.finish(family, cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_leg, make_scored};
    use crate::TheoryValidator;
    use common::{LegSide, MarketContext, OptionType, StrategyType, VerdictStatus};

    fn make_context(trend: Option<Trend>, volume: Option<bool>) -> MarketContext {
        MarketContext {
            trend,
            volume_confirmed: volume,
            ..Default::default()
        }
    }

    #[test]
    fn test_aligned_call_is_valid() {
        let cfg = TheoryConfig::default();
        let scored = make_scored(
            StrategyType::LongCall,
            vec![make_leg(LegSide::Buy, OptionType::Call, 100.0, Some(0.30))],
            Some(0.42),
            make_context(Some(Trend::Up), Some(true)),
        );
        let v = TheoryValidator::new(&cfg).validate(&scored);
        assert_eq!(v.status, VerdictStatus::Valid);
        assert_eq!(v.compliance_score, 85.0);
        assert!(v.hard_gate_triggered.is_none());
    }

    #[test]
    fn test_weak_delta_against_trend_rejects() {
        let cfg = TheoryConfig::default();
        let mut leg = make_leg(LegSide::Buy, OptionType::Call, 105.0, Some(0.30));
        if let Some(g) = leg.greeks.as_mut() {
            g.delta = 0.30;
        }
        let scored = make_scored(
            StrategyType::LongCall,
            vec![leg],
            Some(0.30),
            make_context(Some(Trend::Down), None),
        );
        let v = TheoryValidator::new(&cfg).validate(&scored);
        assert_eq!(v.compliance_score, 35.0);
        assert_eq!(v.status, VerdictStatus::Reject);
        assert!(v.notes.iter().any(|n| n.contains("weak delta")));
    }

    #[test]
    fn test_leap_skips_gamma_penalty() {
        let cfg = TheoryConfig::default();
        let mut leg = make_leg(LegSide::Buy, OptionType::Call, 80.0, Some(0.28));
        if let Some(g) = leg.greeks.as_mut() {
            g.delta = 0.72;
            g.gamma = 0.008;
        }
        let mut scored = make_scored(StrategyType::LongCall, vec![leg], Some(0.5), MarketContext::default());
        let short_dated = TheoryValidator::new(&cfg).validate(&scored);

        scored.explored.annotation.is_leap = true;
        let leap = TheoryValidator::new(&cfg).validate(&scored);

        assert_eq!(short_dated.compliance_score, 60.0);
        assert_eq!(leap.compliance_score, 75.0);
        assert!(leap.notes.iter().any(|n| n.contains("LEAP")));
    }

    #[test]
    fn test_missing_greeks_is_incomplete() {
        let cfg = TheoryConfig::default();
        let mut leg = make_leg(LegSide::Buy, OptionType::Put, 95.0, None);
        leg.greeks = None;
        let scored = make_scored(StrategyType::LongPut, vec![leg], None, MarketContext::default());
        let v = TheoryValidator::new(&cfg).validate(&scored);
        assert_eq!(v.status, VerdictStatus::IncompleteData);
    }
}
