//! Income family: cash-secured puts, covered calls, buy-writes, credit
//! verticals and iron condors.
//!
//! Probability of profit below the floor rejects outright. Past the gate
//! the rules reward selling rich premium (IV over RV) into a position
//! that earns theta and is short vega.

use common::config::TheoryConfig;
use common::{Bias, HardGate, LegSide, StrategyFamily, Trend, ValidationVerdict};

use crate::{incomplete, reject, EvalInput, Scorecard};

const HIGH_POP: f64 = 0.80;

pub fn evaluate(input: &EvalInput<'_>, cfg: &TheoryConfig) -> ValidationVerdict {
    let family = StrategyFamily::Income;
    let selection = input.selection;
    let ctx = &input.candidate.context;

    let Some(pop) = selection.probability_of_profit else {
        return incomplete(family, "probability of profit unavailable".into());
    };
    if pop < cfg.min_probability_of_profit {
        return reject(
            family,
            HardGate::ProbabilityOfProfit,
            format!(
                "POP {:.1}% below {:.0}% floor",
                pop * 100.0,
                cfg.min_probability_of_profit * 100.0
            ),
        );
    }

    let mut card = Scorecard::new(cfg);
    card.note(format!("POP {:.1}%", pop * 100.0));
    if pop >= HIGH_POP {
        card.adjust(5.0, format!("POP {:.0}%+", HIGH_POP * 100.0));
    }

    // IV of the premium actually sold.
    let short_ivs: Vec<f64> = selection
        .option_legs()
        .filter(|(l, _)| l.is_short())
        .filter_map(|(_, c)| c.implied_vol)
        .collect();
    let iv = if short_ivs.is_empty() {
        None
    } else {
        Some(short_ivs.iter().sum::<f64>() / short_ivs.len() as f64)
    };
    match (iv, ctx.realized_vol) {
        (Some(iv), Some(rv)) if iv > rv => card.adjust(
            10.0,
            format!("IV {:.0}% over RV {:.0}%", iv * 100.0, rv * 100.0),
        ),
        (Some(iv), Some(rv)) => card.adjust(
            -15.0,
            format!("IV {:.0}% not above RV {:.0}%", iv * 100.0, rv * 100.0),
        ),
        (Some(_), None) => card.adjust(-5.0, "realized vol unavailable"),
        (None, _) => card.note("implied vol unavailable on short legs"),
    }

    let mut net_theta = 0.0;
    let mut net_vega = 0.0;
    let mut complete = true;
    for (leg, _) in selection.option_legs() {
        let Some(g) = leg.greeks else {
            complete = false;
            break;
        };
        let sign = match leg.side {
            LegSide::Buy => 1.0,
            LegSide::Sell => -1.0,
        };
        net_theta += sign * g.theta * leg.quantity as f64;
        net_vega += sign * g.vega * leg.quantity as f64;
    }
    if !complete {
        card.note("Greeks incomplete; theta/vega not assessed");
    } else if net_theta > 0.0 && net_vega < 0.0 {
        card.adjust(
            10.0,
            format!("theta {:+.3}/day with vega {:+.3}", net_theta, net_vega),
        );
    } else if net_theta <= 0.0 {
        card.adjust(-10.0, format!("net theta {:+.3}/day not positive", net_theta));
    }

    let against = matches!(
        (ctx.trend, input.candidate.bias),
        (Some(Trend::Down), Bias::Bullish)
            | (Some(Trend::Up), Bias::Bearish)
            | (Some(Trend::Up | Trend::Down), Bias::Neutral)
    );
    if against {
        card.adjust(-10.0, "trend against the structure");
    }

    card.finish(family, cfg)
}
