//! Volatility family: straddles, strangles, calendars and diagonals.
//!
//! Two hard gates run before any scoring:
//! - put/call implied-vol skew above the ceiling means the put side is
//!   already bid up and the structure overpays for downside;
//! - realized/implied vol above its ceiling leaves no statistical edge in
//!   buying volatility.

use common::config::TheoryConfig;
use common::{HardGate, OptionType, StrategyFamily, StructureShape, ValidationVerdict, VolRegime};

use crate::{incomplete, reject, EvalInput, Scorecard};

pub fn evaluate(input: &EvalInput<'_>, cfg: &TheoryConfig) -> ValidationVerdict {
    let family = StrategyFamily::Volatility;
    let selection = input.selection;
    let ctx = &input.candidate.context;

    let iv_of = |option_type: OptionType| {
        selection
            .option_legs()
            .map(|(_, c)| c)
            .find(|c| c.option_type == option_type)
            .and_then(|c| c.implied_vol)
    };
    let call_iv = iv_of(OptionType::Call);
    let put_iv = iv_of(OptionType::Put);

    let mut card = Scorecard::new(cfg);
    let multi_expiry = input.candidate.strategy_type.shape() == StructureShape::MultiExpiry;

    let iv = if multi_expiry {
        card.note("skew gate not applicable: single-type multi-expiration structure");
        let ivs: Vec<f64> = selection
            .option_legs()
            .filter_map(|(_, c)| c.implied_vol)
            .collect();
        if ivs.is_empty() {
            return incomplete(family, "implied vol missing on every leg".into());
        }
        ivs.iter().sum::<f64>() / ivs.len() as f64
    } else {
        let (Some(call_iv), Some(put_iv)) = (call_iv, put_iv) else {
            return incomplete(family, "implied vol missing on the call or put leg".into());
        };
        if call_iv <= 0.0 {
            return incomplete(family, "call implied vol is zero".into());
        }
        let skew = put_iv / call_iv;
        if skew > cfg.max_put_call_skew {
            return reject(
                family,
                HardGate::PutCallSkew,
                format!(
                    "put/call skew {:.2} exceeds {:.2} ceiling (put IV {:.0}%, call IV {:.0}%)",
                    skew,
                    cfg.max_put_call_skew,
                    put_iv * 100.0,
                    call_iv * 100.0
                ),
            );
        }
        card.note(format!("put/call skew {:.2}", skew));
        (call_iv + put_iv) / 2.0
    };

    match ctx.realized_vol {
        Some(rv) if iv > 0.0 => {
            let ratio = rv / iv;
            if ratio > cfg.max_rv_iv_ratio {
                return reject(
                    family,
                    HardGate::RealizedImpliedRatio,
                    format!(
                        "realized/implied {:.2} exceeds {:.2}: no edge buying volatility",
                        ratio, cfg.max_rv_iv_ratio
                    ),
                );
            }
            card.note(format!("realized/implied {:.2}", ratio));
        }
        _ => card.adjust(-10.0, "realized vol unavailable"),
    }

    if ctx.catalyst_confirmed == Some(true) {
        card.adjust(10.0, "catalyst confirmed");
    }
    match ctx.vol_regime {
        Some(VolRegime::Compressed) => card.adjust(10.0, "volatility regime compressed"),
        Some(VolRegime::Expanded) => card.adjust(-10.0, "volatility regime already expanded"),
        Some(VolRegime::Normal) | None => {}
    }
    match ctx.iv_rank {
        Some(rank) if rank <= 30.0 => card.adjust(5.0, format!("IV rank {:.0} low", rank)),
        Some(rank) if rank >= 70.0 => card.adjust(-10.0, format!("IV rank {:.0} high", rank)),
        _ => {}
    }

    card.finish(family, cfg)
}
