//! Greeks approximation and probability-of-profit.
//!
//! Quoted Greeks always win. When a provider omits them but quotes an
//! implied vol, Black–Scholes Greeks are derived from it. Neither means
//! the leg is flagged `Missing`; no zeros are invented.
//!
//! POP assumes a lognormal terminal price at the contract's implied vol.

use chrono::NaiveDate;
use common::{days_between, Contract, GreekSource, Greeks, OptionType};

const DAYS_PER_YEAR: f64 = 365.0;

/// Region of terminal underlying prices where a structure makes money.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProfitRegion {
    Above(f64),
    Below(f64),
    Between(f64, f64),
    Outside(f64, f64),
}

/// Inputs shared by every pricing call on one expiration.
#[derive(Debug, Clone, Copy)]
pub struct PricingContext {
    pub spot: f64,
    pub years: f64,
    pub rate: f64,
}

impl PricingContext {
    pub fn new(spot: f64, today: NaiveDate, expiration: NaiveDate, rate: f64) -> Self {
        // Same-day expirations still carry a sliver of time value.
        let days = days_between(today, expiration).max(0) as f64;
        Self {
            spot,
            years: (days / DAYS_PER_YEAR).max(1.0 / DAYS_PER_YEAR / 4.0),
            rate,
        }
    }
}

/// Greeks for a contract, preferring the provider's own values.
pub fn resolve_greeks(contract: &Contract, ctx: Option<&PricingContext>) -> (Option<Greeks>, GreekSource) {
    if let Some(g) = contract.quoted_greeks() {
        return (Some(g), GreekSource::Quoted);
    }
    match (ctx, contract.implied_vol) {
        (Some(ctx), Some(iv)) if iv > 0.0 && ctx.spot > 0.0 => {
            let bs = black_scholes(contract.option_type, contract.strike, iv, ctx);
            // Partial quotes keep whatever the provider sent.
            let g = Greeks {
                delta: contract.delta.unwrap_or(bs.delta),
                gamma: contract.gamma.unwrap_or(bs.gamma),
                vega: contract.vega.unwrap_or(bs.vega),
                theta: contract.theta.unwrap_or(bs.theta),
            };
            (Some(g), GreekSource::Approximated)
        }
        _ => (None, GreekSource::Missing),
    }
}

/// Delta for selection purposes: quoted, else approximated, else none.
pub fn effective_delta(contract: &Contract, ctx: Option<&PricingContext>) -> Option<f64> {
    contract
        .delta
        .or_else(|| resolve_greeks(contract, ctx).0.map(|g| g.delta))
}

/// Black–Scholes Greeks. Vega per vol point, theta per calendar day.
pub fn black_scholes(option_type: OptionType, strike: f64, vol: f64, ctx: &PricingContext) -> Greeks {
    let s = ctx.spot;
    let t = ctx.years;
    let r = ctx.rate;
    let sqrt_t = t.sqrt();
    let d1 = ((s / strike).ln() + (r + 0.5 * vol * vol) * t) / (vol * sqrt_t);
    let d2 = d1 - vol * sqrt_t;
    let pdf_d1 = normal_pdf(d1);
    let discount = (-r * t).exp();

    let gamma = pdf_d1 / (s * vol * sqrt_t);
    let vega = s * pdf_d1 * sqrt_t / 100.0;
    let decay = -s * pdf_d1 * vol / (2.0 * sqrt_t);

    match option_type {
        OptionType::Call => Greeks {
            delta: normal_cdf(d1),
            gamma,
            vega,
            theta: (decay - r * strike * discount * normal_cdf(d2)) / DAYS_PER_YEAR,
        },
        OptionType::Put => Greeks {
            delta: normal_cdf(d1) - 1.0,
            gamma,
            vega,
            theta: (decay + r * strike * discount * normal_cdf(-d2)) / DAYS_PER_YEAR,
        },
    }
}

/// P(S_T > level) under a lognormal terminal distribution.
pub fn prob_above(level: f64, vol: f64, ctx: &PricingContext) -> f64 {
    if level <= 0.0 {
        return 1.0;
    }
    let sqrt_t = ctx.years.sqrt();
    let d2 = ((ctx.spot / level).ln() + (ctx.rate - 0.5 * vol * vol) * ctx.years) / (vol * sqrt_t);
    normal_cdf(d2)
}

/// Probability that the terminal price lands in `region`.
pub fn probability_of_profit(region: ProfitRegion, vol: f64, ctx: &PricingContext) -> f64 {
    let p = match region {
        ProfitRegion::Above(be) => prob_above(be, vol, ctx),
        ProfitRegion::Below(be) => 1.0 - prob_above(be, vol, ctx),
        ProfitRegion::Between(lo, hi) => (prob_above(lo, vol, ctx) - prob_above(hi, vol, ctx)).max(0.0),
        ProfitRegion::Outside(lo, hi) => {
            (1.0 - prob_above(lo, vol, ctx)) + prob_above(hi, vol, ctx)
        }
    };
    p.clamp(0.0, 1.0)
}

// ── Normal distribution (Abramowitz & Stegun 26.2.17) ─────────────────

pub fn normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Normal CDF, max error < 7.5e-8.
pub fn normal_cdf(z: f64) -> f64 {
    if z < -8.0 {
        return 0.0;
    }
    if z > 8.0 {
        return 1.0;
    }

    if z < 0.0 {
        return 1.0 - normal_cdf(-z);
    }

    const B0: f64 = 0.2316419;
    const B1: f64 = 0.319381530;
    const B2: f64 = -0.356563782;
    const B3: f64 = 1.781477937;
    const B4: f64 = -1.821255978;
    const B5: f64 = 1.330274429;

    let t = 1.0 / (1.0 + B0 * z);
    let poly = t * (B1 + t * (B2 + t * (B3 + t * (B4 + t * B5))));

    1.0 - normal_pdf(z) * poly
}
