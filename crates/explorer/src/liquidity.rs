//! Liquidity grading.
//!
//! Thresholds come from a price tier (what the underlying costs) crossed
//! with a time tier (short <90 DTE, medium 90–364, LEAP ≥365). Long-dated
//! contracts on expensive names trade thinner by nature, so the LEAP tier
//! widens the spread ceiling and lowers the OI floor. Two-leg volatility
//! structures are graded on combined spread with a wider ceiling.

use common::config::{LiquidityConfig, ScoringConfig};
use common::{
    Contract, LiquidityAssessment, LiquidityGrade, OiAssessment, SpreadAssessment, StructureShape,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeTier {
    Short,
    Medium,
    Leap,
}

impl TimeTier {
    fn label(self) -> &'static str {
        match self {
            TimeTier::Short => "short-term",
            TimeTier::Medium => "medium-term",
            TimeTier::Leap => "LEAP",
        }
    }
}

/// Resolved limits for one (price, DTE, shape, mode) combination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidityThresholds {
    pub max_spread_pct: f64,
    pub min_open_interest: u64,
    pub time_tier: TimeTier,
}

#[derive(Debug, Clone, Copy)]
pub struct LiquidityGrader<'a> {
    cfg: &'a LiquidityConfig,
    scoring: &'a ScoringConfig,
}

impl<'a> LiquidityGrader<'a> {
    pub fn new(cfg: &'a LiquidityConfig, scoring: &'a ScoringConfig) -> Self {
        Self { cfg, scoring }
    }

    pub fn time_tier(&self, dte: i64) -> TimeTier {
        if dte >= self.cfg.leap_min_dte {
            TimeTier::Leap
        } else if dte >= self.cfg.medium_min_dte {
            TimeTier::Medium
        } else {
            TimeTier::Short
        }
    }

    pub fn thresholds(
        &self,
        underlying_price: Option<f64>,
        dte: i64,
        shape: StructureShape,
    ) -> LiquidityThresholds {
        let price = underlying_price.unwrap_or(0.0);
        let (mut max_spread, min_oi) = self
            .cfg
            .price_tiers
            .iter()
            .find(|t| price >= t.min_price)
            .or_else(|| self.cfg.price_tiers.last())
            .map(|t| (t.max_spread_pct, t.min_open_interest as f64))
            .unwrap_or((0.05, 100.0));
        let mut min_oi = min_oi;

        let time_tier = self.time_tier(dte);
        match time_tier {
            TimeTier::Short => {}
            TimeTier::Medium => {
                max_spread *= self.cfg.medium_spread_multiplier;
                min_oi *= self.cfg.medium_oi_multiplier;
            }
            TimeTier::Leap => {
                max_spread *= self.cfg.leap_spread_multiplier;
                min_oi *= self.cfg.leap_oi_multiplier;
            }
        }

        if matches!(shape, StructureShape::Straddle | StructureShape::Strangle) {
            max_spread *= self.cfg.volatility_spread_multiplier;
        }

        if self.scoring.is_strict() {
            max_spread *= self.scoring.strict_spread_multiplier;
            min_oi *= self.scoring.strict_oi_multiplier;
        }

        LiquidityThresholds {
            max_spread_pct: max_spread,
            min_open_interest: min_oi.round().max(1.0) as u64,
            time_tier,
        }
    }

    /// Grade one contract or a leg set.
    ///
    /// Leg sets use summed spread over summed mid and the thinnest leg's OI.
    pub fn assess(
        &self,
        legs: &[&Contract],
        underlying_price: Option<f64>,
        dte: i64,
        shape: StructureShape,
    ) -> LiquidityAssessment {
        if legs.is_empty() {
            return LiquidityAssessment::absent("no option legs to grade");
        }

        // Without a quote on the underlying, the first strike stands in for it.
        let price = underlying_price.or_else(|| legs.first().map(|c| c.strike));
        let th = self.thresholds(price, dte, shape);

        let spread_pct = combined_spread_pct(legs);
        let open_interest = legs.iter().map(|c| c.open_interest).min().unwrap_or(0);
        let volume = legs.iter().map(|c| c.volume).min().unwrap_or(0);

        let spread_assessment = match spread_pct {
            None => SpreadAssessment::NoQuote,
            Some(s) if s <= 0.5 * th.max_spread_pct => SpreadAssessment::Tight,
            Some(s) if s <= th.max_spread_pct => SpreadAssessment::Acceptable,
            Some(s) if s <= 1.5 * th.max_spread_pct => SpreadAssessment::Wide,
            Some(_) => SpreadAssessment::VeryWide,
        };

        let min_oi = th.min_open_interest as f64;
        let oi = open_interest as f64;
        let oi_assessment = if open_interest == 0 {
            OiAssessment::Absent
        } else if oi >= 5.0 * min_oi {
            OiAssessment::Deep
        } else if oi >= min_oi {
            OiAssessment::Adequate
        } else {
            OiAssessment::Light
        };

        let grade = grade_for(spread_pct, oi, &th);
        let score = liquidity_score(spread_pct, oi, volume, &th);

        let spread_text = match spread_pct {
            Some(s) => format!("spread {:.1}%", s * 100.0),
            None => "no two-sided quote".to_string(),
        };
        let context = format!(
            "{} tier ({} DTE, {}): {} vs {:.1}% max, OI {} vs {} min, volume {}{}",
            th.time_tier.label(),
            dte,
            match underlying_price {
                Some(p) => format!("${:.2} underlying", p),
                None => "underlying price unknown".to_string(),
            },
            spread_text,
            th.max_spread_pct * 100.0,
            open_interest,
            th.min_open_interest,
            volume,
            if legs.len() > 1 {
                format!(", {} legs combined", legs.len())
            } else {
                String::new()
            }
        );

        LiquidityAssessment {
            grade,
            spread_assessment,
            oi_assessment,
            spread_pct,
            max_spread_pct: th.max_spread_pct,
            open_interest,
            min_open_interest: th.min_open_interest,
            score,
            context,
        }
    }
}

/// Summed (ask - bid) over summed mid. `None` if any leg lacks a quote.
pub fn combined_spread_pct(legs: &[&Contract]) -> Option<f64> {
    let mut spread = 0.0;
    let mut mid = 0.0;
    for c in legs {
        spread += c.spread()?;
        mid += c.mid()?;
    }
    if mid <= 0.0 {
        return None;
    }
    Some(spread / mid)
}

fn grade_for(spread_pct: Option<f64>, oi: f64, th: &LiquidityThresholds) -> LiquidityGrade {
    let Some(spread) = spread_pct else {
        return LiquidityGrade::Illiquid;
    };
    let max = th.max_spread_pct;
    let min = th.min_open_interest as f64;

    if spread <= 0.5 * max && oi >= 5.0 * min {
        LiquidityGrade::Excellent
    } else if spread <= 0.75 * max && oi >= 2.0 * min {
        LiquidityGrade::Good
    } else if spread <= max && oi >= min {
        LiquidityGrade::Acceptable
    } else if spread <= 1.5 * max && oi >= 0.5 * min {
        LiquidityGrade::Thin
    } else {
        LiquidityGrade::Illiquid
    }
}

/// 0–100: spread 50%, open interest 40%, volume 10%.
fn liquidity_score(spread_pct: Option<f64>, oi: f64, volume: u64, th: &LiquidityThresholds) -> f64 {
    let spread_score = match spread_pct {
        None => 0.0,
        Some(s) => {
            let ratio = s / th.max_spread_pct;
            if ratio <= 0.5 {
                100.0
            } else {
                (100.0 * (2.0 - ratio) / 1.5).clamp(0.0, 100.0)
            }
        }
    };

    let ratio = oi / th.min_open_interest as f64;
    let oi_score = if ratio >= 5.0 {
        100.0
    } else if ratio >= 2.0 {
        80.0 + (ratio - 2.0) / 3.0 * 20.0
    } else if ratio >= 1.0 {
        60.0 + (ratio - 1.0) * 20.0
    } else {
        60.0 * ratio
    };

    let volume_score = (volume as f64 * 10.0).min(100.0);

    (0.5 * spread_score + 0.4 * oi_score + 0.1 * volume_score).clamp(0.0, 100.0)
}
