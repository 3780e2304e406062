//! Strategy-shape-aware strike selection.
//!
//! Given one or more expirations of a chain, build the legs a strategy
//! needs and promote the single strike that defines the position
//! economically:
//!
//! | Shape              | Promoted leg              |
//! |--------------------|---------------------------|
//! | single leg         | the option itself         |
//! | credit vertical    | short strike              |
//! | debit vertical     | long strike               |
//! | straddle/strangle  | higher-vega leg           |
//! | iron condor        | short put                 |
//! | buy-write / CC     | short call                |
//! | calendar/diagonal  | long back-month leg       |
//!
//! LEAP single legs (≥365 DTE) deliberately reach deeper ITM to limit
//! theta decay. Failures carry the nearest-miss contracts.

use chrono::NaiveDate;
use common::config::SelectionConfig;
use common::{
    days_between, Candidate, Contract, ExpirationSlice, LegInstrument, Leg, LegSide, OptionType,
    PromotedStrike, RiskModel, SelectionOutcome, SelectionResult, StrategyType, StructureShape,
    CONTRACT_MULTIPLIER, LEAP_MIN_DTE,
};

use crate::greeks::{effective_delta, probability_of_profit, resolve_greeks, PricingContext, ProfitRegion};

/// The expirations a selection may draw from.
#[derive(Debug, Clone)]
pub struct ChainView<'a> {
    pub underlying_price: Option<f64>,
    pub expirations: Vec<&'a ExpirationSlice>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionFailure {
    pub outcome: SelectionOutcome,
    pub reason: String,
    pub near_misses: Vec<Contract>,
}

impl SelectionFailure {
    fn empty(reason: impl Into<String>) -> Self {
        Self {
            outcome: SelectionOutcome::ChainEmpty,
            reason: reason.into(),
            near_misses: Vec::new(),
        }
    }

    fn no_strikes(reason: impl Into<String>, near_misses: Vec<Contract>) -> Self {
        Self {
            outcome: SelectionOutcome::NoOptimalStrikes,
            reason: reason.into(),
            near_misses,
        }
    }
}

type Selection = Result<SelectionResult, SelectionFailure>;

/// One expiration plus everything needed to price it.
struct SliceCtx<'s> {
    slice: &'s ExpirationSlice,
    pricing: PricingContext,
    spot: f64,
    dte: i64,
}

/// Legs plus economics before POP and promotion are attached.
struct Draft {
    legs: Vec<Leg>,
    promoted: usize,
    reason: String,
    net_premium: f64,
    capital_required: Option<f64>,
    risk_model: RiskModel,
    risk_per_contract: Option<f64>,
    region: Option<ProfitRegion>,
    structure_simplified: bool,
    notes: Vec<String>,
}

pub struct StrikeSelector<'a> {
    cfg: &'a SelectionConfig,
    allow_multi_expiry: bool,
    today: NaiveDate,
}

impl<'a> StrikeSelector<'a> {
    pub fn new(cfg: &'a SelectionConfig, allow_multi_expiry: bool, today: NaiveDate) -> Self {
        Self {
            cfg,
            allow_multi_expiry,
            today,
        }
    }

    pub fn select(&self, candidate: &Candidate, view: &ChainView<'_>) -> Selection {
        let st = candidate.strategy_type;
        if st.shape() == StructureShape::MultiExpiry && !self.allow_multi_expiry {
            return Err(SelectionFailure {
                outcome: SelectionOutcome::UnsupportedStructure,
                reason: format!(
                    "{} spans multiple expirations; enable allow_multi_expiry to build a simplified version",
                    st
                ),
                near_misses: Vec::new(),
            });
        }

        let (slice, mut notes) = self.choose_slice(candidate, view)?;
        let spot = candidate
            .underlying_price
            .or(view.underlying_price)
            .or_else(|| {
                let inferred = infer_spot(slice);
                if let Some(s) = inferred {
                    notes.push(format!("underlying price inferred from put-call parity: {:.2}", s));
                }
                inferred
            })
            .ok_or_else(|| {
                SelectionFailure::no_strikes(
                    "underlying price unavailable and not inferable from the chain",
                    nearest_to(slice.contracts.iter(), 0.0, self.cfg.max_near_misses),
                )
            })?;

        let sc = SliceCtx {
            slice,
            pricing: PricingContext::new(spot, self.today, slice.expiration, self.cfg.risk_free_rate),
            spot,
            dte: days_between(self.today, slice.expiration),
        };

        let mut draft = match st {
            StrategyType::LongCall => self.long_single(&sc, OptionType::Call)?,
            StrategyType::LongPut => self.long_single(&sc, OptionType::Put)?,
            StrategyType::CashSecuredPut => self.cash_secured_put(&sc)?,
            StrategyType::CoveredCall => self.stock_and_call(&sc, false)?,
            StrategyType::BuyWrite => self.stock_and_call(&sc, true)?,
            StrategyType::BullCallSpread => self.debit_vertical(&sc, OptionType::Call)?,
            StrategyType::BearPutSpread => self.debit_vertical(&sc, OptionType::Put)?,
            StrategyType::BullPutSpread => self.credit_vertical(&sc, OptionType::Put)?,
            StrategyType::BearCallSpread => self.credit_vertical(&sc, OptionType::Call)?,
            StrategyType::LongStraddle => self.straddle(&sc)?,
            StrategyType::LongStrangle => self.strangle(&sc)?,
            StrategyType::IronCondor => self.iron_condor(&sc)?,
            StrategyType::CalendarSpread => self.multi_expiry(&sc, view, false)?,
            StrategyType::DiagonalSpread => self.multi_expiry(&sc, view, true)?,
        };

        notes.append(&mut draft.notes);
        let probability_of_profit = match draft.region {
            Some(region) => {
                let (pop, note) = self.pop(region, &draft.legs, &sc);
                notes.extend(note);
                pop
            }
            None => None,
        };

        let contract = draft.legs[draft.promoted]
            .contract()
            .cloned()
            .ok_or_else(|| SelectionFailure::no_strikes("promoted leg is not an option", Vec::new()))?;

        Ok(SelectionResult {
            promoted: PromotedStrike {
                leg_index: draft.promoted,
                contract,
                reason: draft.reason,
            },
            legs: draft.legs,
            expiration: slice.expiration,
            dte: sc.dte,
            net_premium: draft.net_premium,
            capital_required: draft.capital_required,
            risk_model: draft.risk_model,
            risk_per_contract: draft.risk_per_contract,
            probability_of_profit,
            structure_simplified: draft.structure_simplified,
            notes,
        })
    }

    // ── Expiration and pricing helpers ────────────────────────────────

    fn choose_slice<'s>(
        &self,
        candidate: &Candidate,
        view: &ChainView<'s>,
    ) -> Result<(&'s ExpirationSlice, Vec<String>), SelectionFailure> {
        let target = candidate.target_dte();
        let live: Vec<&'s ExpirationSlice> = view
            .expirations
            .iter()
            .copied()
            .filter(|e| !e.is_empty() && e.dte(self.today) >= 0)
            .collect();
        if live.is_empty() {
            return Err(SelectionFailure::empty("chain has no unexpired contracts"));
        }

        let by_target = |e: &&'s ExpirationSlice| (e.dte(self.today) - target).abs();
        let in_window = live
            .iter()
            .copied()
            .filter(|e| {
                let d = e.dte(self.today);
                d >= candidate.dte_min && d <= candidate.dte_max
            })
            .min_by_key(by_target);

        match in_window {
            Some(e) => Ok((e, Vec::new())),
            None => {
                let e = live
                    .iter()
                    .copied()
                    .min_by_key(by_target)
                    .ok_or_else(|| SelectionFailure::empty("chain has no unexpired contracts"))?;
                let note = format!(
                    "no expiration inside {}-{} DTE; nearest is {} ({} DTE)",
                    candidate.dte_min,
                    candidate.dte_max,
                    e.expiration,
                    e.dte(self.today)
                );
                Ok((e, vec![note]))
            }
        }
    }

    fn abs_delta(&self, c: &Contract, sc: &SliceCtx<'_>) -> Option<f64> {
        effective_delta(c, Some(&sc.pricing)).map(f64::abs)
    }

    fn leg(&self, side: LegSide, contract: &Contract, sc: &SliceCtx<'_>) -> Leg {
        let (greeks, greek_source) = resolve_greeks(contract, Some(&sc.pricing));
        Leg {
            side,
            quantity: 1,
            instrument: LegInstrument::Option(contract.clone()),
            greeks,
            greek_source,
        }
    }

    /// Quoted contract of `option_type` whose |delta| is closest to
    /// `target` within `[lo, hi]`, ties broken by ATM proximity.
    fn pick_by_delta<'s>(
        &self,
        sc: &SliceCtx<'s>,
        option_type: OptionType,
        target: f64,
        lo: f64,
        hi: f64,
        allowed: impl Fn(&Contract) -> bool,
    ) -> Result<&'s Contract, Vec<Contract>> {
        let pool: Vec<(&'s Contract, f64)> = sc
            .slice
            .of_type(option_type)
            .filter(|c| allowed(*c))
            .filter_map(|c| self.abs_delta(c, sc).map(|d| (c, d)))
            .collect();

        let best = pool
            .iter()
            .filter(|(c, d)| c.is_quoted() && *d >= lo && *d <= hi)
            .min_by(|a, b| {
                (a.1 - target)
                    .abs()
                    .total_cmp(&(b.1 - target).abs())
                    .then_with(|| (a.0.strike - sc.spot).abs().total_cmp(&(b.0.strike - sc.spot).abs()))
            });
        if let Some((c, _)) = best {
            return Ok(*c);
        }

        // Nearest misses: closest to the band first, unpriced contracts last.
        let mut misses: Vec<(&Contract, f64)> = sc
            .slice
            .of_type(option_type)
            .map(|c| {
                let dist = match self.abs_delta(c, sc) {
                    Some(d) if d < lo => lo - d,
                    Some(d) if d > hi => d - hi,
                    Some(d) => (d - target).abs(),
                    None => 10.0 + (c.strike - sc.spot).abs() / sc.spot,
                };
                let penalty = if c.is_quoted() { 0.0 } else { 1.0 };
                (c, dist + penalty)
            })
            .collect();
        misses.sort_by(|a, b| a.1.total_cmp(&b.1));
        Err(misses
            .into_iter()
            .take(self.cfg.max_near_misses)
            .map(|(c, _)| c.clone())
            .collect())
    }

    fn has_deltas(&self, sc: &SliceCtx<'_>, option_type: OptionType) -> bool {
        sc.slice
            .of_type(option_type)
            .any(|c| self.abs_delta(c, sc).is_some())
    }

    /// Quoted contract with strike closest to `level`.
    fn pick_by_strike<'s>(
        &self,
        sc: &SliceCtx<'s>,
        option_type: OptionType,
        level: f64,
        allowed: impl Fn(&Contract) -> bool,
    ) -> Option<&'s Contract> {
        sc.slice
            .of_type(option_type)
            .filter(|c| c.is_quoted() && allowed(*c))
            .min_by(|a, b| (a.strike - level).abs().total_cmp(&(b.strike - level).abs()))
    }

    fn pop(
        &self,
        region: ProfitRegion,
        legs: &[Leg],
        sc: &SliceCtx<'_>,
    ) -> (Option<f64>, Option<String>) {
        let ivs: Vec<f64> = legs
            .iter()
            .filter_map(|l| l.contract().and_then(|c| c.implied_vol))
            .filter(|iv| *iv > 0.0)
            .collect();
        if !ivs.is_empty() {
            let vol = ivs.iter().sum::<f64>() / ivs.len() as f64;
            return (Some(probability_of_profit(region, vol, &sc.pricing)), None);
        }
        let short_delta = legs
            .iter()
            .filter(|l| l.is_short())
            .find_map(|l| l.delta());
        match short_delta {
            Some(d) => (
                Some((1.0 - d.abs()).clamp(0.0, 1.0)),
                Some("POP from short-leg delta (no implied vol quoted)".to_string()),
            ),
            None => (
                None,
                Some("POP unavailable: no implied vol or short-leg delta".to_string()),
            ),
        }
    }

    // ── Single legs ───────────────────────────────────────────────────

    fn long_single(&self, sc: &SliceCtx<'_>, option_type: OptionType) -> Result<Draft, SelectionFailure> {
        let leap = sc.dte >= LEAP_MIN_DTE;
        let mut notes = Vec::new();

        let contract = if self.has_deltas(sc, option_type) {
            let (target, lo) = if leap {
                notes.push(format!(
                    "LEAP ({} DTE): targeting delta {:.2}+ to limit theta decay",
                    sc.dte, self.cfg.leap_min_delta
                ));
                (self.cfg.leap_target_delta, self.cfg.leap_min_delta)
            } else {
                (self.cfg.directional_target_delta, self.cfg.min_delta)
            };
            self.pick_by_delta(sc, option_type, target, lo, self.cfg.max_delta, |_| true)
                .map_err(|misses| {
                    SelectionFailure::no_strikes(
                        format!(
                            "no quoted {:?} with |delta| in [{:.2}, {:.2}]",
                            option_type, lo, self.cfg.max_delta
                        ),
                        misses,
                    )
                })?
        } else {
            // ITM by ~15% for LEAPs, ATM otherwise.
            let level = match (leap, option_type) {
                (true, OptionType::Call) => sc.spot * 0.85,
                (true, OptionType::Put) => sc.spot * 1.15,
                (false, _) => sc.spot,
            };
            notes.push("delta unavailable; strike chosen by moneyness".to_string());
            self.pick_by_strike(sc, option_type, level, |_| true)
                .ok_or_else(|| {
                    SelectionFailure::no_strikes(
                        format!("no quoted {:?} contracts", option_type),
                        nearest_to(sc.slice.of_type(option_type), sc.spot, self.cfg.max_near_misses),
                    )
                })?
        };

        let mid = contract.mid().unwrap_or_default();
        let region = match option_type {
            OptionType::Call => ProfitRegion::Above(contract.strike + mid),
            OptionType::Put => ProfitRegion::Below(contract.strike - mid),
        };
        Ok(Draft {
            legs: vec![self.leg(LegSide::Buy, contract, sc)],
            promoted: 0,
            reason: "single-leg position".into(),
            net_premium: -mid,
            capital_required: Some(mid * CONTRACT_MULTIPLIER),
            risk_model: RiskModel::DebitMax,
            risk_per_contract: Some(mid * CONTRACT_MULTIPLIER),
            region: Some(region),
            structure_simplified: false,
            notes,
        })
    }

    fn short_option<'s>(
        &self,
        sc: &SliceCtx<'s>,
        option_type: OptionType,
    ) -> Result<&'s Contract, SelectionFailure> {
        // Short options sit out of the money.
        let otm = |c: &Contract| match option_type {
            OptionType::Put => c.strike <= sc.spot,
            OptionType::Call => c.strike >= sc.spot,
        };
        if self.has_deltas(sc, option_type) {
            self.pick_by_delta(
                sc,
                option_type,
                self.cfg.short_option_delta,
                self.cfg.min_delta,
                self.cfg.max_delta,
                otm,
            )
            .map_err(|misses| {
                SelectionFailure::no_strikes(
                    format!(
                        "no quoted OTM {:?} near delta {:.2}",
                        option_type, self.cfg.short_option_delta
                    ),
                    misses,
                )
            })
        } else {
            let level = match option_type {
                OptionType::Put => sc.spot * 0.95,
                OptionType::Call => sc.spot * 1.05,
            };
            self.pick_by_strike(sc, option_type, level, otm).ok_or_else(|| {
                SelectionFailure::no_strikes(
                    format!("no quoted OTM {:?} contracts", option_type),
                    nearest_to(sc.slice.of_type(option_type), level, self.cfg.max_near_misses),
                )
            })
        }
    }

    fn cash_secured_put(&self, sc: &SliceCtx<'_>) -> Result<Draft, SelectionFailure> {
        let put = self.short_option(sc, OptionType::Put)?;
        let credit = put.mid().unwrap_or_default();
        Ok(Draft {
            legs: vec![self.leg(LegSide::Sell, put, sc)],
            promoted: 0,
            reason: "single-leg position".into(),
            net_premium: credit,
            capital_required: Some(put.strike * CONTRACT_MULTIPLIER),
            risk_model: RiskModel::CreditMax,
            risk_per_contract: Some((put.strike - credit) * CONTRACT_MULTIPLIER),
            region: Some(ProfitRegion::Above(put.strike - credit)),
            structure_simplified: false,
            notes: Vec::new(),
        })
    }

    fn stock_and_call(&self, sc: &SliceCtx<'_>, buy_shares: bool) -> Result<Draft, SelectionFailure> {
        let call = self.short_option(sc, OptionType::Call)?;
        let credit = call.mid().unwrap_or_default();
        let stock = Leg {
            side: LegSide::Buy,
            quantity: CONTRACT_MULTIPLIER as u32,
            instrument: LegInstrument::Underlying { price: sc.spot },
            greeks: None,
            greek_source: common::GreekSource::Missing,
        };
        let mut notes = Vec::new();
        if !buy_shares {
            notes.push("assumes 100 shares already held; capital shown at current price".to_string());
        }
        Ok(Draft {
            legs: vec![stock, self.leg(LegSide::Sell, call, sc)],
            promoted: 1,
            reason: "short call sets the income and the upside cap".into(),
            net_premium: credit,
            capital_required: Some((sc.spot - credit) * CONTRACT_MULTIPLIER),
            risk_model: RiskModel::StockDependent,
            // Downside follows the shares; no numeric max loss is claimed.
            risk_per_contract: None,
            region: Some(ProfitRegion::Above(sc.spot - credit)),
            structure_simplified: false,
            notes,
        })
    }

    // ── Verticals ─────────────────────────────────────────────────────

    fn need_deltas(&self, sc: &SliceCtx<'_>, option_type: OptionType, what: &str) -> Result<(), SelectionFailure> {
        if self.has_deltas(sc, option_type) {
            Ok(())
        } else {
            Err(SelectionFailure::no_strikes(
                format!("{} needs deltas; none quoted or derivable", what),
                nearest_to(sc.slice.of_type(option_type), sc.spot, self.cfg.max_near_misses),
            ))
        }
    }

    fn debit_vertical(&self, sc: &SliceCtx<'_>, option_type: OptionType) -> Result<Draft, SelectionFailure> {
        self.need_deltas(sc, option_type, "debit spread")?;
        let long = self
            .pick_by_delta(
                sc,
                option_type,
                self.cfg.debit_long_delta,
                self.cfg.min_delta,
                self.cfg.max_delta,
                |_| true,
            )
            .map_err(|m| SelectionFailure::no_strikes("no long leg near target delta", m))?;
        // Short leg further OTM than the long leg.
        let further_otm = |c: &Contract| match option_type {
            OptionType::Call => c.strike > long.strike,
            OptionType::Put => c.strike < long.strike,
        };
        let short = self
            .pick_by_delta(
                sc,
                option_type,
                self.cfg.debit_short_delta,
                self.cfg.min_delta,
                self.cfg.max_delta,
                further_otm,
            )
            .map_err(|m| SelectionFailure::no_strikes("no short leg beyond the long strike", m))?;

        let debit = long.mid().unwrap_or_default() - short.mid().unwrap_or_default();
        let width = (long.strike - short.strike).abs();
        if debit <= 0.0 {
            return Err(SelectionFailure::no_strikes(
                format!("spread {}/{} prices at no debit", long.strike, short.strike),
                vec![long.clone(), short.clone()],
            ));
        }
        let region = match option_type {
            OptionType::Call => ProfitRegion::Above(long.strike + debit),
            OptionType::Put => ProfitRegion::Below(long.strike - debit),
        };
        Ok(Draft {
            legs: vec![self.leg(LegSide::Buy, long, sc), self.leg(LegSide::Sell, short, sc)],
            promoted: 0,
            reason: "long strike defines directional exposure".into(),
            net_premium: -debit,
            capital_required: Some(debit * CONTRACT_MULTIPLIER),
            risk_model: RiskModel::DebitMax,
            risk_per_contract: Some(debit * CONTRACT_MULTIPLIER),
            region: Some(region),
            structure_simplified: false,
            notes: vec![format!(
                "width {:.2}, debit {:.2} ({:.0}% of width)",
                width,
                debit,
                debit / width * 100.0
            )],
        })
    }

    fn credit_vertical(&self, sc: &SliceCtx<'_>, option_type: OptionType) -> Result<Draft, SelectionFailure> {
        self.need_deltas(sc, option_type, "credit spread")?;
        let otm = |c: &Contract| match option_type {
            OptionType::Put => c.strike <= sc.spot,
            OptionType::Call => c.strike >= sc.spot,
        };
        let short = self
            .pick_by_delta(
                sc,
                option_type,
                self.cfg.credit_short_delta,
                self.cfg.min_delta,
                self.cfg.max_delta,
                otm,
            )
            .map_err(|m| SelectionFailure::no_strikes("no short leg near target delta", m))?;
        // The protective wing may sit below the selection band.
        let beyond = |c: &Contract| match option_type {
            OptionType::Put => c.strike < short.strike,
            OptionType::Call => c.strike > short.strike,
        };
        let long = self
            .pick_by_delta(sc, option_type, self.cfg.credit_long_delta, 0.0, self.cfg.max_delta, beyond)
            .map_err(|m| SelectionFailure::no_strikes("no protective long leg beyond the short strike", m))?;

        let credit = short.mid().unwrap_or_default() - long.mid().unwrap_or_default();
        let width = (short.strike - long.strike).abs();
        if credit <= 0.0 || credit >= width {
            return Err(SelectionFailure::no_strikes(
                format!(
                    "spread {}/{} prices at credit {:.2} on width {:.2}",
                    short.strike, long.strike, credit, width
                ),
                vec![short.clone(), long.clone()],
            ));
        }
        let region = match option_type {
            OptionType::Put => ProfitRegion::Above(short.strike - credit),
            OptionType::Call => ProfitRegion::Below(short.strike + credit),
        };
        let risk = (width - credit) * CONTRACT_MULTIPLIER;
        Ok(Draft {
            legs: vec![self.leg(LegSide::Sell, short, sc), self.leg(LegSide::Buy, long, sc)],
            promoted: 0,
            reason: "short strike defines probability of profit".into(),
            net_premium: credit,
            capital_required: Some(risk),
            risk_model: RiskModel::CreditMax,
            risk_per_contract: Some(risk),
            region: Some(region),
            structure_simplified: false,
            notes: vec![format!(
                "width {:.2}, credit {:.2} ({:.0}% of width)",
                width,
                credit,
                credit / width * 100.0
            )],
        })
    }

    // ── Volatility structures ─────────────────────────────────────────

    fn higher_vega(&self, legs: &[Leg]) -> (usize, String) {
        let vega = |i: usize| legs.get(i).and_then(|l| l.greeks).map(|g| g.vega);
        match (vega(0), vega(1)) {
            (Some(c), Some(p)) if p > c => (1, format!("put carries higher vega ({:.3} vs {:.3})", p, c)),
            (Some(c), Some(p)) => (0, format!("call carries higher vega ({:.3} vs {:.3})", c, p)),
            _ => (0, "vega unavailable; call leg promoted".into()),
        }
    }

    fn straddle(&self, sc: &SliceCtx<'_>) -> Result<Draft, SelectionFailure> {
        // ATM strike with both sides quoted.
        let strike = sc
            .slice
            .of_type(OptionType::Call)
            .filter(|c| c.is_quoted())
            .filter(|c| {
                sc.slice
                    .find(OptionType::Put, c.strike)
                    .map(Contract::is_quoted)
                    .unwrap_or(false)
            })
            .map(|c| c.strike)
            .min_by(|a, b| (a - sc.spot).abs().total_cmp(&(b - sc.spot).abs()));
        let (call, put) = match strike
            .and_then(|k| Some((sc.slice.find(OptionType::Call, k)?, sc.slice.find(OptionType::Put, k)?)))
        {
            Some(pair) => pair,
            None => {
                return Err(SelectionFailure::no_strikes(
                    "no strike with both call and put quoted",
                    nearest_to(sc.slice.contracts.iter(), sc.spot, self.cfg.max_near_misses),
                ))
            }
        };

        let debit = call.mid().unwrap_or_default() + put.mid().unwrap_or_default();
        let legs = vec![self.leg(LegSide::Buy, call, sc), self.leg(LegSide::Buy, put, sc)];
        let (promoted, reason) = self.higher_vega(&legs);
        Ok(Draft {
            legs,
            promoted,
            reason,
            net_premium: -debit,
            capital_required: Some(debit * CONTRACT_MULTIPLIER),
            risk_model: RiskModel::DebitMax,
            risk_per_contract: Some(debit * CONTRACT_MULTIPLIER),
            region: Some(ProfitRegion::Outside(call.strike - debit, call.strike + debit)),
            structure_simplified: false,
            notes: Vec::new(),
        })
    }

    fn strangle(&self, sc: &SliceCtx<'_>) -> Result<Draft, SelectionFailure> {
        let otm = self.cfg.strangle_otm_pct;
        let call = self.pick_by_strike(sc, OptionType::Call, sc.spot * (1.0 + otm), |c| c.strike > sc.spot);
        let put = self.pick_by_strike(sc, OptionType::Put, sc.spot * (1.0 - otm), |c| c.strike < sc.spot);
        let (call, put) = match (call, put) {
            (Some(c), Some(p)) => (c, p),
            _ => {
                return Err(SelectionFailure::no_strikes(
                    format!("no quoted OTM call/put pair near ±{:.0}%", otm * 100.0),
                    nearest_to(sc.slice.contracts.iter(), sc.spot, self.cfg.max_near_misses),
                ))
            }
        };

        let debit = call.mid().unwrap_or_default() + put.mid().unwrap_or_default();
        let legs = vec![self.leg(LegSide::Buy, call, sc), self.leg(LegSide::Buy, put, sc)];
        let (promoted, reason) = self.higher_vega(&legs);
        Ok(Draft {
            legs,
            promoted,
            reason,
            net_premium: -debit,
            capital_required: Some(debit * CONTRACT_MULTIPLIER),
            risk_model: RiskModel::DebitMax,
            risk_per_contract: Some(debit * CONTRACT_MULTIPLIER),
            region: Some(ProfitRegion::Outside(put.strike - debit, call.strike + debit)),
            structure_simplified: false,
            notes: Vec::new(),
        })
    }

    // ── Iron condor ───────────────────────────────────────────────────

    fn iron_condor(&self, sc: &SliceCtx<'_>) -> Result<Draft, SelectionFailure> {
        self.need_deltas(sc, OptionType::Put, "iron condor")?;
        self.need_deltas(sc, OptionType::Call, "iron condor")?;
        let short_target = self.cfg.condor_short_delta;
        let long_target = self.cfg.condor_long_delta;
        let hi = self.cfg.max_delta;

        let short_put = self
            .pick_by_delta(sc, OptionType::Put, short_target, 0.0, hi, |c| c.strike <= sc.spot)
            .map_err(|m| SelectionFailure::no_strikes("no short put near condor delta", m))?;
        let short_call = self
            .pick_by_delta(sc, OptionType::Call, short_target, 0.0, hi, |c| c.strike >= sc.spot)
            .map_err(|m| SelectionFailure::no_strikes("no short call near condor delta", m))?;
        let long_put = self
            .pick_by_delta(sc, OptionType::Put, long_target, 0.0, hi, |c| c.strike < short_put.strike)
            .map_err(|m| SelectionFailure::no_strikes("no long put wing", m))?;
        let long_call = self
            .pick_by_delta(sc, OptionType::Call, long_target, 0.0, hi, |c| c.strike > short_call.strike)
            .map_err(|m| SelectionFailure::no_strikes("no long call wing", m))?;

        let mid = |c: &Contract| c.mid().unwrap_or_default();
        let credit = mid(short_put) + mid(short_call) - mid(long_put) - mid(long_call);
        let width = (short_put.strike - long_put.strike).max(long_call.strike - short_call.strike);
        if credit <= 0.0 || credit >= width {
            return Err(SelectionFailure::no_strikes(
                format!("condor prices at credit {:.2} on width {:.2}", credit, width),
                vec![
                    long_put.clone(),
                    short_put.clone(),
                    short_call.clone(),
                    long_call.clone(),
                ],
            ));
        }
        let risk = (width - credit) * CONTRACT_MULTIPLIER;
        Ok(Draft {
            legs: vec![
                self.leg(LegSide::Buy, long_put, sc),
                self.leg(LegSide::Sell, short_put, sc),
                self.leg(LegSide::Sell, short_call, sc),
                self.leg(LegSide::Buy, long_call, sc),
            ],
            promoted: 1,
            reason: "short put anchors credit and liquidity".into(),
            net_premium: credit,
            capital_required: Some(risk),
            risk_model: RiskModel::CreditMax,
            risk_per_contract: Some(risk),
            region: Some(ProfitRegion::Between(
                short_put.strike - credit,
                short_call.strike + credit,
            )),
            structure_simplified: false,
            notes: vec![format!(
                "wings {}/{} - {}/{}, credit {:.2} on width {:.2}",
                long_put.strike, short_put.strike, short_call.strike, long_call.strike, credit, width
            )],
        })
    }

    // ── Calendar / diagonal (simplified) ──────────────────────────────

    fn multi_expiry(
        &self,
        front: &SliceCtx<'_>,
        view: &ChainView<'_>,
        diagonal: bool,
    ) -> Result<Draft, SelectionFailure> {
        let back_slice = view
            .expirations
            .iter()
            .copied()
            .filter(|e| !e.is_empty() && e.expiration > front.slice.expiration)
            .min_by_key(|e| e.expiration)
            .ok_or_else(|| {
                SelectionFailure::no_strikes(
                    "no later expiration for the back-month leg",
                    nearest_to(front.slice.of_type(OptionType::Call), front.spot, self.cfg.max_near_misses),
                )
            })?;
        let back = SliceCtx {
            slice: back_slice,
            pricing: PricingContext::new(
                front.spot,
                self.today,
                back_slice.expiration,
                self.cfg.risk_free_rate,
            ),
            spot: front.spot,
            dte: days_between(self.today, back_slice.expiration),
        };

        let (short, long) = if diagonal {
            self.need_deltas(front, OptionType::Call, "diagonal spread")?;
            let short = self.short_option(front, OptionType::Call)?;
            let long = self
                .pick_by_delta(
                    &back,
                    OptionType::Call,
                    self.cfg.debit_long_delta,
                    self.cfg.min_delta,
                    self.cfg.max_delta,
                    |c| c.strike < short.strike,
                )
                .map_err(|m| SelectionFailure::no_strikes("no back-month long call for diagonal", m))?;
            (short, long)
        } else {
            let strike = front
                .slice
                .of_type(OptionType::Call)
                .filter(|c| c.is_quoted())
                .filter(|c| {
                    back.slice
                        .find(OptionType::Call, c.strike)
                        .map(Contract::is_quoted)
                        .unwrap_or(false)
                })
                .map(|c| c.strike)
                .min_by(|a, b| (a - front.spot).abs().total_cmp(&(b - front.spot).abs()));
            match strike.and_then(|k| {
                Some((
                    front.slice.find(OptionType::Call, k)?,
                    back.slice.find(OptionType::Call, k)?,
                ))
            }) {
                Some(pair) => pair,
                None => {
                    return Err(SelectionFailure::no_strikes(
                        "no strike quoted in both front and back month",
                        nearest_to(front.slice.of_type(OptionType::Call), front.spot, self.cfg.max_near_misses),
                    ))
                }
            }
        };

        let debit = long.mid().unwrap_or_default() - short.mid().unwrap_or_default();
        if debit <= 0.0 {
            return Err(SelectionFailure::no_strikes(
                format!("back/front pair {}/{} prices at no debit", long.strike, short.strike),
                vec![short.clone(), long.clone()],
            ));
        }

        Ok(Draft {
            legs: vec![self.leg(LegSide::Sell, short, front), self.leg(LegSide::Buy, long, &back)],
            promoted: 1,
            reason: "long back-month strike defines the position".into(),
            net_premium: -debit,
            capital_required: Some(debit * CONTRACT_MULTIPLIER),
            risk_model: RiskModel::DebitMax,
            risk_per_contract: Some(debit * CONTRACT_MULTIPLIER),
            region: None,
            structure_simplified: true,
            notes: vec![format!(
                "multi-expiration math approximated: front {} / back {} ({} DTE); POP not modeled",
                front.slice.expiration, back.slice.expiration, back.dte
            )],
        })
    }
}

/// Spot estimate from the strike where call and put mids are closest.
fn infer_spot(slice: &ExpirationSlice) -> Option<f64> {
    slice
        .of_type(OptionType::Call)
        .filter_map(|c| {
            let p = slice.find(OptionType::Put, c.strike)?;
            Some((c.strike, c.mid()?, p.mid()?))
        })
        .min_by(|a, b| (a.1 - a.2).abs().total_cmp(&(b.1 - b.2).abs()))
        .map(|(k, call, put)| k + call - put)
        .filter(|s| *s > 0.0)
}

fn nearest_to<'c>(contracts: impl Iterator<Item = &'c Contract>, level: f64, n: usize) -> Vec<Contract> {
    let mut all: Vec<&Contract> = contracts.collect();
    all.sort_by(|a, b| (a.strike - level).abs().total_cmp(&(b.strike - level).abs()));
    all.into_iter().take(n).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture_expirations, make_candidate, make_chain, make_slice, today};
    use common::ChainSnapshot;

    fn make_view(chain: &ChainSnapshot) -> ChainView<'_> {
        ChainView {
            underlying_price: chain.underlying_price,
            expirations: chain.expirations.iter().collect(),
        }
    }

    fn select(st: StrategyType, dte_min: i64, dte_max: i64) -> Selection {
        let chain = make_chain("AAPL", 100.0);
        let cfg = SelectionConfig::default();
        let selector = StrikeSelector::new(&cfg, false, today());
        selector.select(&make_candidate("AAPL", st, dte_min, dte_max), &make_view(&chain))
    }

    #[test]
    fn test_long_call_near_atm_in_window() {
        let sel = select(StrategyType::LongCall, 30, 45).unwrap();
        assert_eq!(sel.dte, 38);
        assert_eq!(sel.legs.len(), 1);
        let c = &sel.promoted.contract;
        assert_eq!(c.option_type, OptionType::Call);
        assert!((c.strike - 100.0).abs() <= 2.5, "strike {}", c.strike);
        assert_eq!(sel.risk_model, RiskModel::DebitMax);
        assert!(sel.probability_of_profit.unwrap() < 0.5, "long premium POP under half");
    }

    #[test]
    fn test_leap_call_goes_deeper_itm() {
        let short = select(StrategyType::LongCall, 30, 45).unwrap();
        let leap = select(StrategyType::LongCall, 380, 420).unwrap();
        assert_eq!(leap.dte, 400);
        let d = leap.promoted.contract.delta.unwrap();
        assert!(d >= 0.60, "LEAP delta {}", d);
        assert!(leap.promoted.contract.strike < short.promoted.contract.strike);
        assert!(leap.notes.iter().any(|n| n.contains("LEAP")));
    }

    #[test]
    fn test_credit_spread_promotes_short_strike() {
        let sel = select(StrategyType::BullPutSpread, 30, 45).unwrap();
        assert_eq!(sel.risk_model, RiskModel::CreditMax);
        let promoted = sel.promoted_leg().unwrap();
        assert!(promoted.is_short());
        let short_k = sel.legs[0].contract().unwrap().strike;
        let long_k = sel.legs[1].contract().unwrap().strike;
        assert!(long_k < short_k);
        assert!(sel.net_premium > 0.0);
        let width = short_k - long_k;
        let risk = sel.risk_per_contract.unwrap();
        assert!((risk - (width - sel.net_premium) * 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_debit_spread_promotes_long_strike() {
        let sel = select(StrategyType::BullCallSpread, 30, 45).unwrap();
        assert_eq!(sel.risk_model, RiskModel::DebitMax);
        assert!(!sel.promoted_leg().unwrap().is_short());
        assert!(sel.legs[1].contract().unwrap().strike > sel.legs[0].contract().unwrap().strike);
        assert!(sel.net_premium < 0.0);
    }

    #[test]
    fn test_straddle_shares_strike_and_promotes_higher_vega() {
        let sel = select(StrategyType::LongStraddle, 30, 45).unwrap();
        assert_eq!(sel.legs.len(), 2);
        let call = sel.legs[0].contract().unwrap();
        let put = sel.legs[1].contract().unwrap();
        assert_eq!(call.strike, put.strike);
        let vegas: Vec<f64> = sel.legs.iter().map(|l| l.greeks.unwrap().vega).collect();
        let promoted_vega = sel.promoted_leg().unwrap().greeks.unwrap().vega;
        assert!(vegas.iter().all(|v| promoted_vega >= *v));
    }

    #[test]
    fn test_strangle_legs_straddle_the_spot() {
        let sel = select(StrategyType::LongStrangle, 30, 45).unwrap();
        let call = sel.legs[0].contract().unwrap();
        let put = sel.legs[1].contract().unwrap();
        assert!(call.strike > 100.0 && put.strike < 100.0);
    }

    #[test]
    fn test_iron_condor_promotes_short_put() {
        let sel = select(StrategyType::IronCondor, 30, 45).unwrap();
        assert_eq!(sel.legs.len(), 4);
        let p = &sel.promoted.contract;
        assert_eq!(p.option_type, OptionType::Put);
        assert!(sel.promoted_leg().unwrap().is_short());
        let strikes: Vec<f64> = sel.legs.iter().map(|l| l.contract().unwrap().strike).collect();
        assert!(strikes.windows(2).all(|w| w[0] < w[1]), "{:?}", strikes);
        assert!(sel.probability_of_profit.unwrap() > 0.4);
    }

    #[test]
    fn test_buy_write_has_no_numeric_risk() {
        let sel = select(StrategyType::BuyWrite, 30, 45).unwrap();
        assert_eq!(sel.risk_model, RiskModel::StockDependent);
        assert!(sel.risk_per_contract.is_none());
        assert!(matches!(sel.legs[0].instrument, LegInstrument::Underlying { .. }));
        assert_eq!(sel.promoted.contract.option_type, OptionType::Call);
    }

    #[test]
    fn test_csp_short_put_is_otm() {
        let sel = select(StrategyType::CashSecuredPut, 30, 45).unwrap();
        let put = &sel.promoted.contract;
        assert!(put.strike <= 100.0);
        assert_eq!(sel.capital_required, Some(put.strike * 100.0));
        assert!(sel.probability_of_profit.unwrap() > 0.6);
    }

    #[test]
    fn test_calendar_unsupported_by_default() {
        let err = select(StrategyType::CalendarSpread, 30, 45).unwrap_err();
        assert_eq!(err.outcome, SelectionOutcome::UnsupportedStructure);
    }

    #[test]
    fn test_calendar_simplified_when_allowed() {
        let chain = make_chain("AAPL", 100.0);
        let cfg = SelectionConfig::default();
        let selector = StrikeSelector::new(&cfg, true, today());
        let sel = selector
            .select(
                &make_candidate("AAPL", StrategyType::CalendarSpread, 30, 45),
                &make_view(&chain),
            )
            .unwrap();
        assert!(sel.structure_simplified);
        assert_eq!(sel.legs.len(), 2);
        let front = sel.legs[0].contract().unwrap();
        let back = sel.legs[1].contract().unwrap();
        assert_eq!(front.strike, back.strike);
        assert!(back.expiration > front.expiration);
    }

    #[test]
    fn test_no_strikes_in_band_keeps_near_misses() {
        // Only deep ITM calls: every delta sits above the band.
        let exp = fixture_expirations()[1];
        let mut slice = make_slice(exp, 100.0, 0.30, 0.30);
        slice.contracts.retain(|c| c.option_type == OptionType::Call && c.strike <= 75.0);
        let chain = ChainSnapshot {
            ticker: "ITM".into(),
            fetched_at: chrono::Utc::now(),
            underlying_price: Some(100.0),
            expirations: vec![slice],
        };
        let cfg = SelectionConfig::default();
        let selector = StrikeSelector::new(&cfg, false, today());
        let err = selector
            .select(&make_candidate("ITM", StrategyType::LongCall, 30, 45), &make_view(&chain))
            .unwrap_err();
        assert_eq!(err.outcome, SelectionOutcome::NoOptimalStrikes);
        assert!(!err.near_misses.is_empty());
        assert!(err.near_misses.len() <= cfg.max_near_misses);
        // closest to the band first
        assert_eq!(err.near_misses[0].strike, 75.0);
    }

    #[test]
    fn test_empty_chain_is_chain_empty() {
        let chain = ChainSnapshot {
            ticker: "NIL".into(),
            fetched_at: chrono::Utc::now(),
            underlying_price: Some(50.0),
            expirations: vec![],
        };
        let cfg = SelectionConfig::default();
        let selector = StrikeSelector::new(&cfg, false, today());
        let err = selector
            .select(&make_candidate("NIL", StrategyType::LongPut, 30, 45), &make_view(&chain))
            .unwrap_err();
        assert_eq!(err.outcome, SelectionOutcome::ChainEmpty);
    }

    #[test]
    fn test_spot_inferred_when_unquoted() {
        let mut chain = make_chain("AAPL", 100.0);
        chain.underlying_price = None;
        let cfg = SelectionConfig::default();
        let selector = StrikeSelector::new(&cfg, false, today());
        let sel = selector
            .select(&make_candidate("AAPL", StrategyType::LongStraddle, 30, 45), &make_view(&chain))
            .unwrap();
        assert!((sel.legs[0].contract().unwrap().strike - 100.0).abs() < 1e-9);
        assert!(sel.notes.iter().any(|n| n.contains("parity")));
    }

    #[test]
    fn test_near_misses_sort_by_distance_with_bad_strikes_last() {
        let slice = make_slice(fixture_expirations()[1], 100.0, 0.30, 0.30);
        let mut calls: Vec<Contract> = slice.of_type(OptionType::Call).take(4).cloned().collect();
        calls[0].strike = f64::NAN;
        calls[1].strike = 110.0;
        calls[2].strike = 99.0;
        calls[3].strike = 102.5;

        let nearest = nearest_to(calls.iter(), 100.0, 4);
        let strikes: Vec<f64> = nearest.iter().map(|c| c.strike).collect();
        assert_eq!(&strikes[..3], &[99.0, 102.5, 110.0]);
        assert!(strikes[3].is_nan());
        assert_eq!(nearest_to(calls.iter(), 100.0, 2).len(), 2);
    }
}
