//! Configuration loader — merges env vars, .env file, and config.toml.

use common::config::{EngineConfig, ScoringMode};
use common::Error;
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn parse_positive_usize(raw: &str, env_name: &str) -> Result<usize, Error> {
    let parsed = raw
        .trim()
        .parse::<usize>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed == 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn parse_non_negative_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer >= 0")))
}

fn parse_bool(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    lowered != "0" && lowered != "false" && lowered != "no" && lowered != "off"
}

fn in_unit_interval(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

fn validate_config(config: &EngineConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.fetcher.base_url.trim().is_empty() {
        issues.push("fetcher.base_url must not be empty".into());
    }
    if config.fetcher.max_concurrent_calls == 0 {
        issues.push("fetcher.max_concurrent_calls must be > 0".into());
    }
    if config.fetcher.call_timeout_ms == 0 {
        issues.push("fetcher.call_timeout_ms must be > 0".into());
    }

    if config.cache.memory_capacity == 0 {
        issues.push("cache.memory_capacity must be > 0".into());
    }
    if config.cache.max_age_secs == 0 {
        issues.push("cache.max_age_secs must be > 0".into());
    }
    if let Some(dir) = &config.cache.persist_dir {
        if dir.trim().is_empty() {
            issues.push("cache.persist_dir must not be empty when set".into());
        }
    }

    if config.pipeline.workers == 0 {
        issues.push("pipeline.workers must be > 0".into());
    }
    if config.pipeline.candidate_timeout_ms == 0 {
        issues.push("pipeline.candidate_timeout_ms must be > 0".into());
    }

    if config.sampling.atm_band_pct <= 0.0 {
        issues.push("sampling.atm_band_pct must be > 0".into());
    }
    if config.sampling.loose_spread_multiple < 1.0 {
        issues.push("sampling.loose_spread_multiple must be >= 1".into());
    }

    let sel = &config.selection;
    if !in_unit_interval(sel.min_delta) || !in_unit_interval(sel.max_delta) {
        issues.push("selection.min_delta and selection.max_delta must be in [0,1]".into());
    }
    if sel.min_delta >= sel.max_delta {
        issues.push("selection.min_delta must be < selection.max_delta".into());
    }
    for (name, delta) in [
        ("directional_target_delta", sel.directional_target_delta),
        ("leap_min_delta", sel.leap_min_delta),
        ("leap_target_delta", sel.leap_target_delta),
        ("short_option_delta", sel.short_option_delta),
        ("debit_long_delta", sel.debit_long_delta),
        ("debit_short_delta", sel.debit_short_delta),
        ("credit_short_delta", sel.credit_short_delta),
        ("credit_long_delta", sel.credit_long_delta),
        ("condor_short_delta", sel.condor_short_delta),
        ("condor_long_delta", sel.condor_long_delta),
    ] {
        if !in_unit_interval(delta) {
            issues.push(format!("selection.{name} must be in [0,1]"));
        }
    }
    if sel.leap_target_delta < sel.leap_min_delta {
        issues.push("selection.leap_target_delta must be >= selection.leap_min_delta".into());
    }
    if sel.debit_short_delta >= sel.debit_long_delta {
        issues.push("selection.debit_short_delta must be < selection.debit_long_delta".into());
    }
    if sel.credit_long_delta >= sel.credit_short_delta {
        issues.push("selection.credit_long_delta must be < selection.credit_short_delta".into());
    }
    if sel.condor_long_delta >= sel.condor_short_delta {
        issues.push("selection.condor_long_delta must be < selection.condor_short_delta".into());
    }
    if sel.strangle_otm_pct <= 0.0 || sel.strangle_otm_pct >= 1.0 {
        issues.push("selection.strangle_otm_pct must be in (0,1)".into());
    }

    let liq = &config.liquidity;
    if liq.price_tiers.is_empty() {
        issues.push("liquidity.price_tiers must contain at least one tier".into());
    } else if !liq.price_tiers.iter().any(|t| t.min_price <= 0.0) {
        issues.push("liquidity.price_tiers must include a tier with min_price 0".into());
    }
    if liq
        .price_tiers
        .iter()
        .any(|t| t.max_spread_pct <= 0.0 || t.min_price < 0.0)
    {
        issues.push("liquidity.price_tiers need min_price >= 0 and max_spread_pct > 0".into());
    }
    if liq.medium_min_dte >= liq.leap_min_dte {
        issues.push("liquidity.medium_min_dte must be < liquidity.leap_min_dte".into());
    }

    let sc = &config.scoring;
    for (name, weight) in [
        ("liquidity_weight", sc.liquidity_weight),
        ("dte_weight", sc.dte_weight),
        ("risk_weight", sc.risk_weight),
        ("strategy_weight", sc.strategy_weight),
    ] {
        if weight < 0.0 {
            issues.push(format!("scoring.{name} must be >= 0"));
        }
    }
    let weight_sum = sc.liquidity_weight + sc.dte_weight + sc.risk_weight + sc.strategy_weight;
    if (weight_sum - 1.0).abs() > 1e-6 {
        issues.push(format!("scoring weights must sum to 1 (got {weight_sum:.3})"));
    }
    if sc.dte_cap <= sc.min_dte_floor {
        issues.push("scoring.dte_cap must be > scoring.min_dte_floor".into());
    }
    if sc.strict_oi_multiplier < 1.0 {
        issues.push("scoring.strict_oi_multiplier must be >= 1".into());
    }
    if sc.strict_spread_multiplier <= 0.0 || sc.strict_spread_multiplier > 1.0 {
        issues.push("scoring.strict_spread_multiplier must be in (0,1]".into());
    }

    let th = &config.theory;
    if th.max_put_call_skew <= 0.0 {
        issues.push("theory.max_put_call_skew must be > 0".into());
    }
    if th.max_rv_iv_ratio <= 0.0 {
        issues.push("theory.max_rv_iv_ratio must be > 0".into());
    }
    if !in_unit_interval(th.min_probability_of_profit) {
        issues.push("theory.min_probability_of_profit must be in [0,1]".into());
    }
    if th.watch_score > th.valid_score {
        issues.push("theory.watch_score must be <= theory.valid_score".into());
    }
    if !(0.0..=100.0).contains(&th.base_score) {
        issues.push("theory.base_score must be in [0,100]".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Apply environment overrides. `lookup` stands in for `std::env::var`.
fn apply_env_overrides<F>(config: &mut EngineConfig, lookup: F) -> Result<(), Error>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("QUOTE_API_BASE_URL") {
        config.fetcher.base_url = url;
    }
    if let Some(token) = lookup("QUOTE_API_TOKEN") {
        config.fetcher.api_token = token;
    }
    if let Some(raw) = lookup("EXPLORER_WORKERS") {
        config.pipeline.workers = parse_positive_usize(&raw, "EXPLORER_WORKERS")?;
    }
    if let Some(raw) = lookup("EXPLORER_MAX_CONCURRENT_CALLS") {
        config.fetcher.max_concurrent_calls =
            parse_positive_usize(&raw, "EXPLORER_MAX_CONCURRENT_CALLS")?;
    }
    if let Some(raw) = lookup("EXPLORER_MIN_CALL_INTERVAL_MS") {
        config.fetcher.min_call_interval_ms =
            parse_non_negative_u64(&raw, "EXPLORER_MIN_CALL_INTERVAL_MS")?;
    }
    if let Some(raw) = lookup("EXPLORER_CALL_TIMEOUT_MS") {
        config.fetcher.call_timeout_ms = parse_non_negative_u64(&raw, "EXPLORER_CALL_TIMEOUT_MS")?;
    }
    if let Some(dir) = lookup("EXPLORER_CACHE_DIR") {
        // Empty value turns the persisted tier off.
        config.cache.persist_dir = if dir.trim().is_empty() {
            None
        } else {
            Some(dir)
        };
    }
    if let Some(raw) = lookup("EXPLORER_CACHE_MAX_AGE_SECS") {
        config.cache.max_age_secs = parse_non_negative_u64(&raw, "EXPLORER_CACHE_MAX_AGE_SECS")?;
    }
    if let Some(raw) = lookup("EXPLORER_STRICT_MODE") {
        config.scoring.mode = if parse_bool(&raw) {
            ScoringMode::Strict
        } else {
            ScoringMode::Standard
        };
    }
    if let Some(raw) = lookup("EXPLORER_ALLOW_MULTI_EXPIRY") {
        config.pipeline.allow_multi_expiry = parse_bool(&raw);
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<EngineConfig, Error> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Load engine configuration from environment and an optional config file.
///
/// An explicit `path` must exist; otherwise `config.toml` in the working
/// directory is used when present.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Defaults, overlaid by the config file if there is one.
    let mut config = match path {
        Some(p) => read_config_file(p)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                read_config_file(default_path)?
            } else {
                EngineConfig::default()
            }
        }
    };

    // 3. Environment variables win.
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    validate_config(&config)?;
    Ok(config)
}
