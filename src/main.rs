//! options-explorer: batch option-chain exploration and theory validation.
//!
//! Single-binary Tokio application that:
//! 1. Ingests upstream strategy candidates (fatal on contract violations)
//! 2. Samples one expiration per candidate, then explores full chains
//! 3. Selects strikes, grades liquidity and computes PCS
//! 4. Validates each record against its strategy family's rules
//! 5. Writes one JSON line per candidate, in input order

mod config;

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use tracing::{error, info, warn};

use chain_client::{QuoteRestClient, QuoteSource, RateLimitedFetcher, StaticQuoteSource};
use common::config::{EngineConfig, ScoringMode};
use common::{CandidateRecord, Error, RawCandidate};
use explorer::{ChainCache, PipelineOrchestrator, RunSummary};

/// Options contract explorer
#[derive(Parser)]
#[command(
    name = "options-explorer",
    about = "Explore option chains for strategy candidates and validate them"
)]
struct Cli {
    /// JSON array of candidates from the upstream screener.
    #[arg(long)]
    candidates: PathBuf,

    /// Write JSON lines here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Serve chains from a JSON snapshot file instead of the quoting API.
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Config file (defaults to ./config.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tighten liquidity thresholds before scoring.
    #[arg(long)]
    strict: bool,

    /// Build calendar/diagonal structures as simplified single-expiry trades.
    #[arg(long)]
    allow_multi_expiry: bool,

    /// Ignore cached chains (fresh fetches are still cached).
    #[arg(long)]
    force_refresh: bool,
}

fn apply_cli_overrides(cfg: &mut EngineConfig, cli: &Cli) {
    if cli.strict {
        cfg.scoring.mode = ScoringMode::Strict;
    }
    if cli.allow_multi_expiry {
        cfg.pipeline.allow_multi_expiry = true;
    }
    if cli.force_refresh {
        cfg.pipeline.force_refresh = true;
    }
}

fn read_candidates(path: &Path) -> Result<Vec<RawCandidate>, Error> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn build_source(cli: &Cli, cfg: &EngineConfig) -> Result<Arc<dyn QuoteSource>, Error> {
    match &cli.replay {
        Some(path) => {
            info!("Replaying chains from {}", path.display());
            Ok(Arc::new(StaticQuoteSource::from_file(path)?))
        }
        None => {
            if cfg.fetcher.api_token.trim().is_empty() {
                warn!("QUOTE_API_TOKEN is not set; calling the quoting API unauthenticated");
            }
            Ok(Arc::new(QuoteRestClient::new(&cfg.fetcher)?))
        }
    }
}

fn write_records(records: &[CandidateRecord], output: Option<&Path>) -> Result<(), Error> {
    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    for record in records {
        let line = serde_json::to_string(record)?;
        writeln!(out, "{}", line)?;
    }
    out.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "options_explorer=info,explorer=info,theory=info,chain_client=info".into()
            }),
        )
        .with_writer(io::stderr)
        .with_target(true)
        .init();

    let cli = Cli::parse();

    info!("Options explorer starting up...");

    // Load configuration.
    let mut cfg = match config::load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    apply_cli_overrides(&mut cfg, &cli);

    info!(
        "Pipeline: workers={}, candidate_timeout={}ms, multi_expiry={}, force_refresh={}",
        cfg.pipeline.workers,
        cfg.pipeline.candidate_timeout_ms,
        cfg.pipeline.allow_multi_expiry,
        cfg.pipeline.force_refresh,
    );
    info!(
        "Fetcher: max_concurrent={}, min_interval={}ms, timeout={}ms",
        cfg.fetcher.max_concurrent_calls,
        cfg.fetcher.min_call_interval_ms,
        cfg.fetcher.call_timeout_ms,
    );
    info!(
        "Cache: capacity={}, max_age={}s, persist_dir={}",
        cfg.cache.memory_capacity,
        cfg.cache.max_age_secs,
        cfg.cache.persist_dir.as_deref().unwrap_or("<memory only>"),
    );
    info!("Scoring mode: {:?}", cfg.scoring.mode);

    let raw = match read_candidates(&cli.candidates) {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to read {}: {}", cli.candidates.display(), e);
            std::process::exit(1);
        }
    };
    let candidates = match common::ingest(raw) {
        Ok(c) => c,
        Err(e) => {
            error!("Rejected candidate batch: {}", e);
            std::process::exit(1);
        }
    };
    info!("Ingested {} candidates", candidates.len());

    let source = match build_source(&cli, &cfg) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to initialize quote source: {}", e);
            std::process::exit(1);
        }
    };

    let fetcher = RateLimitedFetcher::new(source, &cfg.fetcher);
    let cache = Arc::new(ChainCache::new(&cfg.cache));
    let orchestrator = PipelineOrchestrator::new(fetcher, cache, Arc::new(cfg));

    let records = orchestrator.run(candidates).await;

    if let Err(e) = write_records(&records, cli.output.as_deref()) {
        error!("Failed to write records: {}", e);
        std::process::exit(1);
    }
    if let Some(path) = &cli.output {
        info!("Wrote {} records to {}", records.len(), path.display());
    }

    let summary = RunSummary::from_records(&records);
    info!("Run complete: {}", summary);

    let stats = orchestrator.cache().stats();
    info!(
        "Cache: {} hits, {} misses ({:.0}% hit rate), {} entries",
        stats.hits,
        stats.misses,
        stats.hit_rate * 100.0,
        stats.entry_count
    );
    let fetcher_stats = orchestrator.fetcher().stats();
    let (calls, retries, timeouts, failures) = fetcher_stats.snapshot();
    info!(
        "Fetcher: {} calls ({} full chains), {} retries, {} timeouts, {} failures",
        calls,
        fetcher_stats.full_chain_fetches(),
        retries,
        timeouts,
        failures
    );
}
