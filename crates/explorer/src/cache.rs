//! Two-tier option-chain cache.
//!
//! Memory tier: `DashMap` keyed by ticker, bounded, least-recently-used
//! entry evicted on overflow. Persisted tier: one JSON blob per
//! `(ticker, fetch date)` under a directory. Both tiers honor the same
//! max age. Fetches for one ticker are single-flighted; different
//! tickers never contend.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use common::config::CacheConfig;
use common::{ChainSnapshot, Result};
use dashmap::DashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A cached snapshot with its last-access tick.
#[derive(Debug)]
struct CacheEntry {
    snapshot: Arc<ChainSnapshot>,
    last_access: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entry_count: usize,
}

#[derive(Debug)]
pub struct ChainCache {
    memory: DashMap<String, CacheEntry>,
    inflight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    capacity: usize,
    max_age: ChronoDuration,
    persist_dir: Option<PathBuf>,
    tick: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

fn cache_key(ticker: &str) -> String {
    ticker.trim().to_ascii_uppercase()
}

impl ChainCache {
    pub fn new(cfg: &CacheConfig) -> Self {
        let persist_dir = cfg.persist_dir.as_ref().map(PathBuf::from);
        if let Some(dir) = &persist_dir {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!("Chain cache dir {} unusable, memory tier only: {}", dir.display(), e);
            }
        }
        Self {
            memory: DashMap::new(),
            inflight: DashMap::new(),
            capacity: cfg.memory_capacity.max(1),
            max_age: ChronoDuration::seconds(cfg.max_age_secs as i64),
            persist_dir,
            tick: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fresh snapshot for `ticker`, promoting a persisted hit into memory.
    pub fn get(&self, ticker: &str) -> Option<Arc<ChainSnapshot>> {
        let found = self.lookup(&cache_key(ticker));
        self.record(found.is_some());
        found
    }

    /// Store a snapshot in both tiers. Returns the shared handle.
    pub fn set(&self, ticker: &str, snapshot: ChainSnapshot) -> Arc<ChainSnapshot> {
        let key = cache_key(ticker);
        if let Err(e) = self.persist(&key, &snapshot) {
            warn!("{}: failed to persist chain snapshot: {}", key, e);
        }
        let snapshot = Arc::new(snapshot);
        self.insert_memory(key, snapshot.clone());
        snapshot
    }

    /// Drop `ticker` from both tiers.
    pub fn invalidate(&self, ticker: &str) {
        let key = cache_key(ticker);
        self.memory.remove(&key);
        self.inflight.remove_if(&key, |_, gate| Arc::strong_count(gate) == 1);
        if let Some(dir) = &self.persist_dir {
            let prefix = format!("{}_", key);
            if let Ok(entries) = std::fs::read_dir(dir) {
                for entry in entries.flatten() {
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    if name.starts_with(&prefix) && name.ends_with(".json") {
                        if let Err(e) = std::fs::remove_file(entry.path()) {
                            warn!("{}: failed to remove {}: {}", key, name, e);
                        }
                    }
                }
            }
        }
        debug!("{}: cache invalidated", key);
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            entry_count: self.memory.len(),
        }
    }

    /// Return the cached snapshot or run `fetch` exactly once per ticker.
    ///
    /// Concurrent callers for the same ticker wait on the first caller and
    /// reuse its result. A failed fetch is not cached; the next waiter
    /// fetches for itself. With `force_refresh` the first read is skipped,
    /// but a snapshot published by a sibling while waiting is still reused.
    ///
    /// The returned flag is true when no fetch was needed.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        ticker: &str,
        force_refresh: bool,
        fetch: F,
    ) -> Result<(Arc<ChainSnapshot>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ChainSnapshot>>,
    {
        let key = cache_key(ticker);
        let requested_at = Utc::now();

        if !force_refresh {
            if let Some(snap) = self.lookup(&key) {
                self.record(true);
                return Ok((snap, true));
            }
        }

        let gate = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = gate.lock().await;
        let outcome = self.fetch_gated(&key, force_refresh, requested_at, fetch).await;
        // Held by the map and this caller only: nobody is queued behind us.
        self.inflight.remove_if(&key, |_, g| Arc::strong_count(g) == 2);
        outcome
    }

    async fn fetch_gated<F, Fut>(
        &self,
        key: &str,
        force_refresh: bool,
        requested_at: DateTime<Utc>,
        fetch: F,
    ) -> Result<(Arc<ChainSnapshot>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ChainSnapshot>>,
    {
        if let Some(snap) = self.lookup(key) {
            if !force_refresh || snap.fetched_at >= requested_at {
                debug!("{}: served by concurrent fetch", key);
                self.record(true);
                return Ok((snap, true));
            }
        }

        self.record(false);
        let snapshot = fetch().await?;
        info!(
            "{}: cached full chain ({} expirations, {} contracts)",
            key,
            snapshot.expirations.len(),
            snapshot.contract_count()
        );
        Ok((self.set(key, snapshot), false))
    }

    // ── Internals ─────────────────────────────────────────────────────

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn is_stale(&self, fetched_at: DateTime<Utc>) -> bool {
        Utc::now() - fetched_at > self.max_age
    }

    fn lookup(&self, key: &str) -> Option<Arc<ChainSnapshot>> {
        let mut stale = false;
        if let Some(entry) = self.memory.get(key) {
            if self.is_stale(entry.snapshot.fetched_at) {
                stale = true;
            } else {
                entry.last_access.store(self.next_tick(), Ordering::Relaxed);
                return Some(entry.snapshot.clone());
            }
        }
        if stale {
            debug!("{}: memory entry expired", key);
            self.memory.remove(key);
        }

        let snapshot = self.load_persisted(key)?;
        let snapshot = Arc::new(snapshot);
        debug!("{}: promoted persisted snapshot to memory", key);
        self.insert_memory(key.to_string(), snapshot.clone());
        Some(snapshot)
    }

    fn insert_memory(&self, key: String, snapshot: Arc<ChainSnapshot>) {
        self.memory.insert(
            key,
            CacheEntry {
                snapshot,
                last_access: AtomicU64::new(self.next_tick()),
            },
        );
        while self.memory.len() > self.capacity {
            let oldest = self
                .memory
                .iter()
                .min_by_key(|e| e.value().last_access.load(Ordering::Relaxed))
                .map(|e| e.key().clone());
            match oldest {
                Some(k) => {
                    debug!("{}: evicted from memory tier", k);
                    self.memory.remove(&k);
                }
                None => break,
            }
        }
    }

    fn blob_path(dir: &Path, key: &str, date: NaiveDate) -> PathBuf {
        dir.join(format!("{}_{}.json", key, date.format("%Y-%m-%d")))
    }

    fn persist(&self, key: &str, snapshot: &ChainSnapshot) -> Result<()> {
        let Some(dir) = &self.persist_dir else {
            return Ok(());
        };
        let path = Self::blob_path(dir, key, snapshot.fetched_at.date_naive());
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(snapshot)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load_persisted(&self, key: &str) -> Option<ChainSnapshot> {
        let dir = self.persist_dir.as_ref()?;
        let today = Utc::now().date_naive();
        let span_days = self.max_age.num_days().max(0) + 1;

        for back in 0..=span_days {
            let date = today - ChronoDuration::days(back);
            let path = Self::blob_path(dir, key, date);
            if !path.exists() {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str::<ChainSnapshot>(&raw).map_err(|e| e.to_string()));
            match parsed {
                Ok(snap) if !self.is_stale(snap.fetched_at) => return Some(snap),
                Ok(_) => {
                    debug!("{}: removing expired blob {}", key, path.display());
                    if let Err(e) = std::fs::remove_file(&path) {
                        warn!("{}: failed to remove {}: {}", key, path.display(), e);
                    }
                }
                Err(e) => {
                    warn!("{}: unreadable cache blob {}: {}", key, path.display(), e);
                    if let Err(e) = std::fs::remove_file(&path) {
                        warn!("{}: failed to remove {}: {}", key, path.display(), e);
                    }
                }
            }
        }
        None
    }
}
