//! REST client for a Tradier-style market-data API.
//!
//! Covers: expiration listing, per-expiration chains with Greeks, and the
//! underlying quote. One `QuoteSource` call is one HTTP request; spacing
//! and retries belong to `RateLimitedFetcher`.

use async_trait::async_trait;
use chrono::NaiveDate;
use common::config::FetcherConfig;
use common::{Contract, Error, ExpirationSlice, OptionType, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::QuoteSource;

fn summarize_response_body(raw: &str) -> String {
    const MAX_CHARS: usize = 400;
    let compact = raw.replace(['\n', '\r'], " ");
    if compact.chars().count() > MAX_CHARS {
        let cut: String = compact.chars().take(MAX_CHARS).collect();
        format!("{}…", cut)
    } else {
        compact
    }
}

// ── Wire types ────────────────────────────────────────────────────────

/// The provider collapses single-element arrays into bare objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExpirationsResponse {
    expirations: Option<ExpirationDates>,
}

#[derive(Debug, Deserialize)]
struct ExpirationDates {
    date: Option<OneOrMany<NaiveDate>>,
}

#[derive(Debug, Deserialize)]
struct ChainResponse {
    options: Option<ChainOptions>,
}

#[derive(Debug, Deserialize)]
struct ChainOptions {
    option: Option<OneOrMany<WireOption>>,
}

#[derive(Debug, Deserialize)]
struct WireOption {
    strike: f64,
    option_type: String,
    expiration_date: NaiveDate,
    #[serde(default)]
    bid: Option<f64>,
    #[serde(default)]
    ask: Option<f64>,
    #[serde(default)]
    open_interest: Option<u64>,
    #[serde(default)]
    volume: Option<u64>,
    #[serde(default)]
    greeks: Option<WireGreeks>,
}

#[derive(Debug, Deserialize)]
struct WireGreeks {
    #[serde(default)]
    delta: Option<f64>,
    #[serde(default)]
    gamma: Option<f64>,
    #[serde(default)]
    vega: Option<f64>,
    #[serde(default)]
    theta: Option<f64>,
    #[serde(default)]
    mid_iv: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct QuotesResponse {
    quotes: Option<QuoteList>,
}

#[derive(Debug, Deserialize)]
struct QuoteList {
    quote: Option<OneOrMany<WireQuote>>,
}

#[derive(Debug, Deserialize)]
struct WireQuote {
    #[serde(default)]
    last: Option<f64>,
    #[serde(default)]
    bid: Option<f64>,
    #[serde(default)]
    ask: Option<f64>,
}

impl WireOption {
    fn into_contract(self) -> Option<Contract> {
        let option_type = match self.option_type.to_ascii_lowercase().as_str() {
            "call" => OptionType::Call,
            "put" => OptionType::Put,
            other => {
                debug!("Skipping option with unknown type '{}'", other);
                return None;
            }
        };
        // A zero quote on either side is the provider's "no market".
        let bid = self.bid.filter(|b| *b >= 0.0);
        let ask = self.ask.filter(|a| *a > 0.0);
        let g = self.greeks;
        Some(Contract {
            strike: self.strike,
            option_type,
            expiration: self.expiration_date,
            bid,
            ask,
            open_interest: self.open_interest.unwrap_or(0),
            volume: self.volume.unwrap_or(0),
            delta: g.as_ref().and_then(|g| g.delta),
            gamma: g.as_ref().and_then(|g| g.gamma),
            vega: g.as_ref().and_then(|g| g.vega),
            theta: g.as_ref().and_then(|g| g.theta),
            implied_vol: g.as_ref().and_then(|g| g.mid_iv).filter(|iv| *iv > 0.0),
        })
    }
}

impl WireQuote {
    fn reference_price(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) if b > 0.0 && a >= b => Some((a + b) / 2.0),
            _ => self.last.filter(|p| *p > 0.0),
        }
    }
}

// ── Client ────────────────────────────────────────────────────────────

/// Async REST client for the quoting provider.
#[derive(Debug, Clone)]
pub struct QuoteRestClient {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl QuoteRestClient {
    pub fn new(cfg: &FetcherConfig) -> Result<Self> {
        let base_url = cfg.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("fetcher.base_url is empty".into()));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "fetcher.base_url must be an http(s) URL, got '{}'",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(cfg.max_concurrent_calls.max(1))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_millis(cfg.call_timeout_ms))
            .build()
            .map_err(|e| Error::transport("building quote API client", &e))?;

        info!("Quote API base URL: {}", base_url);

        Ok(Self {
            client,
            base_url,
            api_token: cfg.api_token.clone(),
        })
    }

    /// URL helper.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let mut req = self
            .client
            .get(self.url(path))
            .header("Accept", "application/json")
            .query(query);
        if !self.api_token.is_empty() {
            req = req.bearer_auth(&self.api_token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::transport(&format!("GET {}", path), &e))?;

        let status_code = resp.status().as_u16();
        if status_code == 429 {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(Error::RateLimited { retry_after_ms });
        }
        if status_code != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::QuoteApi {
                status: status_code,
                message: summarize_response_body(&body),
            });
        }

        let text = resp
            .text()
            .await
            .map_err(|e| Error::transport(&format!("reading {} body", path), &e))?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl QuoteSource for QuoteRestClient {
    async fn list_expirations(&self, ticker: &str) -> Result<Vec<NaiveDate>> {
        let body: ExpirationsResponse = self
            .get_json("/markets/options/expirations", &[("symbol", ticker)])
            .await?;
        let mut dates = body
            .expirations
            .and_then(|e| e.date)
            .map(OneOrMany::into_vec)
            .unwrap_or_default();
        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    /// Mid when quoted on both sides, else last trade.
    async fn underlying_price(&self, ticker: &str) -> Result<Option<f64>> {
        let body: QuotesResponse = self
            .get_json("/markets/quotes", &[("symbols", ticker)])
            .await?;
        let quote = body
            .quotes
            .and_then(|q| q.quote)
            .and_then(|q| q.into_vec().into_iter().next());
        Ok(quote.and_then(|q| q.reference_price()))
    }

    async fn fetch_expiration(&self, ticker: &str, expiration: NaiveDate) -> Result<ExpirationSlice> {
        let exp = expiration.format("%Y-%m-%d").to_string();
        let body: ChainResponse = self
            .get_json(
                "/markets/options/chains",
                &[("symbol", ticker), ("expiration", &exp), ("greeks", "true")],
            )
            .await?;

        let contracts: Vec<Contract> = body
            .options
            .and_then(|o| o.option)
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .filter_map(WireOption::into_contract)
            .filter(|c| c.expiration == expiration)
            .collect();

        debug!(
            "Fetched {} contracts for {} {}",
            contracts.len(),
            ticker,
            expiration
        );

        Ok(ExpirationSlice {
            expiration,
            contracts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_expiration_collapses_to_object() {
        let raw = r#"{"expirations":{"date":"2026-11-20"}}"#;
        let body: ExpirationsResponse = serde_json::from_str(raw).unwrap();
        let dates = body.expirations.unwrap().date.unwrap().into_vec();
        assert_eq!(dates, vec![NaiveDate::from_ymd_opt(2026, 11, 20).unwrap()]);
    }

    #[test]
    fn test_null_options_means_empty_chain() {
        let raw = r#"{"options":null}"#;
        let body: ChainResponse = serde_json::from_str(raw).unwrap();
        assert!(body.options.is_none());
    }

    #[test]
    fn test_wire_option_maps_greeks_and_zero_quotes() {
        let raw = r#"{
            "strike": 150.0,
            "option_type": "put",
            "expiration_date": "2026-11-20",
            "bid": 0.0,
            "ask": 0.0,
            "open_interest": 1200,
            "volume": 30,
            "greeks": {"delta": -0.42, "gamma": 0.031, "vega": 0.18, "theta": -0.05, "mid_iv": 0.29}
        }"#;
        let opt: WireOption = serde_json::from_str(raw).unwrap();
        let c = opt.into_contract().unwrap();
        assert_eq!(c.option_type, OptionType::Put);
        assert_eq!(c.bid, Some(0.0));
        assert_eq!(c.ask, None, "zero ask is no market");
        assert!(!c.is_quoted());
        assert_eq!(c.delta, Some(-0.42));
        assert_eq!(c.implied_vol, Some(0.29));
        assert_eq!(c.open_interest, 1200);
    }

    #[test]
    fn test_reference_price_prefers_mid() {
        let q = WireQuote {
            last: Some(101.0),
            bid: Some(99.0),
            ask: Some(100.0),
        };
        assert_eq!(q.reference_price(), Some(99.5));
        let q = WireQuote {
            last: Some(101.0),
            bid: None,
            ask: None,
        };
        assert_eq!(q.reference_price(), Some(101.0));
    }

    #[test]
    fn test_empty_base_url_is_config_error() {
        let cfg = FetcherConfig {
            base_url: "  ".into(),
            ..Default::default()
        };
        assert!(matches!(QuoteRestClient::new(&cfg), Err(Error::Config(_))));
    }

    #[test]
    fn test_base_url_needs_scheme_and_loses_trailing_slash() {
        let cfg = FetcherConfig {
            base_url: "api.example.com/v1".into(),
            ..Default::default()
        };
        assert!(matches!(QuoteRestClient::new(&cfg), Err(Error::Config(_))));

        let cfg = FetcherConfig {
            base_url: " https://api.example.com/v1/ ".into(),
            ..Default::default()
        };
        let client = QuoteRestClient::new(&cfg).unwrap();
        assert_eq!(client.url("/markets/quotes"), "https://api.example.com/v1/markets/quotes");
    }

    #[test]
    fn test_summarize_truncates_long_bodies() {
        let long = "x".repeat(1000);
        let s = summarize_response_body(&long);
        assert!(s.chars().count() <= 401);
        assert!(s.ends_with('…'));
    }
}
