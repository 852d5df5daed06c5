//! Dhan v2 option-chain client
//!
//! Two POST endpoints are used: `optionchain/expirylist` to discover the
//! nearest expiry and `optionchain` for the strike ladder. Both take the
//! underlying scrip id and segment in the JSON body and authenticate with
//! `client-id` / `access-token` headers.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::refresh::{OptionChainProvider, ProviderQuote};
use super::FeedError;
use crate::config::Config;
use crate::core::levels::{self, StrikeRow};
use crate::core::session;

pub struct DhanClient {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    access_token: String,
    max_attempts: u32,
}

#[derive(Debug, Deserialize)]
struct ExpiryListResponse {
    #[serde(default)]
    data: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OptionChainResponse {
    #[serde(default)]
    data: ChainPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChainPayload {
    #[serde(default, alias = "lastPrice")]
    pub last_price: f64,
    #[serde(default)]
    pub oc: HashMap<String, StrikeNode>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StrikeNode {
    #[serde(default)]
    pub ce: Option<LegNode>,
    #[serde(default)]
    pub pe: Option<LegNode>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LegNode {
    #[serde(default)]
    pub oi: f64,
    #[serde(default)]
    pub previous_oi: f64,
}

impl ChainPayload {
    /// Strike rows; keys that are not numbers are skipped.
    pub fn strike_rows(&self) -> Vec<StrikeRow> {
        self.oc
            .iter()
            .filter_map(|(key, node)| {
                let strike: f64 = key.trim().parse().ok()?;
                let ce = node.ce.as_ref();
                let pe = node.pe.as_ref();
                Some(StrikeRow {
                    strike,
                    ce_oi: ce.map_or(0.0, |l| l.oi),
                    ce_prev_oi: ce.map_or(0.0, |l| l.previous_oi),
                    pe_oi: pe.map_or(0.0, |l| l.oi),
                    pe_prev_oi: pe.map_or(0.0, |l| l.previous_oi),
                })
            })
            .collect()
    }
}

/// Exponential backoff clamped to 1..=10 seconds plus up to 250ms jitter.
pub fn backoff_delay(attempt: u32) -> Duration {
    let base = 2u64.saturating_pow(attempt.saturating_sub(1)).clamp(1, 10);
    let jitter = rand::thread_rng().gen_range(0..250);
    Duration::from_secs(base) + Duration::from_millis(jitter)
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

impl DhanClient {
    pub fn new(
        base_url: &str,
        client_id: &str,
        access_token: &str,
        timeout_secs: u64,
        max_attempts: u32,
    ) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            access_token: access_token.to_string(),
            max_attempts: max_attempts.max(1),
        })
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &serde_json::Value) -> Result<T, FeedError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.post_once(&url, body).await {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = backoff_delay(attempt);
                    warn!("Dhan {} attempt {}/{} failed: {} (retry in {:?})", path, attempt, self.max_attempts, e, delay);
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn post_once<T: DeserializeOwned>(&self, url: &str, body: &serde_json::Value) -> Result<T, FeedError> {
        let resp = self
            .client
            .post(url)
            .header("accept", "application/json")
            .header("client-id", &self.client_id)
            .header("access-token", &self.access_token)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(FeedError::RateLimited);
        }
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(FeedError::Http { status: status.as_u16(), body: truncate(&text, 200) });
        }
        serde_json::from_str(&text).map_err(|e| FeedError::Decode(format!("{}: {}", e, truncate(&text, 200))))
    }

    pub async fn expiry_list(&self, scrip: u32, seg: &str) -> Result<Vec<String>, FeedError> {
        let body = json!({ "UnderlyingScrip": scrip, "UnderlyingSeg": seg });
        let resp: ExpiryListResponse = self.post("optionchain/expirylist", &body).await?;
        Ok(resp.data)
    }

    pub async fn option_chain(&self, scrip: u32, seg: &str, expiry: &str) -> Result<ChainPayload, FeedError> {
        let body = json!({ "UnderlyingScrip": scrip, "UnderlyingSeg": seg, "Expiry": expiry });
        let resp: OptionChainResponse = self.post("optionchain", &body).await?;
        Ok(resp.data)
    }
}

/// Nearest expiry on or after `today`, else the first listed.
pub fn pick_expiry(expiries: &[String], today: NaiveDate) -> Option<String> {
    let mut dated: Vec<(NaiveDate, &String)> = expiries
        .iter()
        .filter_map(|e| NaiveDate::parse_from_str(e.trim(), "%Y-%m-%d").ok().map(|d| (d, e)))
        .collect();
    dated.sort_by_key(|(d, _)| *d);
    dated
        .iter()
        .find(|(d, _)| *d >= today)
        .map(|(_, e)| e.trim().to_string())
        .or_else(|| expiries.first().map(|e| e.trim().to_string()))
}

pub struct DhanProvider {
    client: DhanClient,
    scrip: u32,
    seg: String,
    expiry_override: Option<String>,
}

impl DhanProvider {
    pub fn new(cfg: &Config) -> Result<Self, FeedError> {
        if cfg.dhan.client_id.is_empty() {
            return Err(FeedError::Credentials("DHAN_CLIENT_ID"));
        }
        if cfg.dhan.access_token.is_empty() {
            return Err(FeedError::Credentials("DHAN_ACCESS_TOKEN"));
        }
        let client = DhanClient::new(
            &cfg.dhan.base_url,
            &cfg.dhan.client_id,
            &cfg.dhan.access_token,
            cfg.dhan.http_timeout_secs,
            cfg.dhan.max_retries,
        )?;
        Ok(Self {
            client,
            scrip: cfg.dhan.scrip_for(&cfg.oc.symbol),
            seg: cfg.dhan.underlying_seg.clone(),
            expiry_override: cfg.oc.expiry.clone(),
        })
    }
}

#[async_trait]
impl OptionChainProvider for DhanProvider {
    fn name(&self) -> &str {
        "dhan"
    }

    async fn fetch(&self, symbol: &str) -> Result<ProviderQuote, FeedError> {
        let expiry = match &self.expiry_override {
            Some(e) => e.clone(),
            None => {
                let list = self.client.expiry_list(self.scrip, &self.seg).await?;
                pick_expiry(&list, session::ist_date(Utc::now())).ok_or(FeedError::NoExpiry)?
            }
        };

        let payload = self.client.option_chain(self.scrip, &self.seg, &expiry).await?;
        let rows = payload.strike_rows();
        debug!("Dhan chain {} {}: spot={} strikes={}", symbol, expiry, payload.last_price, rows.len());
        if payload.last_price <= 0.0 || rows.is_empty() {
            return Err(FeedError::Decode("empty option chain".to_string()));
        }

        Ok(ProviderQuote {
            symbol: symbol.to_ascii_uppercase(),
            expiry,
            stats: levels::analyze(payload.last_price, &rows),
            fetched_at: Utc::now(),
        })
    }
}
