//! Stock price series with a backend cache
//!
//! Daily close series come from a Yahoo-chart-style endpoint and are cached
//! under `stock:{TICKER}`. Configured tickers are prefetched at session
//! start by a background workflow with bounded parallelism.

use anyhow::{Context, Result};
use futures_util::{StreamExt, stream::FuturesUnordered};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::backend::Backend;
use crate::config::StocksConfig;

const PREFETCH_MAX_CONCURRENCY: usize = 4;

fn stock_key(ticker: &str) -> String {
    format!("stock:{}", ticker)
}

/// One daily close observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockPoint {
    pub date: String,
    pub close: f64,
}

/// A ticker's daily close history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockSeries {
    pub ticker: String,
    pub points: Vec<StockPoint>,
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    result: Vec<ChartResult>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    close: Vec<Option<f64>>,
}

/// Fetch-and-cache client for daily stock series
#[derive(Clone)]
pub struct StockService {
    backend: Arc<dyn Backend>,
    client: reqwest::Client,
    config: StocksConfig,
}

impl StockService {
    pub fn new(backend: Arc<dyn Backend>, config: StocksConfig) -> Self {
        Self {
            backend,
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Configured tickers, for user-facing suggestions
    pub fn tickers(&self) -> &[String] {
        &self.config.tickers
    }

    /// Get a ticker's series, serving from cache when possible
    pub async fn series(&self, ticker: &str) -> Result<StockSeries> {
        let ticker = ticker.to_uppercase();

        if let Some(raw) = self.backend.kv_get(&stock_key(&ticker)).await? {
            match serde_json::from_str::<StockSeries>(&raw) {
                Ok(series) => return Ok(series),
                Err(e) => warn!("Malformed cached series for {}: {}", ticker, e),
            }
        }

        let series = self.fetch(&ticker).await?;
        self.backend
            .kv_set(&stock_key(&ticker), &serde_json::to_string(&series)?)
            .await?;
        Ok(series)
    }

    async fn fetch(&self, ticker: &str) -> Result<StockSeries> {
        let url = format!("{}/{}", self.config.api_url.trim_end_matches('/'), ticker);
        let response: ChartResponse = self
            .client
            .get(&url)
            .query(&[("range", self.config.range.as_str()), ("interval", "1d")])
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("stock request failed")?
            .error_for_status()
            .context("stock provider returned an error")?
            .json()
            .await
            .context("failed to parse stock response")?;

        let result = response
            .chart
            .result
            .into_iter()
            .next()
            .with_context(|| format!("empty chart result for {}", ticker))?;
        let closes = result
            .indicators
            .quote
            .into_iter()
            .next()
            .with_context(|| format!("missing quote data for {}", ticker))?
            .close;

        let points: Vec<StockPoint> = result
            .timestamp
            .iter()
            .zip(closes)
            .filter_map(|(ts, close)| {
                let close = close?;
                let date = chrono::DateTime::from_timestamp(*ts, 0)?
                    .date_naive()
                    .format("%Y-%m-%d")
                    .to_string();
                Some(StockPoint { date, close })
            })
            .collect();

        if points.is_empty() {
            anyhow::bail!("no data points for {}", ticker);
        }

        Ok(StockSeries {
            ticker: ticker.to_string(),
            points,
        })
    }

    /// Spawn the background prefetch workflow for configured tickers
    pub fn spawn_prefetch(&self) {
        let tickers = self.config.tickers.clone();
        if tickers.is_empty() {
            return;
        }

        info!(
            "Scheduling background stock prefetch for {} tickers",
            tickers.len()
        );

        let service = self.clone();
        tokio::spawn(async move {
            Self::run_prefetch(service, tickers).await;
        });
    }

    async fn run_prefetch(service: StockService, tickers: Vec<String>) {
        let concurrency = PREFETCH_MAX_CONCURRENCY.min(tickers.len().max(1));
        let semaphore = Arc::new(Semaphore::new(concurrency));

        let mut tasks = FuturesUnordered::new();

        for ticker in tickers {
            let service = service.clone();
            let semaphore = semaphore.clone();

            tasks.push(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!("Prefetch permit acquisition failed for {}: {}", ticker, e);
                        return;
                    }
                };

                match service.series(&ticker).await {
                    Ok(series) => {
                        info!("Cached {} data points for {}", series.points.len(), ticker);
                    }
                    Err(e) => {
                        error!("Failed to prefetch {}: {}", ticker, e);
                    }
                }
            });
        }

        while tasks.next().await.is_some() {}

        info!("Background stock prefetch completed");
    }
}
