use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

use super::analysis::HOURS_PER_DAY;

/// Failures of the day-ahead price pipeline
#[derive(Debug, Error)]
pub enum PriceSourceError {
    #[error("malformed prices for {date}: {reason}")]
    Malformed { date: NaiveDate, reason: String },
    #[error("failed to get prices for {date} after {attempts} attempts")]
    Exhausted { date: NaiveDate, attempts: u32 },
    #[error("price fetch for {date} cancelled")]
    Cancelled { date: NaiveDate },
}

/// Day-ahead market prices, one value per hour of `date`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_daily_prices(&self, date: NaiveDate) -> Result<Vec<f64>>;
}

/// Czech day-ahead market operator, chart data endpoint of the daily market report
#[derive(Clone)]
pub struct OtePriceSource {
    base_url: String,
    client: reqwest::Client,
}

impl OtePriceSource {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("energy-flow/0.2"));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self { base_url, client })
    }

    fn url_for(&self, date: NaiveDate) -> String {
        format!(
            "{}/cs/kratkodobe-trhy/elektrina/denni-trh/@@chart-data?report_date={}",
            self.base_url.trim_end_matches('/'),
            date.format("%Y-%m-%d")
        )
    }

    /// Pick the EUR price series out of the chart payload. The report has an
    /// extra row on the day clocks go back; only the first 24 hours are kept.
    fn parse(chart: ChartResponse) -> Result<Vec<f64>> {
        let line = chart
            .data
            .data_line
            .into_iter()
            .find(|l| l.title.contains("EUR"))
            .context("no EUR price series in chart data")?;
        if line.point.len() < HOURS_PER_DAY {
            anyhow::bail!("expected {HOURS_PER_DAY} hourly prices, got {}", line.point.len());
        }
        line.point
            .into_iter()
            .take(HOURS_PER_DAY)
            .enumerate()
            .map(|(hour, p)| p.y.with_context(|| format!("missing price for hour {hour}")))
            .collect()
    }
}

#[async_trait]
impl PriceSource for OtePriceSource {
    async fn fetch_daily_prices(&self, date: NaiveDate) -> Result<Vec<f64>> {
        let resp = self
            .client
            .get(self.url_for(date))
            .send()
            .await
            .context("price GET failed")?;
        let status = resp.status();
        let body = resp.text().await.context("price read failed")?;
        if !status.is_success() {
            anyhow::bail!("price API error: HTTP {status}: {body}");
        }

        let chart: ChartResponse =
            serde_json::from_str(&body).context("price JSON parse failed")?;
        Self::parse(chart)
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    data: ChartData,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(rename = "dataLine")]
    data_line: Vec<ChartLine>,
}

#[derive(Debug, Deserialize)]
struct ChartLine {
    title: String,
    point: Vec<ChartPoint>,
}

#[derive(Debug, Deserialize)]
struct ChartPoint {
    y: Option<f64>,
}

/// Serves the same hourly profile for every date
#[derive(Debug)]
pub struct StaticPriceSource {
    prices: Vec<f64>,
    fetches: AtomicUsize,
}

impl StaticPriceSource {
    pub fn new(prices: Vec<f64>) -> Self {
        Self {
            prices,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Cheap night, morning and evening peaks, a solar dip at noon (EUR/MWh)
    pub fn typical_day() -> Self {
        Self::new(vec![
            62.0, 58.5, 55.0, 53.2, 54.0, 60.1, 78.4, 96.0, 104.3, 92.7, 80.2, 71.0, //
            64.5, 58.8, 57.1, 63.9, 75.0, 98.2, 121.6, 132.4, 118.0, 97.5, 84.3, 70.9,
        ])
    }

    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn fetch_daily_prices(&self, _date: NaiveDate) -> Result<Vec<f64>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.prices.clone())
    }
}
