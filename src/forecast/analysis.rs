//! Daily price curve analysis: rank of every hour, local extrema and the
//! price gradient, plus the date-keyed cache the battery loop keeps.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::prices::{PriceSource, PriceSourceError};
use crate::controller::{wait_for, RetryPolicy, WaitOutcome};

pub const HOURS_PER_DAY: usize = 24;

/// One day of hourly prices and everything derived from them
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceDay {
    date: NaiveDate,
    hourly_prices: Vec<f64>,
    local_minima_hours: BTreeSet<usize>,
    local_maxima_hours: BTreeSet<usize>,
    gradients: Vec<f64>,
    ranks: Vec<usize>,
}

impl PriceDay {
    /// Validate and analyse one day of prices. Anything but 24 finite values
    /// is malformed.
    pub fn analyze(date: NaiveDate, hourly_prices: Vec<f64>) -> Result<Self, PriceSourceError> {
        if hourly_prices.len() != HOURS_PER_DAY {
            return Err(PriceSourceError::Malformed {
                date,
                reason: format!("expected {HOURS_PER_DAY} hourly prices, got {}", hourly_prices.len()),
            });
        }
        if let Some(hour) = hourly_prices.iter().position(|p| !p.is_finite()) {
            return Err(PriceSourceError::Malformed {
                date,
                reason: format!("price for hour {hour} is not a number"),
            });
        }

        let (local_minima_hours, local_maxima_hours) = local_extrema(&hourly_prices);
        let gradients = gradient(&hourly_prices);
        let ranks = ranks(&hourly_prices);
        Ok(Self {
            date,
            hourly_prices,
            local_minima_hours,
            local_maxima_hours,
            gradients,
            ranks,
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn hourly_prices(&self) -> &[f64] {
        &self.hourly_prices
    }

    pub fn local_minima_hours(&self) -> &BTreeSet<usize> {
        &self.local_minima_hours
    }

    pub fn local_maxima_hours(&self) -> &BTreeSet<usize> {
        &self.local_maxima_hours
    }

    pub fn gradients(&self) -> &[f64] {
        &self.gradients
    }

    pub fn price_at(&self, hour: usize) -> Option<f64> {
        self.hourly_prices.get(hour).copied()
    }

    /// 0-based position of `hour`'s price in the day sorted ascending
    pub fn rank_of(&self, hour: usize) -> Option<usize> {
        self.ranks.get(hour).copied()
    }

    pub fn is_local_minimum(&self, hour: usize) -> bool {
        self.local_minima_hours.contains(&hour)
    }

    /// Prices of the `window` hours following `hour`, cut off at midnight
    pub fn prices_after(&self, hour: usize, window: usize) -> &[f64] {
        let start = (hour + 1).min(HOURS_PER_DAY);
        let end = (hour + 1 + window).min(HOURS_PER_DAY);
        &self.hourly_prices[start..end]
    }
}

/// Interior indices strictly below (minima) or above (maxima) both neighbours.
/// The first and last hour are never extrema.
pub fn local_extrema(prices: &[f64]) -> (BTreeSet<usize>, BTreeSet<usize>) {
    let mut minima = BTreeSet::new();
    let mut maxima = BTreeSet::new();
    for (i, w) in prices.windows(3).enumerate() {
        let (prev, cur, next) = (w[0], w[1], w[2]);
        if cur < prev && cur < next {
            minima.insert(i + 1);
        } else if cur > prev && cur > next {
            maxima.insert(i + 1);
        }
    }
    (minima, maxima)
}

/// Centered differences inside, one-sided differences at both ends
pub fn gradient(prices: &[f64]) -> Vec<f64> {
    let n = prices.len();
    if n < 2 {
        return vec![0.0; n];
    }
    (0..n)
        .map(|i| match i {
            0 => prices[1] - prices[0],
            i if i == n - 1 => prices[n - 1] - prices[n - 2],
            i => (prices[i + 1] - prices[i - 1]) / 2.0,
        })
        .collect()
}

/// Rank of every hour, by a stable ascending sort: equal prices keep hour order
pub fn ranks(prices: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..prices.len()).collect();
    order.sort_by(|&a, &b| prices[a].total_cmp(&prices[b]));
    let mut ranks = vec![0; prices.len()];
    for (rank, hour) in order.into_iter().enumerate() {
        ranks[hour] = rank;
    }
    ranks
}

/// Fetch and analyse one day, retrying malformed or failed fetches with a
/// fixed backoff. The backoff is cut short by `cancel`.
pub async fn fetch_price_day(
    source: &dyn PriceSource,
    date: NaiveDate,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<PriceDay, PriceSourceError> {
    let attempts = policy.attempts();
    for attempt in 1..=attempts {
        let result = match source.fetch_daily_prices(date).await {
            Ok(prices) => PriceDay::analyze(date, prices).map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(day) => {
                info!(
                    %date,
                    prices = ?day.hourly_prices(),
                    local_minima = ?day.local_minima_hours(),
                    local_maxima = ?day.local_maxima_hours(),
                    "day-ahead prices analysed"
                );
                return Ok(day);
            }
            Err(e) => warn!(%date, attempt, error = %e, "price fetch failed"),
        }
        if attempt < attempts && wait_for(policy.backoff(), cancel).await == WaitOutcome::Interrupted {
            return Err(PriceSourceError::Cancelled { date });
        }
    }
    error!(%date, attempts, "failed to get day-ahead prices, giving up");
    Err(PriceSourceError::Exhausted { date, attempts })
}

/// Single-entry cache of the current day's analysis
#[derive(Debug, Default)]
pub struct PriceDayCache {
    day: Option<PriceDay>,
}

impl PriceDayCache {
    /// The cached analysis, only if it belongs to `date`
    pub fn get(&self, date: NaiveDate) -> Option<&PriceDay> {
        self.day.as_ref().filter(|d| d.date() == date)
    }

    pub fn store(&mut self, day: PriceDay) {
        self.day = Some(day);
    }
}
