//! Battery charging loop: charge from the grid in cheap hours, idle otherwise.
//!
//! Every cycle reads the battery level and looks the current hour up in the
//! day's [`PriceDay`]. The analysis is refreshed once per calendar date.

use async_trait::async_trait;
use chrono::{DateTime, Local, Timelike};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ControlError, ControlLoop, LastIssued, LoopName, LoopParams, Pacer, RetryPolicy, WaitOutcome};
use crate::domain::{apply_operation_mode, BatteryStrategy, InverterClient, OperationMode, Settings};
use crate::forecast::{fetch_price_day, PriceDay, PriceDayCache, PriceSource, PriceSourceError};

/// Minimum battery level that must already be held before charging at price
/// rank 0..=6 is worthwhile. Ranks past the table never qualify.
pub const CHARGE_HOURS: [u8; 7] = [0, 0, 0, 0, 40, 60, 80];

/// Cycles between two full decision log lines
pub const LOG_INTERVAL: u64 = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatteryParams {
    pub charge_threshold_eur: f64,
    pub battery_upper_level: u8,
    pub max_charge_hours_key: usize,
    pub gradient_threshold: f64,
    pub local_extreme_hours_window: usize,
    pub strategy: BatteryStrategy,
    pub pacing: Pacer,
}

impl Default for BatteryParams {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), Pacer::default())
    }
}

impl BatteryParams {
    pub fn from_settings(settings: &Settings, pacing: Pacer) -> Self {
        Self {
            charge_threshold_eur: settings.charge_threshold_eur,
            battery_upper_level: settings.battery_upper_level,
            max_charge_hours_key: settings.max_charge_hours_key,
            gradient_threshold: settings.gradient_threshold,
            local_extreme_hours_window: settings.local_extreme_hours_window,
            strategy: settings.battery_strategy,
            pacing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeDecision {
    Charging,
    Idle,
}

impl ChargeDecision {
    pub fn mode(self) -> OperationMode {
        match self {
            ChargeDecision::Charging => OperationMode::Charge,
            ChargeDecision::Idle => OperationMode::Idle,
        }
    }
}

/// Charge decision for `hour` of `day` at battery `level`.
pub fn decide(params: &BatteryParams, day: &PriceDay, hour: usize, level: u8) -> ChargeDecision {
    if level >= params.battery_upper_level {
        return ChargeDecision::Idle;
    }
    let Some(price_now) = day.price_at(hour) else {
        return ChargeDecision::Idle;
    };

    let below_threshold = price_now < params.charge_threshold_eur;
    let local_minimum = day.is_local_minimum(hour)
        && day
            .prices_after(hour, params.local_extreme_hours_window)
            .iter()
            .all(|p| price_now < *p);
    let cheap_rank = day.rank_of(hour).is_some_and(|rank| {
        rank < params.max_charge_hours_key && CHARGE_HOURS.get(rank).is_some_and(|min| level > *min)
    });

    if below_threshold || local_minimum || cheap_rank {
        ChargeDecision::Charging
    } else {
        ChargeDecision::Idle
    }
}

pub struct BatteryLoop {
    params: BatteryParams,
    inverter: Arc<dyn InverterClient>,
    prices: Arc<dyn PriceSource>,
    price_retry: RetryPolicy,
    clock: fn() -> DateTime<Local>,
}

impl BatteryLoop {
    pub fn new(
        params: BatteryParams,
        inverter: Arc<dyn InverterClient>,
        prices: Arc<dyn PriceSource>,
        price_retry: RetryPolicy,
    ) -> Self {
        Self {
            params,
            inverter,
            prices,
            price_retry,
            clock: Local::now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Local>) -> Self {
        self.clock = clock;
        self
    }

    async fn fail_safe(&self) {
        info!(loop_name = %LoopName::BatteryCharging, "switching battery to idle before exit");
        if let Err(e) = apply_operation_mode(self.inverter.as_ref(), OperationMode::Idle).await {
            error!(loop_name = %LoopName::BatteryCharging, error = %e, "failed to idle battery on exit");
        }
    }

    /// Make sure the cache holds today's analysis
    async fn refresh_prices(
        &self,
        cache: &mut PriceDayCache,
        now: DateTime<Local>,
        cancel: &CancellationToken,
    ) -> Result<(), PriceSourceError> {
        let today = now.date_naive();
        if cache.get(today).is_none() {
            info!(date = %today, "date changed, analysing day-ahead prices");
            let day = fetch_price_day(self.prices.as_ref(), today, &self.price_retry, cancel).await?;
            cache.store(day);
        }
        Ok(())
    }

    async fn cycle(&self, day: &PriceDay, hour: usize, last: &mut LastIssued<OperationMode>, verbose: bool) {
        let level = match self.inverter.read_battery_level().await {
            Ok(level) => level,
            Err(e) => {
                warn!(loop_name = %LoopName::BatteryCharging, error = %e, "battery level read failed, skipping cycle");
                return;
            }
        };
        let decision = decide(&self.params, day, hour, level);
        let mode = decision.mode();

        if verbose {
            info!(
                hour,
                battery_level = level,
                price = day.price_at(hour),
                rank = day.rank_of(hour),
                local_minimum = day.is_local_minimum(hour),
                gradient = day.gradients().get(hour),
                gradient_threshold = self.params.gradient_threshold,
                ?decision,
                "battery decision"
            );
        } else {
            debug!(hour, battery_level = level, ?decision, "battery decision");
        }

        if !last.needs(mode) {
            return;
        }
        match apply_operation_mode(self.inverter.as_ref(), mode).await {
            Ok(_) => last.record(mode),
            Err(e) => warn!(loop_name = %LoopName::BatteryCharging, %mode, battery_level = level, error = %e, "setting operation mode failed"),
        }
    }
}

#[async_trait]
impl ControlLoop for BatteryLoop {
    fn name(&self) -> LoopName {
        LoopName::BatteryCharging
    }

    fn params(&self) -> LoopParams {
        LoopParams::Battery(self.params.clone())
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) -> Result<(), ControlError> {
        if self.params.strategy != BatteryStrategy::Buy {
            error!(strategy = %self.params.strategy, "battery strategy is not implemented");
            return Err(ControlError::UnimplementedMode(self.params.strategy));
        }

        let mut cache = PriceDayCache::default();
        let mut last = LastIssued::default();
        let mut cycles: u64 = 0;
        loop {
            let now = (self.clock)();
            match self.refresh_prices(&mut cache, now, &cancel).await {
                Ok(()) => {}
                Err(PriceSourceError::Cancelled { .. }) => {
                    self.fail_safe().await;
                    return Ok(());
                }
                Err(e) => {
                    self.fail_safe().await;
                    return Err(e.into());
                }
            }
            if let Some(day) = cache.get(now.date_naive()) {
                self.cycle(day, now.hour() as usize, &mut last, cycles % LOG_INTERVAL == 0)
                    .await;
            }
            cycles += 1;

            if self.params.pacing.wait(&cancel).await == WaitOutcome::Interrupted {
                self.fail_safe().await;
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MockInverterClient, PowerReadings, SimulatedInverter};
    use crate::forecast::{MockPriceSource, StaticPriceSource};
    use chrono::{NaiveDate, TimeZone};
    use proptest::prelude::*;
    use rstest::rstest;
    use std::time::Duration;

    /// 15, 16, ... 38: monotonic, so no local extrema and rank == hour
    fn rising_day() -> PriceDay {
        let prices = (0..24).map(|h| 15.0 + h as f64).collect();
        PriceDay::analyze(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), prices).unwrap()
    }

    fn typical_day() -> PriceDay {
        let prices = StaticPriceSource::typical_day().prices().to_vec();
        PriceDay::analyze(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), prices).unwrap()
    }

    fn params() -> BatteryParams {
        BatteryParams {
            charge_threshold_eur: 20.0,
            battery_upper_level: 80,
            max_charge_hours_key: 4,
            local_extreme_hours_window: 3,
            ..Default::default()
        }
    }

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[rstest]
    // price 15 below the threshold
    #[case(0, 50, ChargeDecision::Charging)]
    // price 25, rank 10, no local minimum
    #[case(10, 50, ChargeDecision::Idle)]
    // price 18 is still below the threshold
    #[case(3, 50, ChargeDecision::Charging)]
    #[case(7, 50, ChargeDecision::Idle)]
    // at the upper level nothing charges
    #[case(0, 80, ChargeDecision::Idle)]
    fn test_decide_on_rising_prices(#[case] hour: usize, #[case] level: u8, #[case] expected: ChargeDecision) {
        assert_eq!(decide(&params(), &rising_day(), hour, level), expected);
    }

    #[rstest]
    // ranks 0..=3 qualify with any non-empty battery
    #[case(3, 1, ChargeDecision::Charging)]
    #[case(3, 0, ChargeDecision::Idle)]
    #[case(4, 40, ChargeDecision::Idle)]
    #[case(4, 41, ChargeDecision::Charging)]
    #[case(6, 80, ChargeDecision::Idle)]
    fn test_rank_table_levels(#[case] rank: usize, #[case] level: u8, #[case] expected: ChargeDecision) {
        let p = BatteryParams {
            charge_threshold_eur: 0.0,
            battery_upper_level: 90,
            max_charge_hours_key: 7,
            ..params()
        };
        assert_eq!(decide(&p, &rising_day(), rank, level), expected);
    }

    #[test]
    fn test_local_minimum_clause() {
        let day = typical_day();
        let p = BatteryParams {
            charge_threshold_eur: 0.0,
            max_charge_hours_key: 0,
            local_extreme_hours_window: 3,
            ..params()
        };
        // hour 14 is the midday dip and cheaper than 15..=17
        assert!(day.is_local_minimum(14));
        assert_eq!(decide(&p, &day, 14, 50), ChargeDecision::Charging);
        // hour 13 is on the slope
        assert_eq!(decide(&p, &day, 13, 50), ChargeDecision::Idle);
    }

    proptest! {
        #[test]
        fn prop_never_charges_at_or_above_upper_level(
            prices in prop::collection::vec(-50.0f64..300.0, 24),
            hour in 0usize..24,
            upper in 20u8..=90,
            above in 0u8..=10,
        ) {
            let day = PriceDay::analyze(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), prices).unwrap();
            let p = BatteryParams {
                charge_threshold_eur: 200.0,
                battery_upper_level: upper,
                max_charge_hours_key: 7,
                ..params()
            };
            let level = upper.saturating_add(above).min(100);
            prop_assert_eq!(decide(&p, &day, hour, level), ChargeDecision::Idle);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_decision_is_written_once() {
        let mut inverter = MockInverterClient::new();
        inverter.expect_read_battery_level().returning(|| Ok(30));
        inverter.expect_get_operation_mode().returning(|| Ok(OperationMode::Idle));
        // one Charge write; the exit idle finds the mock still idle
        inverter
            .expect_set_operation_mode()
            .withf(|m| *m == OperationMode::Charge)
            .times(1)
            .returning(|_| Ok(()));

        let p = BatteryParams {
            charge_threshold_eur: 200.0,
            pacing: Pacer::new(10, 10),
            ..params()
        };
        let control = BatteryLoop::new(
            p,
            Arc::new(inverter),
            Arc::new(StaticPriceSource::typical_day()),
            RetryPolicy::new(1, Duration::ZERO),
        )
        .with_clock(noon);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Box::new(control).run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(45)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_prices_fetched_once_per_day_and_idle_on_exit() {
        let inverter = Arc::new(SimulatedInverter::new(
            PowerReadings::new(0.0, 500.0, 30),
            OperationMode::Idle,
        ));
        let prices = Arc::new(StaticPriceSource::typical_day());
        let p = BatteryParams {
            charge_threshold_eur: 200.0,
            pacing: Pacer::new(10, 10),
            ..params()
        };
        let control = BatteryLoop::new(p, inverter.clone(), prices.clone(), RetryPolicy::default())
            .with_clock(noon);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Box::new(control).run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(inverter.mode(), OperationMode::Charge);
        assert_eq!(prices.fetches(), 1);

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(inverter.mode(), OperationMode::Idle);
        assert_eq!(inverter.mode_writes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_price_exhaustion_ends_loop_idle() {
        let inverter = Arc::new(SimulatedInverter::new(
            PowerReadings::new(0.0, 500.0, 30),
            OperationMode::Charge,
        ));
        let mut prices = MockPriceSource::new();
        prices
            .expect_fetch_daily_prices()
            .times(3)
            .returning(|_| Ok(vec![50.0; 23]));

        let control = BatteryLoop::new(
            params(),
            inverter.clone(),
            Arc::new(prices),
            RetryPolicy::new(3, Duration::from_secs(60)),
        )
        .with_clock(noon);

        let result = Box::new(control).run(CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(ControlError::PriceSource(PriceSourceError::Exhausted { attempts: 3, .. }))
        ));
        assert_eq!(inverter.mode(), OperationMode::Idle);
    }

    #[tokio::test]
    async fn test_sell_fails_fast() {
        let inverter = Arc::new(SimulatedInverter::default_inverter());
        let control = BatteryLoop::new(
            BatteryParams {
                strategy: BatteryStrategy::Sell,
                ..params()
            },
            inverter.clone(),
            Arc::new(StaticPriceSource::typical_day()),
            RetryPolicy::default(),
        );
        let result = Box::new(control).run(CancellationToken::new()).await;
        assert!(matches!(result, Err(ControlError::UnimplementedMode(BatteryStrategy::Sell))));
        assert_eq!(inverter.mode_writes(), 0);
    }
}
