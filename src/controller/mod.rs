pub mod battery;
pub mod boiler;
pub mod car;
pub mod pacing;
pub mod sampling;
pub mod supervisor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::domain::{BatteryStrategy, ChargerCommandSink, InverterClient, PlugClient, RelaySwitch, Settings};
use crate::forecast::{PriceSource, PriceSourceError};

pub use battery::{BatteryLoop, BatteryParams, ChargeDecision, CHARGE_HOURS};
pub use boiler::{BoilerLoop, BoilerParams, RelayState};
pub use car::{CarLoop, CarParams, ChargingDecision};
pub use pacing::*;
pub use sampling::RunningMean;
pub use supervisor::*;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("battery strategy '{0}' is not implemented")]
    UnimplementedMode(BatteryStrategy),
    #[error(transparent)]
    PriceSource(#[from] PriceSourceError),
}

/// The named background loops the supervisor knows about
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LoopName {
    BatteryCharging,
    Boiler,
    CarCharging,
}

/// Parameter snapshot a loop was started with
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "loop", rename_all = "snake_case")]
pub enum LoopParams {
    Battery(BatteryParams),
    Boiler(BoilerParams),
    Car(CarParams),
}

/// Last command a loop sent to its actuator. Starts unknown, which forces
/// the first command out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastIssued<T>(Option<T>);

impl<T> Default for LastIssued<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T: PartialEq + Copy> LastIssued<T> {
    /// True when `command` differs from what was issued last
    pub fn needs(&self, command: T) -> bool {
        self.0 != Some(command)
    }

    pub fn record(&mut self, command: T) {
        self.0 = Some(command);
    }

    pub fn get(&self) -> Option<T> {
        self.0
    }
}

/// A long-lived decision loop run by the [`TaskSupervisor`].
///
/// `run` returns only after `cancel` fired and the fail-safe command went
/// out, or on a fatal error.
#[async_trait]
pub trait ControlLoop: Send + 'static {
    fn name(&self) -> LoopName;
    fn params(&self) -> LoopParams;
    async fn run(self: Box<Self>, cancel: CancellationToken) -> Result<(), ControlError>;
}

/// External collaborators shared by every loop
#[derive(Clone)]
pub struct Devices {
    pub inverter: Arc<dyn InverterClient>,
    pub plug: Arc<dyn PlugClient>,
    pub charger: Arc<dyn ChargerCommandSink>,
    pub prices: Arc<dyn PriceSource>,
}

/// Timing and conversion constants that come from the config file rather
/// than the operator settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopTuning {
    pub running_mean: RunningMean,
    pub plug_retry: RetryPolicy,
    pub price_retry: RetryPolicy,
    pub one_amp_watts: f64,
}

impl Default for LoopTuning {
    fn default() -> Self {
        Self {
            running_mean: RunningMean::default(),
            plug_retry: RetryPolicy::default(),
            price_retry: RetryPolicy::default(),
            one_amp_watts: 720.0,
        }
    }
}

impl LoopTuning {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            running_mean: cfg.inverter.running_mean(),
            plug_retry: cfg.plug.retry(),
            price_retry: cfg.prices.retry(),
            one_amp_watts: cfg.charger.one_amp_watts,
        }
    }

    /// Tuning without pauses, for simulations and tests
    pub fn immediate() -> Self {
        Self {
            running_mean: RunningMean::new(1, Duration::ZERO),
            plug_retry: RetryPolicy::new(1, Duration::ZERO),
            price_retry: RetryPolicy::new(1, Duration::ZERO),
            one_amp_watts: 720.0,
        }
    }
}

/// Turns operator settings into started and stopped loops
pub struct Controllers {
    supervisor: Arc<TaskSupervisor>,
    devices: Devices,
    tuning: LoopTuning,
}

impl Controllers {
    pub fn new(supervisor: Arc<TaskSupervisor>, devices: Devices, tuning: LoopTuning) -> Self {
        Self {
            supervisor,
            devices,
            tuning,
        }
    }

    pub fn supervisor(&self) -> &Arc<TaskSupervisor> {
        &self.supervisor
    }

    /// Restart every enabled loop with a fresh parameter snapshot and stop
    /// the disabled ones. An unimplemented battery strategy is rejected
    /// before any loop is touched.
    pub async fn apply(&self, settings: &Settings) -> Result<(), ControlError> {
        if settings.battery_enabled && settings.battery_strategy != BatteryStrategy::Buy {
            return Err(ControlError::UnimplementedMode(settings.battery_strategy));
        }
        let pacing = Pacer::from_refresh_interval(settings.refresh_interval_secs);
        info!(
            battery = settings.battery_enabled,
            boiler = settings.boiler_enabled,
            car = settings.car_enabled,
            min_secs = pacing.min_secs(),
            max_secs = pacing.max_secs(),
            "applying settings"
        );

        if settings.battery_enabled {
            let params = BatteryParams::from_settings(settings, pacing);
            let control = BatteryLoop::new(
                params,
                self.devices.inverter.clone(),
                self.devices.prices.clone(),
                self.tuning.price_retry,
            );
            self.supervisor.start(Box::new(control)).await;
        } else {
            self.supervisor.stop(LoopName::BatteryCharging).await;
        }

        if settings.boiler_enabled {
            let params = BoilerParams::from_settings(settings, pacing);
            let control = BoilerLoop::new(
                params,
                self.devices.inverter.clone(),
                RelaySwitch::new(self.devices.plug.clone(), self.tuning.plug_retry),
                self.tuning.running_mean,
            );
            self.supervisor.start(Box::new(control)).await;
        } else {
            self.supervisor.stop(LoopName::Boiler).await;
        }

        if settings.car_enabled {
            let params = CarParams::from_settings(settings, self.tuning.one_amp_watts, pacing);
            let control = CarLoop::new(
                params,
                self.devices.inverter.clone(),
                self.devices.charger.clone(),
                self.tuning.running_mean,
            );
            self.supervisor.start(Box::new(control)).await;
        } else {
            self.supervisor.stop(LoopName::CarCharging).await;
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.supervisor.stop_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SimulatedCharger, SimulatedInverter, SimulatedPlug};
    use crate::forecast::StaticPriceSource;

    fn controllers() -> Controllers {
        let devices = Devices {
            inverter: Arc::new(SimulatedInverter::default_inverter()),
            plug: Arc::new(SimulatedPlug::new()),
            charger: Arc::new(SimulatedCharger::new()),
            prices: Arc::new(StaticPriceSource::typical_day()),
        };
        Controllers::new(Arc::new(TaskSupervisor::new()), devices, LoopTuning::immediate())
    }

    #[test]
    fn test_loop_names() {
        assert_eq!(LoopName::BatteryCharging.to_string(), "battery_charging");
        assert_eq!("car_charging".parse::<LoopName>().unwrap(), LoopName::CarCharging);
    }

    #[test]
    fn test_last_issued() {
        let mut last = LastIssued::default();
        assert!(last.needs(RelayState::Off));
        last.record(RelayState::Off);
        assert!(!last.needs(RelayState::Off));
        assert!(last.needs(RelayState::On));
        assert_eq!(last.get(), Some(RelayState::Off));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sell_strategy_is_rejected_before_starting_anything() {
        let controllers = controllers();
        let settings = Settings {
            battery_enabled: true,
            battery_strategy: BatteryStrategy::Sell,
            ..Default::default()
        };
        let err = controllers.apply(&settings).await.unwrap_err();
        assert!(matches!(err, ControlError::UnimplementedMode(BatteryStrategy::Sell)));
        assert!(!controllers.supervisor().is_running(LoopName::Boiler).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_starts_enabled_and_stops_disabled() {
        let controllers = controllers();
        controllers.apply(&Settings::default()).await.unwrap();
        let sup = controllers.supervisor();
        assert!(!sup.is_running(LoopName::BatteryCharging).await);
        assert!(sup.is_running(LoopName::Boiler).await);
        assert!(sup.is_running(LoopName::CarCharging).await);

        let settings = Settings {
            boiler_enabled: false,
            max_current_a: 20,
            ..Default::default()
        };
        controllers.apply(&settings).await.unwrap();
        assert!(!sup.is_running(LoopName::Boiler).await);
        match sup.status(LoopName::CarCharging).await.params {
            Some(LoopParams::Car(p)) => assert_eq!(p.max_current_a, 20),
            other => panic!("unexpected params {other:?}"),
        }

        controllers.shutdown().await;
        assert!(!sup.is_running(LoopName::CarCharging).await);
    }
}
