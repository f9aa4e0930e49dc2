use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use strum::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ControlError, ControlLoop, LastIssued, LoopName, LoopParams, Pacer, RunningMean, WaitOutcome};
use crate::domain::{InverterClient, PowerReadings, RelaySwitch, Settings};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoilerParams {
    /// Rated heater consumption in watts
    pub consumption_w: f64,
    pub enable_battery_level: u8,
    pub almost_full_level: u8,
    pub pacing: Pacer,
}

impl Default for BoilerParams {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), Pacer::default())
    }
}

impl BoilerParams {
    pub fn from_settings(settings: &Settings, pacing: Pacer) -> Self {
        Self {
            consumption_w: f64::from(settings.boiler_consumption_w),
            enable_battery_level: settings.boiler_enable_battery_level,
            almost_full_level: settings.boiler_almost_full_level,
            pacing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RelayState {
    On,
    Off,
}

impl RelayState {
    pub fn is_on(self) -> bool {
        self == RelayState::On
    }
}

/// Heat water when there is spare PV power, or when the battery is almost
/// full and the boiler is the only sink left.
pub fn decide(params: &BoilerParams, readings: &PowerReadings) -> RelayState {
    let surplus = readings.surplus_w();
    let level = readings.battery_level;

    let covers_heater = surplus > params.consumption_w;
    let half_with_battery = surplus > params.consumption_w / 2.0 && level > params.enable_battery_level;
    let overflow = level > params.almost_full_level;

    if covers_heater || half_with_battery || overflow {
        RelayState::On
    } else {
        RelayState::Off
    }
}

pub struct BoilerLoop {
    params: BoilerParams,
    inverter: Arc<dyn InverterClient>,
    relay: RelaySwitch,
    sampling: RunningMean,
}

impl BoilerLoop {
    pub fn new(
        params: BoilerParams,
        inverter: Arc<dyn InverterClient>,
        relay: RelaySwitch,
        sampling: RunningMean,
    ) -> Self {
        Self {
            params,
            inverter,
            relay,
            sampling,
        }
    }

    async fn read(&self) -> anyhow::Result<PowerReadings> {
        let (ppv, consumption) = self.sampling.read(self.inverter.as_ref()).await?;
        let level = self.inverter.read_battery_level().await?;
        Ok(PowerReadings::new(ppv, consumption, level))
    }

    async fn cycle(&self, last: &mut LastIssued<RelayState>) {
        let readings = match self.read().await {
            Ok(r) => r,
            Err(e) => {
                warn!(loop_name = %LoopName::Boiler, error = %e, "inverter read failed, skipping cycle");
                return;
            }
        };
        let state = decide(&self.params, &readings);
        debug!(
            ppv = readings.ppv_w,
            consumption = readings.house_consumption_w,
            battery_level = readings.battery_level,
            %state,
            "boiler decision"
        );

        if last.needs(state) && self.relay.switch(state.is_on()).await {
            last.record(state);
        }
    }
}

#[async_trait]
impl ControlLoop for BoilerLoop {
    fn name(&self) -> LoopName {
        LoopName::Boiler
    }

    fn params(&self) -> LoopParams {
        LoopParams::Boiler(self.params.clone())
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) -> Result<(), ControlError> {
        let mut last = LastIssued::default();
        loop {
            self.cycle(&mut last).await;
            if self.params.pacing.wait(&cancel).await == WaitOutcome::Interrupted {
                info!(loop_name = %LoopName::Boiler, "turning boiler off before exit");
                self.relay.switch(false).await;
                return Ok(());
            }
        }
    }
}
