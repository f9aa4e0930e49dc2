use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ControlError, ControlLoop, LastIssued, LoopName, LoopParams, Pacer, RunningMean, WaitOutcome};
use crate::domain::{ChargerCommandSink, InverterClient, PowerReadings, Settings};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarParams {
    pub max_current_a: u32,
    pub min_current_a: u32,
    pub min_battery_level: u8,
    /// Power drawn per amp of charging current across all phases
    pub one_amp_watts: f64,
    pub pacing: Pacer,
}

impl Default for CarParams {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), 720.0, Pacer::default())
    }
}

impl CarParams {
    pub fn from_settings(settings: &Settings, one_amp_watts: f64, pacing: Pacer) -> Self {
        Self {
            max_current_a: settings.max_current_a,
            min_current_a: settings.min_current_a,
            min_battery_level: settings.car_min_battery_level,
            one_amp_watts,
            pacing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ChargingDecision {
    Enable { amps: u32 },
    Disable,
}

/// Charge the car from PV surplus once the house battery is full enough.
pub fn decide(params: &CarParams, readings: &PowerReadings) -> ChargingDecision {
    let surplus = readings.surplus_w();
    let min_w = f64::from(params.min_current_a) * params.one_amp_watts;
    if surplus > min_w && readings.battery_level > params.min_battery_level && params.one_amp_watts > 0.0 {
        let max = params.max_current_a.max(params.min_current_a);
        let amps = (surplus / params.one_amp_watts).floor() as u32;
        ChargingDecision::Enable {
            amps: amps.clamp(params.min_current_a, max),
        }
    } else {
        ChargingDecision::Disable
    }
}

pub struct CarLoop {
    params: CarParams,
    inverter: Arc<dyn InverterClient>,
    charger: Arc<dyn ChargerCommandSink>,
    sampling: RunningMean,
}

impl CarLoop {
    pub fn new(
        params: CarParams,
        inverter: Arc<dyn InverterClient>,
        charger: Arc<dyn ChargerCommandSink>,
        sampling: RunningMean,
    ) -> Self {
        Self {
            params,
            inverter,
            charger,
            sampling,
        }
    }

    async fn read(&self) -> Result<PowerReadings> {
        let (ppv, consumption) = self.sampling.read(self.inverter.as_ref()).await?;
        let level = self.inverter.read_battery_level().await?;
        Ok(PowerReadings::new(ppv, consumption, level))
    }

    async fn issue(&self, decision: ChargingDecision) -> Result<()> {
        match decision {
            ChargingDecision::Enable { amps } => {
                self.charger.set_current(amps).await?;
                self.charger.enable().await
            }
            ChargingDecision::Disable => self.charger.disable().await,
        }
    }

    async fn cycle(&self, last: &mut LastIssued<ChargingDecision>) {
        let readings = match self.read().await {
            Ok(r) => r,
            Err(e) => {
                warn!(loop_name = %LoopName::CarCharging, error = %e, "inverter read failed, skipping cycle");
                return;
            }
        };
        let decision = decide(&self.params, &readings);
        if last.needs(decision) {
            info!(
                surplus = readings.surplus_w(),
                battery_level = readings.battery_level,
                ?decision,
                "car charging changed"
            );
        } else {
            debug!(surplus = readings.surplus_w(), ?decision, "car charging unchanged");
        }

        // the charger accepts repeats, so every cycle re-asserts the decision
        match self.issue(decision).await {
            Ok(()) => last.record(decision),
            Err(e) => error!(loop_name = %LoopName::CarCharging, ?decision, error = %e, "charger command failed"),
        }
    }
}

#[async_trait]
impl ControlLoop for CarLoop {
    fn name(&self) -> LoopName {
        LoopName::CarCharging
    }

    fn params(&self) -> LoopParams {
        LoopParams::Car(self.params.clone())
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) -> Result<(), ControlError> {
        let mut last = LastIssued::default();
        loop {
            self.cycle(&mut last).await;
            if self.params.pacing.wait(&cancel).await == WaitOutcome::Interrupted {
                info!(loop_name = %LoopName::CarCharging, "disabling car charging before exit");
                if let Err(e) = self.charger.disable().await {
                    error!(loop_name = %LoopName::CarCharging, error = %e, "failed to disable charger on exit");
                }
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChargerCommand, OperationMode, SimulatedCharger, SimulatedInverter};
    use rstest::rstest;
    use std::time::Duration;

    fn params() -> CarParams {
        CarParams {
            max_current_a: 16,
            min_current_a: 6,
            min_battery_level: 80,
            one_amp_watts: 720.0,
            pacing: Pacer::new(10, 10),
        }
    }

    #[rstest]
    // surplus 4000 is below 6 A * 720 W
    #[case(5000.0, 1000.0, 85, ChargingDecision::Disable)]
    // surplus 4400 just above, floor(4400 / 720) = 6
    #[case(5400.0, 1000.0, 85, ChargingDecision::Enable { amps: 6 })]
    #[case(5320.0, 1000.0, 85, ChargingDecision::Disable)]
    #[case(5400.0, 1000.0, 80, ChargingDecision::Disable)]
    #[case(9000.0, 1000.0, 81, ChargingDecision::Enable { amps: 11 })]
    // capped at max_current_a
    #[case(20000.0, 500.0, 95, ChargingDecision::Enable { amps: 16 })]
    fn test_decide(#[case] ppv: f64, #[case] consumption: f64, #[case] level: u8, #[case] expected: ChargingDecision) {
        let readings = PowerReadings::new(ppv, consumption, level);
        assert_eq!(decide(&params(), &readings), expected);
    }

    #[test]
    fn test_min_above_max_clamps_to_min() {
        let p = CarParams {
            max_current_a: 6,
            min_current_a: 10,
            ..params()
        };
        let readings = PowerReadings::new(20000.0, 0.0, 90);
        assert_eq!(decide(&p, &readings), ChargingDecision::Enable { amps: 10 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_reasserts_and_disables_on_exit() {
        let inverter = Arc::new(SimulatedInverter::new(
            PowerReadings::new(5400.0, 1000.0, 90),
            OperationMode::Idle,
        ));
        let charger = Arc::new(SimulatedCharger::new());
        let control = CarLoop::new(params(), inverter, charger.clone(), RunningMean::new(1, Duration::ZERO));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Box::new(control).run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(15)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(
            charger.commands(),
            vec![
                ChargerCommand::SetCurrent(6),
                ChargerCommand::Enable,
                ChargerCommand::SetCurrent(6),
                ChargerCommand::Enable,
                ChargerCommand::Disable,
            ]
        );
    }
}
