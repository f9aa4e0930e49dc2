use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use energy_flow::controller::{Controllers, Devices, LoopName, LoopTuning, TaskSupervisor};
use energy_flow::domain::{
    ChargerCommand, OperationMode, PowerReadings, Settings, SimulatedCharger, SimulatedInverter, SimulatedPlug,
};
use energy_flow::forecast::{PriceSource, StaticPriceSource};
use std::sync::Arc;
use std::time::Duration;

struct Rig {
    inverter: Arc<SimulatedInverter>,
    plug: Arc<SimulatedPlug>,
    charger: Arc<SimulatedCharger>,
    controllers: Controllers,
}

fn rig(prices: Arc<dyn PriceSource>) -> Rig {
    let inverter = Arc::new(SimulatedInverter::new(
        PowerReadings::new(5400.0, 1000.0, 70),
        OperationMode::Idle,
    ));
    let plug = Arc::new(SimulatedPlug::new());
    let charger = Arc::new(SimulatedCharger::new());
    let devices = Devices {
        inverter: inverter.clone(),
        plug: plug.clone(),
        charger: charger.clone(),
        prices,
    };
    Rig {
        inverter,
        plug,
        charger,
        controllers: Controllers::new(Arc::new(TaskSupervisor::new()), devices, LoopTuning::immediate()),
    }
}

fn all_enabled() -> Settings {
    Settings {
        refresh_interval_secs: 300,
        battery_enabled: true,
        charge_threshold_eur: 200.0,
        boiler_enabled: true,
        car_enabled: true,
        car_min_battery_level: 60,
        ..Default::default()
    }
}

fn all_disabled() -> Settings {
    Settings {
        battery_enabled: false,
        boiler_enabled: false,
        car_enabled: false,
        ..all_enabled()
    }
}

#[tokio::test(start_paused = true)]
async fn loops_act_and_fail_safe_on_stop() {
    let rig = rig(Arc::new(StaticPriceSource::typical_day()));
    rig.controllers.apply(&all_enabled()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(rig.inverter.mode(), OperationMode::Charge);
    assert_eq!(rig.plug.relay(), Some(true));
    assert_eq!(
        rig.charger.commands(),
        vec![ChargerCommand::SetCurrent(6), ChargerCommand::Enable]
    );

    rig.controllers.apply(&all_disabled()).await.unwrap();
    assert_eq!(rig.inverter.mode(), OperationMode::Idle);
    assert_eq!(rig.plug.relay(), Some(false));
    assert_eq!(rig.charger.last_command(), Some(ChargerCommand::Disable));

    let statuses = rig.controllers.supervisor().statuses().await;
    assert!(statuses.iter().all(|s| !s.running && s.params.is_none()));

    // nothing left behind to issue further commands
    let commands = rig.charger.commands().len();
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(rig.charger.commands().len(), commands);
}

#[tokio::test(start_paused = true)]
async fn saving_settings_restarts_running_loops() {
    let rig = rig(Arc::new(StaticPriceSource::typical_day()));
    let boiler_only = Settings {
        battery_enabled: false,
        car_enabled: false,
        ..all_enabled()
    };
    rig.controllers.apply(&boiler_only).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    rig.controllers.apply(&boiler_only).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    // on, fail-safe off from the replaced instance, on again
    assert_eq!(rig.plug.commands(), vec![true, false, true]);
    assert!(rig.controllers.supervisor().is_running(LoopName::Boiler).await);
    rig.controllers.shutdown().await;
}

struct UnreachablePrices;

#[async_trait]
impl PriceSource for UnreachablePrices {
    async fn fetch_daily_prices(&self, _date: NaiveDate) -> Result<Vec<f64>> {
        anyhow::bail!("connection refused")
    }
}

#[tokio::test(start_paused = true)]
async fn price_exhaustion_only_ends_battery_loop() {
    let rig = rig(Arc::new(UnreachablePrices));
    rig.inverter.set_battery_level(50);
    rig.controllers.apply(&all_enabled()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let supervisor = rig.controllers.supervisor();
    assert!(!supervisor.is_running(LoopName::BatteryCharging).await);
    assert!(supervisor.is_running(LoopName::Boiler).await);
    assert!(supervisor.is_running(LoopName::CarCharging).await);
    assert_eq!(rig.inverter.mode(), OperationMode::Idle);

    rig.controllers.shutdown().await;
    assert_eq!(rig.plug.relay(), Some(false));
}
