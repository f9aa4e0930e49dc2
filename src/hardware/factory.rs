use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, HardwareMode};
use crate::controller::Devices;
use crate::domain::{
    ChargerCommandSink, EvccChargerSink, HttpRelayPlug, InverterClient, PlugClient, SimulatedCharger,
    SimulatedInverter, SimulatedPlug,
};
use crate::forecast::{OtePriceSource, PriceSource, StaticPriceSource};

/// Builds the device set the loops talk to.
///
/// Simulated mode never touches the network. Real mode needs the `modbus`
/// feature for the inverter; without it building fails rather than silently
/// falling back to a simulation.
pub struct DeviceFactory {
    config: Config,
}

impl DeviceFactory {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub async fn build(&self) -> Result<Devices> {
        match self.config.hardware.mode {
            HardwareMode::Simulated => {
                tracing::info!("using simulated devices");
                Ok(Self::simulated())
            }
            HardwareMode::Real => self.real().await,
        }
    }

    pub fn simulated() -> Devices {
        Devices {
            inverter: Arc::new(SimulatedInverter::default_inverter()),
            plug: Arc::new(SimulatedPlug::new()),
            charger: Arc::new(SimulatedCharger::new()),
            prices: Arc::new(StaticPriceSource::typical_day()),
        }
    }

    async fn real(&self) -> Result<Devices> {
        let cfg = &self.config;
        let inverter = self.create_inverter().await?;
        let plug: Arc<dyn PlugClient> = Arc::new(HttpRelayPlug::new(
            cfg.plug.base_url.clone(),
            Duration::from_secs(cfg.plug.http_timeout_secs),
        )?);
        let charger: Arc<dyn ChargerCommandSink> = Arc::new(EvccChargerSink::new(cfg.charger.program.clone()));
        let prices: Arc<dyn PriceSource> = Arc::new(OtePriceSource::new(
            cfg.prices.base_url.clone(),
            Duration::from_secs(cfg.prices.http_timeout_secs),
        )?);
        tracing::info!(
            inverter = %cfg.inverter.address,
            plug = %cfg.plug.base_url,
            prices = %cfg.prices.base_url,
            "using real devices"
        );
        Ok(Devices {
            inverter,
            plug,
            charger,
            prices,
        })
    }

    #[cfg(feature = "modbus")]
    async fn create_inverter(&self) -> Result<Arc<dyn InverterClient>> {
        let inverter = crate::hardware::modbus::ModbusInverter::connect(&self.config.inverter).await?;
        tracing::info!(addr = %self.config.inverter.address, "connected to Modbus inverter");
        Ok(Arc::new(inverter))
    }

    #[cfg(not(feature = "modbus"))]
    async fn create_inverter(&self) -> Result<Arc<dyn InverterClient>> {
        anyhow::bail!("hardware mode 'real' requires the 'modbus' feature")
    }
}
