use anyhow::Result;
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use crate::controller::{RetryPolicy, RunningMean};
use crate::domain::Settings;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub hardware: HardwareConfig,
    pub inverter: InverterConfig,
    pub plug: PlugConfig,
    pub charger: ChargerConfig,
    pub prices: PricesConfig,
    /// Operator settings applied at startup, before the API takes over
    pub settings: Settings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

/// Which device implementations the binary wires up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareMode {
    /// In-memory devices, no actuation
    #[default]
    Simulated,
    /// Modbus inverter, HTTP relay plug, evcc CLI and the day-ahead market API
    Real,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub mode: HardwareMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InverterConfig {
    /// Modbus TCP address, e.g. `192.168.88.176:502`
    pub address: String,
    pub unit_id: u8,
    pub timeout_secs: u64,
    pub running_mean_samples: usize,
    pub running_mean_spacing_secs: u64,
    pub registers: InverterRegisters,
}

impl Default for InverterConfig {
    fn default() -> Self {
        Self {
            address: "192.168.88.176:502".to_string(),
            unit_id: 247,
            timeout_secs: 5,
            running_mean_samples: 5,
            running_mean_spacing_secs: 3,
            registers: InverterRegisters::default(),
        }
    }
}

impl InverterConfig {
    pub fn running_mean(&self) -> RunningMean {
        RunningMean::new(
            self.running_mean_samples,
            Duration::from_secs(self.running_mean_spacing_secs),
        )
    }
}

/// Holding register layout of the hybrid inverter
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InverterRegisters {
    pub battery_soc: u16,
    pub pv_power: u16,
    pub house_load: u16,
    pub work_mode: u16,
    pub charge_mode_value: u16,
    pub idle_mode_value: u16,
}

impl Default for InverterRegisters {
    fn default() -> Self {
        Self {
            battery_soc: 37007,
            pv_power: 35301,
            house_load: 35172,
            work_mode: 47000,
            charge_mode_value: 3,
            idle_mode_value: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlugConfig {
    pub base_url: String,
    pub http_timeout_secs: u64,
    pub attempts: u32,
    pub backoff_secs: u64,
}

impl Default for PlugConfig {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.31.114".to_string(),
            http_timeout_secs: 10,
            attempts: 10,
            backoff_secs: 60,
        }
    }
}

impl PlugConfig {
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_secs(self.backoff_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChargerConfig {
    /// External charger tool, invoked as `<program> charger -i|-e|-d`
    pub program: String,
    /// Power of one amp of charging current (240 V on three phases)
    pub one_amp_watts: f64,
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            program: "evcc".to_string(),
            one_amp_watts: 240.0 * 3.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricesConfig {
    pub base_url: String,
    pub http_timeout_secs: u64,
    pub attempts: u32,
    pub backoff_secs: u64,
}

impl Default for PricesConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.ote-cr.cz".to_string(),
            http_timeout_secs: 30,
            attempts: 10,
            backoff_secs: 60,
        }
    }
}

impl PricesConfig {
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_secs(self.backoff_secs))
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from("config/default.toml")
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("EF__").split("__"));
        Ok(figment.extract()?)
    }
}
