use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use strum::{Display, EnumString};
use tracing::info;

/// Battery operation mode the controller asks the hybrid inverter for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationMode {
    /// Charge the battery from the grid
    Charge,
    /// General self-use, no forced grid charging
    Idle,
}

/// One snapshot of the readings every decision works from
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerReadings {
    pub ppv_w: f64,
    pub house_consumption_w: f64,
    pub battery_level: u8,
}

impl PowerReadings {
    pub fn new(ppv_w: f64, house_consumption_w: f64, battery_level: u8) -> Self {
        Self {
            ppv_w,
            house_consumption_w,
            battery_level,
        }
    }

    /// PV generation minus house consumption; positive means exportable power
    pub fn surplus_w(&self) -> f64 {
        self.ppv_w - self.house_consumption_w
    }
}

/// Telemetry and control surface of the solar inverter
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InverterClient: Send + Sync {
    /// Battery state of charge, 0-100
    async fn read_battery_level(&self) -> Result<u8>;
    /// One instantaneous sample of (PV power, house consumption) in watts
    async fn read_pv_and_consumption(&self) -> Result<(f64, f64)>;
    async fn get_operation_mode(&self) -> Result<OperationMode>;
    async fn set_operation_mode(&self, mode: OperationMode) -> Result<()>;
}

/// Switch the inverter to `mode` unless it is already there.
///
/// Returns `true` when a write was actually sent.
pub async fn apply_operation_mode(inverter: &dyn InverterClient, mode: OperationMode) -> Result<bool> {
    let current = inverter.get_operation_mode().await?;
    if current == mode {
        return Ok(false);
    }
    info!(from = %current, to = %mode, "setting operation mode");
    inverter.set_operation_mode(mode).await?;
    Ok(true)
}

/// In-memory inverter used by the simulated hardware mode and by tests
#[derive(Debug)]
pub struct SimulatedInverter {
    state: RwLock<SimulatedInverterState>,
    mode_writes: AtomicUsize,
}

#[derive(Debug, Clone)]
struct SimulatedInverterState {
    battery_level: u8,
    ppv_w: f64,
    house_consumption_w: f64,
    mode: OperationMode,
}

impl SimulatedInverter {
    pub fn new(readings: PowerReadings, mode: OperationMode) -> Self {
        Self {
            state: RwLock::new(SimulatedInverterState {
                battery_level: readings.battery_level,
                ppv_w: readings.ppv_w,
                house_consumption_w: readings.house_consumption_w,
                mode,
            }),
            mode_writes: AtomicUsize::new(0),
        }
    }

    pub fn default_inverter() -> Self {
        Self::new(PowerReadings::new(3000.0, 800.0, 55), OperationMode::Idle)
    }

    pub fn set_battery_level(&self, level: u8) {
        self.state.write().battery_level = level.min(100);
    }

    pub fn set_power(&self, ppv_w: f64, house_consumption_w: f64) {
        let mut st = self.state.write();
        st.ppv_w = ppv_w;
        st.house_consumption_w = house_consumption_w;
    }

    pub fn mode(&self) -> OperationMode {
        self.state.read().mode
    }

    /// Number of mode changes actually written
    pub fn mode_writes(&self) -> usize {
        self.mode_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InverterClient for SimulatedInverter {
    async fn read_battery_level(&self) -> Result<u8> {
        Ok(self.state.read().battery_level)
    }

    async fn read_pv_and_consumption(&self) -> Result<(f64, f64)> {
        let st = self.state.read();
        Ok((st.ppv_w, st.house_consumption_w))
    }

    async fn get_operation_mode(&self) -> Result<OperationMode> {
        Ok(self.state.read().mode)
    }

    async fn set_operation_mode(&self, mode: OperationMode) -> Result<()> {
        self.state.write().mode = mode;
        self.mode_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
