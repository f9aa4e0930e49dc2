use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::config::{InverterConfig, InverterRegisters};
use crate::domain::{InverterClient, OperationMode};
use crate::modbus::client::ModbusClient;
use crate::modbus::parser;

/// Hybrid inverter reached over Modbus TCP
pub struct ModbusInverter {
    client: ModbusClient,
    registers: InverterRegisters,
}

impl ModbusInverter {
    pub async fn connect(cfg: &InverterConfig) -> Result<Self> {
        let client = ModbusClient::connect_with_timeout(
            &cfg.address,
            cfg.unit_id,
            Duration::from_secs(cfg.timeout_secs),
        )
        .await
        .context("Failed to connect to Modbus inverter")?;
        Ok(Self {
            client,
            registers: cfg.registers.clone(),
        })
    }

    fn mode_value(&self, mode: OperationMode) -> u16 {
        match mode {
            OperationMode::Charge => self.registers.charge_mode_value,
            OperationMode::Idle => self.registers.idle_mode_value,
        }
    }
}

#[async_trait]
impl InverterClient for ModbusInverter {
    async fn read_battery_level(&self) -> Result<u8> {
        let regs = self.client.read_holding_registers(self.registers.battery_soc, 1).await?;
        let soc = parser::parse_u16(&regs)?;
        Ok(soc.min(100) as u8)
    }

    async fn read_pv_and_consumption(&self) -> Result<(f64, f64)> {
        let pv = self.client.read_holding_registers(self.registers.pv_power, 2).await?;
        let load = self.client.read_holding_registers(self.registers.house_load, 2).await?;
        let ppv = f64::from(parser::parse_u32(&pv)?);
        let consumption = f64::from(parser::parse_i32(&load)?);
        debug!(ppv, consumption, addr = self.client.addr(), "inverter power sample");
        Ok((ppv, consumption))
    }

    async fn get_operation_mode(&self) -> Result<OperationMode> {
        let regs = self.client.read_holding_registers(self.registers.work_mode, 1).await?;
        let value = parser::parse_u16(&regs)?;
        if value == self.registers.charge_mode_value {
            Ok(OperationMode::Charge)
        } else if value == self.registers.idle_mode_value {
            Ok(OperationMode::Idle)
        } else {
            bail!("unknown inverter work mode {value}")
        }
    }

    async fn set_operation_mode(&self, mode: OperationMode) -> Result<()> {
        self.client
            .write_single_register(self.registers.work_mode, self.mode_value(mode))
            .await
    }
}
