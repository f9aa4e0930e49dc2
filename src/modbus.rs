#[cfg(feature = "modbus")]
pub mod client {
    use anyhow::{Context as AnyhowContext, Result};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio::time::timeout;
    use tokio_modbus::client::tcp;
    use tokio_modbus::prelude::*;
    use tracing::{debug, warn};

    const MAX_RETRIES: u32 = 3;

    /// Shared Modbus TCP connection to one unit
    #[derive(Clone)]
    pub struct ModbusClient {
        context: Arc<Mutex<tokio_modbus::client::Context>>,
        unit_id: u8,
        addr: String,
        timeout_duration: Duration,
    }

    impl ModbusClient {
        pub async fn connect_with_timeout(addr: &str, unit_id: u8, timeout_duration: Duration) -> Result<Self> {
            let socket_addr = addr.parse().context("Invalid address format")?;
            debug!(addr, unit_id, "connecting to modbus device");

            let ctx = timeout(timeout_duration, tcp::connect(socket_addr))
                .await
                .context("Connection timeout")?
                .context("Failed to connect")?;

            Ok(Self {
                context: Arc::new(Mutex::new(ctx)),
                unit_id,
                addr: addr.to_string(),
                timeout_duration,
            })
        }

        pub fn addr(&self) -> &str {
            &self.addr
        }

        /// Read holding registers, retrying timeouts and I/O errors
        pub async fn read_holding_registers(&self, start: u16, count: u16) -> Result<Vec<u16>> {
            let mut last_error = None;
            for attempt in 1..=MAX_RETRIES {
                let mut ctx = self.context.lock().await;
                ctx.set_slave(Slave(self.unit_id));
                match timeout(self.timeout_duration, ctx.read_holding_registers(start, count)).await {
                    Ok(Ok(regs)) => return Ok(regs),
                    Ok(Err(e)) => {
                        warn!(register = start, attempt, error = %e, "modbus read failed");
                        last_error = Some(anyhow::Error::from(e));
                    }
                    Err(_) => {
                        warn!(register = start, attempt, "modbus read timed out");
                        last_error = Some(anyhow::anyhow!("timeout"));
                    }
                }
                drop(ctx);
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
            }
            Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no attempt made")))
                .with_context(|| format!("Failed to read holding registers at {start}"))
        }

        pub async fn write_single_register(&self, register: u16, value: u16) -> Result<()> {
            let mut last_error = None;
            for attempt in 1..=MAX_RETRIES {
                let mut ctx = self.context.lock().await;
                ctx.set_slave(Slave(self.unit_id));
                match timeout(self.timeout_duration, ctx.write_single_register(register, value)).await {
                    Ok(Ok(())) => return Ok(()),
                    Ok(Err(e)) => {
                        warn!(register, attempt, error = %e, "modbus write failed");
                        last_error = Some(anyhow::Error::from(e));
                    }
                    Err(_) => {
                        warn!(register, attempt, "modbus write timed out");
                        last_error = Some(anyhow::anyhow!("timeout"));
                    }
                }
                drop(ctx);
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
            }
            Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no attempt made")))
                .with_context(|| format!("Failed to write register at {register}"))
        }
    }
}

/// Register decoding helpers. Multi-register values are big-endian, high
/// word first.
#[cfg(feature = "modbus")]
pub mod parser {
    use anyhow::{ensure, Result};

    pub fn parse_u16(registers: &[u16]) -> Result<u16> {
        ensure!(!registers.is_empty(), "expected 1 register, got none");
        Ok(registers[0])
    }

    pub fn parse_u32(registers: &[u16]) -> Result<u32> {
        ensure!(registers.len() >= 2, "expected 2 registers, got {}", registers.len());
        Ok((u32::from(registers[0]) << 16) | u32::from(registers[1]))
    }

    pub fn parse_i32(registers: &[u16]) -> Result<i32> {
        parse_u32(registers).map(|v| v as i32)
    }

}

#[cfg(not(feature = "modbus"))]
pub mod client {}

#[cfg(not(feature = "modbus"))]
pub mod parser {}
