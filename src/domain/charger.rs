use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

/// Command accepted by the EV charger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChargerCommand {
    SetCurrent(u32),
    Enable,
    Disable,
}

/// Fire-and-forget command sink in front of the EV charger
#[async_trait]
pub trait ChargerCommandSink: Send + Sync {
    async fn set_current(&self, amps: u32) -> Result<()>;
    async fn enable(&self) -> Result<()>;
    async fn disable(&self) -> Result<()>;
}

/// Drives the charger through the `evcc` command line tool
#[derive(Debug, Clone)]
pub struct EvccChargerSink {
    program: String,
}

impl EvccChargerSink {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        debug!(program = %self.program, ?args, "invoking charger tool");
        let status = Command::new(&self.program)
            .arg("charger")
            .args(args)
            .status()
            .await
            .with_context(|| format!("failed to spawn {}", self.program))?;
        if !status.success() {
            anyhow::bail!("{} charger {} exited with {status}", self.program, args.join(" "));
        }
        Ok(())
    }
}

#[async_trait]
impl ChargerCommandSink for EvccChargerSink {
    async fn set_current(&self, amps: u32) -> Result<()> {
        self.run(&["-i", &amps.to_string()]).await
    }

    async fn enable(&self) -> Result<()> {
        self.run(&["-e"]).await
    }

    async fn disable(&self) -> Result<()> {
        self.run(&["-d"]).await
    }
}

/// Records every command it receives
#[derive(Debug, Default)]
pub struct SimulatedCharger {
    commands: Mutex<Vec<ChargerCommand>>,
}

impl SimulatedCharger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<ChargerCommand> {
        self.commands.lock().clone()
    }

    pub fn last_command(&self) -> Option<ChargerCommand> {
        self.commands.lock().last().copied()
    }
}

#[async_trait]
impl ChargerCommandSink for SimulatedCharger {
    async fn set_current(&self, amps: u32) -> Result<()> {
        self.commands.lock().push(ChargerCommand::SetCurrent(amps));
        Ok(())
    }

    async fn enable(&self) -> Result<()> {
        self.commands.lock().push(ChargerCommand::Enable);
        Ok(())
    }

    async fn disable(&self) -> Result<()> {
        self.commands.lock().push(ChargerCommand::Disable);
        Ok(())
    }
}
