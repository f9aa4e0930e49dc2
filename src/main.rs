use anyhow::Result;
use energy_flow::{api, config, controller, hardware, telemetry};
use config::Config;
use std::sync::Arc;
use telemetry::init_tracing;
use tracing::{error, info, warn};
use validator::Validate;

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e.into());
        }
    }
    init_tracing();

    let cfg = Config::load()?;
    cfg.settings.validate()?;

    let devices = hardware::DeviceFactory::new(&cfg).build().await?;
    let supervisor = Arc::new(controller::TaskSupervisor::new());
    let controllers = Arc::new(controller::Controllers::new(
        supervisor.clone(),
        devices,
        controller::LoopTuning::from_config(&cfg),
    ));

    let mut settings = cfg.settings.clone();
    if let Err(e) = controllers.apply(&settings).await {
        // keep serving so the operator can fix the settings through the API
        error!(error = %e, "initial settings rejected, battery loop not started");
        settings.battery_enabled = false;
        controllers.apply(&settings).await?;
    }

    let app = api::router(api::ApiState::new(controllers.clone(), settings), &cfg);
    let addr = cfg.server.socket_addr()?;
    if cfg.server.host == "0.0.0.0" {
        warn!("server binding to 0.0.0.0, the settings API is reachable from the network");
    }
    info!(%addr, mode = ?cfg.hardware.mode, "starting energy flow controller");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    controllers.shutdown().await;
    warn!("shutdown complete");
    Ok(())
}
