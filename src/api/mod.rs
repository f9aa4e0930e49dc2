pub mod error;
pub mod health;
pub mod v1;

use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{config::Config, controller::Controllers, domain::Settings};

/// Shared state behind every handler
#[derive(Clone)]
pub struct ApiState {
    pub controllers: Arc<Controllers>,
    /// Settings the running loops were last started from
    pub settings: Arc<RwLock<Settings>>,
}

impl ApiState {
    pub fn new(controllers: Arc<Controllers>, settings: Settings) -> Self {
        Self {
            controllers,
            settings: Arc::new(RwLock::new(settings)),
        }
    }
}

pub fn router(state: ApiState, cfg: &Config) -> Router {
    Router::new()
        .nest("/api/v1", v1::router())
        .route("/health", get(health::health_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(64 * 1024))
                .layer(TimeoutLayer::new(Duration::from_secs(cfg.server.request_timeout_secs))),
        )
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::controller::{Devices, LoopTuning, TaskSupervisor};
    use crate::domain::{SimulatedCharger, SimulatedInverter, SimulatedPlug};
    use crate::forecast::StaticPriceSource;

    pub fn state(settings: Settings) -> ApiState {
        let devices = Devices {
            inverter: Arc::new(SimulatedInverter::default_inverter()),
            plug: Arc::new(SimulatedPlug::new()),
            charger: Arc::new(SimulatedCharger::new()),
            prices: Arc::new(StaticPriceSource::typical_day()),
        };
        let controllers = Controllers::new(Arc::new(TaskSupervisor::new()), devices, LoopTuning::immediate());
        ApiState::new(Arc::new(controllers), settings)
    }
}
