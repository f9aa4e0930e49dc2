use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use super::ApiState;
use crate::controller::{LoopName, LoopStatus};
use crate::domain::Settings;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    loops: Vec<LoopHealth>,
}

/// Health of one named loop
#[derive(Debug, Serialize)]
pub struct LoopHealth {
    name: LoopName,
    enabled: bool,
    running: bool,
    status: String,
}

impl LoopHealth {
    fn from_status(status: &LoopStatus, enabled: bool) -> Self {
        let healthy = status.running || !enabled;
        Self {
            name: status.name,
            enabled,
            running: status.running,
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        }
    }

    fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

fn enabled(settings: &Settings, name: LoopName) -> bool {
    match name {
        LoopName::BatteryCharging => settings.battery_enabled,
        LoopName::Boiler => settings.boiler_enabled,
        LoopName::CarCharging => settings.car_enabled,
    }
}

/// GET /health
///
/// Degraded when an enabled loop is no longer running, e.g. after the
/// battery loop gave up on the price source.
pub async fn health_check(State(state): State<ApiState>) -> impl IntoResponse {
    let settings = state.settings.read().await.clone();
    let loops: Vec<LoopHealth> = state
        .controllers
        .supervisor()
        .statuses()
        .await
        .iter()
        .map(|s| LoopHealth::from_status(s, enabled(&settings, s.name)))
        .collect();

    let all_healthy = loops.iter().all(LoopHealth::is_healthy);
    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now(),
        loops,
    };
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    tracing::debug!(healthy = all_healthy, "Health check completed");

    (status_code, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support;
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn test_disabled_loop_is_healthy_when_stopped() {
        let status = LoopStatus {
            name: LoopName::Boiler,
            running: false,
            params: None,
        };
        assert!(LoopHealth::from_status(&status, false).is_healthy());
        assert!(!LoopHealth::from_status(&status, true).is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_reports_stopped_enabled_loops() {
        // defaults enable boiler and car, but nothing was applied yet
        let st = test_support::state(Settings::default());
        let app = Router::new()
            .route("/health", get(health_check))
            .with_state(st.clone());
        let resp = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        st.controllers.apply(&Settings::default()).await.unwrap();
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        st.controllers.shutdown().await;
    }
}
