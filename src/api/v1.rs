use axum::{extract::State, routing::get, Json, Router};
use tracing::info;
use validator::Validate;

use super::{error::ApiError, ApiState};
use crate::{controller::LoopStatus, domain::Settings};

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/settings", get(get_settings).put(put_settings))
        .route("/loops", get(list_loops))
}

pub async fn get_settings(State(st): State<ApiState>) -> Json<Settings> {
    Json(st.settings.read().await.clone())
}

/// Validate, restart the affected loops, then remember the new settings.
/// Saves are serialised by the settings lock.
pub async fn put_settings(
    State(st): State<ApiState>,
    Json(settings): Json<Settings>,
) -> Result<Json<Settings>, ApiError> {
    settings.validate()?;
    let mut current = st.settings.write().await;
    st.controllers.apply(&settings).await?;
    info!(?settings, "settings saved");
    *current = settings.clone();
    Ok(Json(settings))
}

pub async fn list_loops(State(st): State<ApiState>) -> Json<Vec<LoopStatus>> {
    Json(st.controllers.supervisor().statuses().await)
}
