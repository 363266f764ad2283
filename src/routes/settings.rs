use axum::extract::State;
use axum::Json;
use tracing::info;

use crate::error::AssessError;
use crate::log_capture::{LogLevel, LogSource};
use crate::provider::PageMetricsProvider;
use crate::settings::{save_settings, settings_path, PersistentSettings};
use crate::pipeline::request::TestConfigOverrides;
use crate::state::SharedState;

/// GET /settings
pub async fn get_settings<P: PageMetricsProvider>(
    State(state): State<SharedState<P>>,
) -> Json<PersistentSettings> {
    Json(state.settings.read().await.clone())
}

/// PUT /settings — replace the stored request defaults. The new defaults
/// must resolve to a valid configuration on their own.
pub async fn put_settings<P: PageMetricsProvider>(
    State(state): State<SharedState<P>>,
    Json(new_settings): Json<PersistentSettings>,
) -> Result<Json<PersistentSettings>, AssessError> {
    let (max_concurrency, max_duration) = state.pipeline.limits();
    new_settings
        .resolve(&TestConfigOverrides::default())
        .validate(max_concurrency, max_duration)?;

    if let Some(path) = settings_path(&state.config) {
        save_settings(&path, &new_settings)?;
        info!("Saved settings to {:?}", path);
    }

    *state.settings.write().await = new_settings.clone();
    state
        .logs
        .emit(LogSource::Server, LogLevel::Info, "Settings updated")
        .await;
    Ok(Json(new_settings))
}
