use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::config::ProbeMode;
use crate::provider::PageMetricsProvider;
use crate::state::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub provider: String,
    pub probe_mode: ProbeMode,
    pub active_runs: usize,
    pub in_flight_operations: usize,
    pub limits: LimitsInfo,
    pub uptime_secs: i64,
}

#[derive(Serialize)]
pub struct LimitsInfo {
    pub max_concurrency: u32,
    pub max_duration: u64,
}

/// Overall status label from the number of open runs.
pub fn determine_overall_status(active_runs: usize) -> &'static str {
    if active_runs == 0 {
        "idle"
    } else {
        "busy"
    }
}

/// GET /health
pub async fn health<P: PageMetricsProvider>(
    State(state): State<SharedState<P>>,
) -> Json<HealthResponse> {
    let active_runs = state.runs.read().await.len();
    let (max_concurrency, max_duration) = state.pipeline.limits();

    Json(HealthResponse {
        status: determine_overall_status(active_runs).to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        provider: state.pipeline.provider().name().to_string(),
        probe_mode: state.config.probe_mode,
        active_runs,
        in_flight_operations: state.pipeline.tracker().in_flight(),
        limits: LimitsInfo {
            max_concurrency,
            max_duration,
        },
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}
