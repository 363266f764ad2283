use axum::extract::{Path, State};
use axum::Json;

use crate::error::AssessError;
use crate::pipeline::context::RunStatus;
use crate::provider::PageMetricsProvider;
use crate::state::SharedState;

/// GET /runs — runs whose streams are still open.
pub async fn list_runs<P: PageMetricsProvider>(
    State(state): State<SharedState<P>>,
) -> Json<Vec<RunStatus>> {
    Json(state.list_runs().await)
}

/// POST /runs/{id}/cancel — stop a run; it ends without a report.
pub async fn cancel_run<P: PageMetricsProvider>(
    State(state): State<SharedState<P>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AssessError> {
    state.cancel_run(&id).await?;
    Ok(Json(serde_json::json!({
        "status": "cancelling",
        "id": id,
    })))
}
