use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::AssessError;
use crate::events::ndjson_stream;
use crate::log_capture::{LogLevel, LogSource};
use crate::pipeline::request::AssessRequest;
use crate::pipeline::RunHandle;
use crate::provider::PageMetricsProvider;
use crate::state::{ActiveRun, SharedState};

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// POST /assess — start a run and stream its events as NDJSON.
///
/// Validation failures answer 400 with a JSON error body and start nothing.
/// Closing the response body cancels the run.
pub async fn assess<P: PageMetricsProvider>(
    State(state): State<SharedState<P>>,
    Json(req): Json<AssessRequest>,
) -> Result<Response, AssessError> {
    let config = state.settings.read().await.resolve(&req.config);

    let handle = match state.pipeline.start(&req.url, config) {
        Ok(handle) => handle,
        Err(e) => {
            state
                .logs
                .emit(
                    LogSource::Server,
                    LogLevel::Warn,
                    format!("Rejected assessment of {:?}: {}", req.url, e),
                )
                .await;
            return Err(e);
        }
    };

    let RunHandle {
        id,
        events,
        status,
        stop,
        task,
    } = handle;

    state
        .register_run(id.clone(), ActiveRun { status, stop })
        .await;
    state
        .logs
        .emit(
            LogSource::Server,
            LogLevel::Info,
            format!("Assessment {} accepted for {}", id, req.url),
        )
        .await;

    let registry = state.clone();
    tokio::spawn(async move {
        let _ = task.await;
        registry.forget_run(&id).await;
    });

    Ok((
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(ndjson_stream(events)),
    )
        .into_response())
}
