use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::provider::PageMetricsProvider;
use crate::routes::{assess, health, logs, runs, settings};
use crate::state::SharedState;

pub fn build_router<P: PageMetricsProvider>(state: SharedState<P>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health::health::<P>))
        // Assessments
        .route("/assess", post(assess::assess::<P>))
        .route("/runs", get(runs::list_runs::<P>))
        .route("/runs/{id}/cancel", post(runs::cancel_run::<P>))
        // Settings
        .route(
            "/settings",
            get(settings::get_settings::<P>).put(settings::put_settings::<P>),
        )
        // Logs
        .route("/logs/history", get(logs::log_history::<P>))
        .route("/logs/stream", get(logs::log_stream::<P>))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}
