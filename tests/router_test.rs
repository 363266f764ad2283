mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use common::{test_config, ScriptedProvider};
use sitepulse::config::ProbeMode;
use sitepulse::events::{decode_line, Event};
use sitepulse::server::build_router;
use sitepulse::state::{AppState, SharedState};

fn make_state(settings_dir: Option<&TempDir>) -> SharedState<ScriptedProvider> {
    let mut config = test_config(ProbeMode::Simulated);
    config.settings_file = settings_dir.map(|d| d.path().join("settings.json"));
    Arc::new(AppState::new(config, Arc::new(ScriptedProvider::new())))
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = build_router(make_state(None));
    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "idle");
    assert_eq!(json["provider"], "scripted");
    assert_eq!(json["probe_mode"], "simulated");
}

#[tokio::test]
async fn test_assess_rejects_invalid_url() {
    let app = build_router(make_state(None));
    let resp = app
        .oneshot(json_request(
            "POST",
            "/assess",
            serde_json::json!({"url": "not a url"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn test_assess_streams_ndjson() {
    let state = make_state(None);
    let app = build_router(state.clone());
    let resp = app
        .oneshot(json_request(
            "POST",
            "/assess",
            serde_json::json!({
                "url": "example.com",
                "config": {"stages": ["load_time", "mobile"]}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/x-ndjson"
    );

    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let events: Vec<Event> = text.lines().map(|l| decode_line(l).unwrap()).collect();

    assert!(events.len() >= 4);
    match events.last().unwrap() {
        Event::Final { progress, results, .. } => {
            assert_eq!(*progress, 100);
            assert_eq!(results.url, "https://example.com/");
            assert!(results.metrics.mobile_score.is_some());
        }
        other => panic!("expected final event, got {:?}", other),
    }

    let history = state.logs.history().await;
    assert!(history.iter().any(|e| e.message.contains("accepted")));
}

#[tokio::test]
async fn test_runs_and_cancel_unknown() {
    let app = build_router(make_state(None));
    let resp = app
        .clone()
        .oneshot(Request::get("/runs").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, serde_json::json!([]));

    let resp = app
        .oneshot(
            Request::post("/runs/does-not-exist/cancel")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["error"], "not_found");
}

#[tokio::test]
async fn test_settings_roundtrip_and_persist() {
    let dir = TempDir::new().unwrap();
    let state = make_state(Some(&dir));
    let app = build_router(state.clone());

    let resp = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/settings",
            serde_json::json!({"defaults": {"concurrent": 5, "duration": 2}}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(dir.path().join("settings.json").exists());

    let resp = app
        .clone()
        .oneshot(Request::get("/settings").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["defaults"]["concurrent"], 5);
    assert_eq!(json["defaults"]["duration"], 2);

    let resp = app
        .oneshot(json_request(
            "PUT",
            "/settings",
            serde_json::json!({"defaults": {"concurrent": 0}}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        state.settings.read().await.defaults.concurrent,
        Some(5),
        "rejected settings must not replace the stored ones"
    );
}

#[tokio::test]
async fn test_log_history() {
    let state = make_state(None);
    state
        .logs
        .emit(
            sitepulse::log_capture::LogSource::Server,
            sitepulse::log_capture::LogLevel::Info,
            "hello",
        )
        .await;
    let app = build_router(state);
    let resp = app
        .oneshot(
            Request::get("/logs/history?limit=10")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["entries"][0]["message"], "hello");
    assert_eq!(json["entries"][0]["source"], "server");
}
