mod common;

use std::collections::BTreeSet;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_stream::StreamExt;

use common::{fast_tuning, ScriptedProvider};
use sitepulse::config::{PipelineTuning, ProbeMode};
use sitepulse::events::Event;
use sitepulse::pipeline::request::TestConfig;
use sitepulse::pipeline::Pipeline;
use sitepulse::provider::DocumentFacts;
use sitepulse::scoring::{IssueCategory, Report};
use sitepulse::stages::StageKind;

fn pipeline(provider: ScriptedProvider, mode: ProbeMode) -> (Pipeline<ScriptedProvider>, Arc<ScriptedProvider>) {
    let provider = Arc::new(provider);
    let pipeline = Pipeline::new(provider.clone())
        .with_tuning(fast_tuning())
        .with_mode(mode);
    (pipeline, provider)
}

fn config(stages: &[StageKind], concurrent: u32, duration: u64) -> TestConfig {
    TestConfig {
        concurrent,
        duration,
        stages: stages.iter().copied().collect::<BTreeSet<_>>(),
        ..TestConfig::default()
    }
}

async fn collect(pipeline: &Pipeline<ScriptedProvider>, url: &str, config: TestConfig) -> Vec<Event> {
    let stream = pipeline.run(url, config).expect("valid request");
    tokio::time::timeout(Duration::from_secs(20), stream.collect::<Vec<_>>())
        .await
        .expect("run finished")
}

fn final_report(events: &[Event]) -> &Report {
    match events.last() {
        Some(Event::Final { results, .. }) => results,
        other => panic!("expected final event, got {:?}", other),
    }
}

fn assert_monotonic_to_100(events: &[Event]) {
    let progress: Vec<u8> = events.iter().filter_map(|e| e.progress()).collect();
    assert!(!progress.is_empty());
    assert!(
        progress.windows(2).all(|w| w[0] <= w[1]),
        "progress regressed: {:?}",
        progress
    );
    assert_eq!(*progress.last().unwrap(), 100);
}

#[tokio::test]
async fn test_full_measured_run() {
    let document = DocumentFacts {
        links: vec![
            "https://example.com/about".to_string(),
            "https://example.com/gone".to_string(),
        ],
        has_viewport_meta: true,
        mobile_nav_elements: 1,
        has_lang: true,
        has_title: true,
        images_total: 2,
        images_missing_alt: 1,
        ..Default::default()
    };
    let provider = ScriptedProvider::new()
        .with_document(document)
        .with_head_status("https://example.com/gone", 404);
    let (pipeline, provider) = pipeline(provider, ProbeMode::Measured);

    let events = collect(&pipeline, "example.com", config(&StageKind::ALL, 3, 1)).await;
    assert_monotonic_to_100(&events);

    let report = final_report(&events);
    assert_eq!(report.url, "https://example.com/");
    assert!(report.score <= 100);
    assert_eq!(report.metrics.broken_links, vec!["https://example.com/gone"]);
    assert_eq!(report.metrics.mobile_score, Some(100));
    assert_eq!(report.metrics.accessibility_violations, Some(1));
    assert_eq!(report.metrics.page_requests, Some(12));
    assert!(report.metrics.speed_index.is_some());
    assert!(report.degraded.is_empty());

    let total = report.metrics.total_requests.unwrap();
    assert!(total > 0);
    assert_eq!(total % 3, 0, "every batch issues exactly `concurrent` requests");
    assert_eq!(report.metrics.failed_requests, Some(0));

    // HEAD for the load-time probe plus one per link.
    assert_eq!(provider.head_calls(), 3);
    assert_eq!(pipeline.tracker().in_flight(), 0);
    assert_eq!(provider.open_pages(), 0);
}

#[tokio::test]
async fn test_events_carry_partial_metrics() {
    let (pipeline, _provider) = pipeline(ScriptedProvider::new(), ProbeMode::Simulated);
    let events = collect(
        &pipeline,
        "example.com",
        config(&[StageKind::LoadTime, StageKind::Mobile], 1, 1),
    )
    .await;

    let keys: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            Event::Progress { metrics, .. } | Event::Metrics { metrics } => Some(metrics),
            _ => None,
        })
        .flat_map(|m| m.keys().cloned())
        .collect();
    assert!(keys.iter().any(|k| k == "loadTime"));
    assert!(keys.iter().any(|k| k == "mobileScore"));

    // At least one update inside the load-time stage before it completes.
    let inside = events.iter().any(|e| {
        matches!(e, Event::Progress { progress, metrics, .. }
            if *progress < 50 && metrics.contains_key("loadTimeSamples"))
    });
    assert!(inside);
}

#[tokio::test]
async fn test_private_host_skips_head_probe() {
    let (pipeline, provider) = pipeline(ScriptedProvider::new(), ProbeMode::Simulated);
    let events = collect(&pipeline, "localhost:3000", config(&[StageKind::LoadTime], 1, 1)).await;

    let report = final_report(&events);
    assert_eq!(report.url, "http://localhost:3000/");
    assert_eq!(report.metrics.load_time, Some(0.3));
    assert_eq!(provider.head_calls(), 0);
}

#[tokio::test]
async fn test_reachable_private_host_is_not_degraded() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let _ = listener.accept().await;
        }
    });

    let (pipeline, provider) = pipeline(ScriptedProvider::new(), ProbeMode::Simulated);
    let url = format!("127.0.0.1:{}", port);
    let events = collect(&pipeline, &url, config(&[StageKind::LoadTime], 1, 1)).await;

    let report = final_report(&events);
    assert!(report.degraded.is_empty());
    assert_eq!(provider.head_calls(), 0);
}

#[tokio::test]
async fn test_slow_head_falls_back_to_degraded_load_time() {
    // Slower than the one-second head timeout in the test tuning.
    let provider = ScriptedProvider::new().with_latency(Duration::from_millis(1500));
    let (pipeline, provider) = pipeline(provider, ProbeMode::Measured);
    let events = collect(&pipeline, "example.com", config(&[StageKind::LoadTime], 1, 1)).await;

    let report = final_report(&events);
    let load_time = report.metrics.load_time.unwrap();
    assert!((2.0..4.0).contains(&load_time), "fallback out of range: {}", load_time);
    assert_eq!(report.degraded, vec!["loadTime".to_string()]);
    assert_eq!(provider.head_calls(), 1);
    assert_eq!(pipeline.tracker().in_flight(), 0);
}

#[tokio::test]
async fn test_failed_head_falls_back_to_degraded_load_time() {
    let provider = ScriptedProvider::new().failing_head("https://example.com/");
    let (pipeline, _provider) = pipeline(provider, ProbeMode::Measured);
    let events = collect(&pipeline, "example.com", config(&[StageKind::LoadTime], 1, 1)).await;

    let report = final_report(&events);
    let load_time = report.metrics.load_time.unwrap();
    assert!((2.0..4.0).contains(&load_time), "fallback out of range: {}", load_time);
    assert_eq!(report.degraded, vec!["loadTime".to_string()]);
    assert!(report
        .issues
        .iter()
        .any(|i| i.category == IssueCategory::LoadTime));
}

#[tokio::test]
async fn test_unreachable_link_counts_as_broken() {
    let document = DocumentFacts {
        links: vec![
            "https://example.com/about".to_string(),
            "https://example.com/down".to_string(),
        ],
        has_lang: true,
        has_title: true,
        ..Default::default()
    };
    let provider = ScriptedProvider::new()
        .with_document(document)
        .failing_head("https://example.com/down");
    let (pipeline, provider) = pipeline(provider, ProbeMode::Measured);
    let events = collect(&pipeline, "example.com", config(&[StageKind::LinkIntegrity], 1, 1)).await;
    assert_monotonic_to_100(&events);

    let report = final_report(&events);
    assert_eq!(report.metrics.links_checked, Some(2));
    assert_eq!(report.metrics.broken_links, vec!["https://example.com/down"]);
    assert!(report.degraded.is_empty());
    assert_eq!(provider.head_calls(), 2);
}

#[tokio::test]
async fn test_link_scan_reports_progress_without_links() {
    let (pipeline, provider) = pipeline(ScriptedProvider::new(), ProbeMode::Measured);
    let events = collect(&pipeline, "example.com", config(&[StageKind::LinkIntegrity], 1, 1)).await;

    // Only the in-stage updates carry a running broken-link count.
    let reported_checks = events.iter().any(|e| match e {
        Event::Progress { metrics, .. } => metrics.get("brokenLinkCount") == Some(&json!(0)),
        _ => false,
    });
    assert!(reported_checks, "no intermediate link progress: {:?}", events);
    assert_eq!(final_report(&events).metrics.links_checked, Some(0));
    assert_eq!(provider.head_calls(), 0);
}

#[tokio::test]
async fn test_link_chunks_are_paced() {
    let document = DocumentFacts {
        links: (0..12)
            .map(|i| format!("https://example.com/page-{}", i))
            .collect(),
        ..Default::default()
    };
    let provider = Arc::new(ScriptedProvider::new().with_document(document));
    let pipeline = Pipeline::new(provider.clone())
        .with_tuning(PipelineTuning {
            update_delay: Duration::from_millis(150),
            ..fast_tuning()
        })
        .with_mode(ProbeMode::Measured);

    let started = Instant::now();
    let events = collect(&pipeline, "example.com", config(&[StageKind::LinkIntegrity], 1, 1)).await;

    // Twelve links make two chunks of ten and two, each followed by a pause.
    assert!(started.elapsed() >= Duration::from_millis(300));
    let chunk_updates = events
        .iter()
        .filter(|e| matches!(e, Event::Progress { metrics, .. } if metrics.contains_key("brokenLinkCount")))
        .count();
    assert_eq!(chunk_updates, 2);
    assert_eq!(final_report(&events).metrics.links_checked, Some(12));
    assert_eq!(provider.head_calls(), 12);
}

#[tokio::test]
async fn test_simulated_probes() {
    let (pipeline, provider) = pipeline(ScriptedProvider::new(), ProbeMode::Simulated);
    let events = collect(
        &pipeline,
        "example.com",
        config(&[StageKind::LinkIntegrity, StageKind::Mobile], 1, 1),
    )
    .await;
    assert_monotonic_to_100(&events);

    let report = final_report(&events);
    let mobile = report.metrics.mobile_score.unwrap();
    assert!((70..=100).contains(&mobile));
    assert_eq!(report.metrics.links_checked, Some(20));
    assert_eq!(provider.navigate_calls(), 0);
}

#[tokio::test]
async fn test_provider_unavailable_fails_run() {
    let (pipeline, _provider) = pipeline(ScriptedProvider::new().unavailable(), ProbeMode::Simulated);
    let events = collect(
        &pipeline,
        "example.com",
        config(&[StageKind::Mobile, StageKind::LoadTest], 2, 1),
    )
    .await;

    assert!(!events.iter().any(|e| matches!(e, Event::Final { .. })));
    match events.last() {
        Some(Event::Failure { error, .. }) => assert_eq!(error, "provider_unavailable"),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn test_invalid_input_rejected_before_start() {
    let (pipeline, provider) = pipeline(ScriptedProvider::new(), ProbeMode::Simulated);
    for url in ["", "not a url", "ftp://example.com", "localhost"] {
        let err = pipeline.start(url, TestConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "validation_error", "{:?}", url);
    }
    let err = pipeline
        .start("example.com", config(&[StageKind::LoadTest], 0, 1))
        .unwrap_err();
    assert_eq!(err.kind(), "validation_error");
    assert_eq!(provider.navigate_calls(), 0);
}

#[tokio::test]
async fn test_disconnect_releases_resources() {
    let provider = ScriptedProvider::new().with_latency(Duration::from_millis(200));
    let (pipeline, provider) = pipeline(provider, ProbeMode::Simulated);

    let mut handle = pipeline
        .start("example.com", config(&[StageKind::LoadTest], 8, 30))
        .unwrap();

    // Wait until the load test has navigations in flight.
    let first = handle.events.recv().await.unwrap();
    assert!(matches!(first, Event::Progress { .. }));
    tokio::time::timeout(Duration::from_secs(2), async {
        while provider.open_pages() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("navigations started");

    drop(handle.events);
    tokio::time::timeout(Duration::from_secs(2), handle.task)
        .await
        .expect("run aborted promptly")
        .unwrap();

    assert_eq!(pipeline.tracker().in_flight(), 0);
    assert_eq!(provider.open_pages(), 0);
    assert!(handle.status.borrow().finished);
}

#[tokio::test]
async fn test_stop_request_ends_without_report() {
    let provider = ScriptedProvider::new().with_latency(Duration::from_millis(100));
    let (pipeline, provider) = pipeline(provider, ProbeMode::Simulated);

    let mut handle = pipeline
        .start("example.com", config(&[StageKind::LoadTest], 4, 30))
        .unwrap();
    let _ = handle.events.recv().await.unwrap();
    handle.stop.send(true).unwrap();

    let mut rest = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(2), handle.events.recv())
        .await
        .expect("stream closed after stop")
    {
        rest.push(event);
    }

    assert!(!rest.iter().any(|e| matches!(e, Event::Final { .. })));
    match rest.last() {
        Some(Event::Failure { error, .. }) => assert_eq!(error, "cancelled"),
        other => panic!("expected cancellation notice, got {:?}", other),
    }
    assert_eq!(pipeline.tracker().in_flight(), 0);
    assert_eq!(provider.open_pages(), 0);
}

#[tokio::test]
async fn test_stop_notice_reaches_slow_reader() {
    let (pipeline, _provider) = pipeline(ScriptedProvider::new(), ProbeMode::Simulated);
    let mut handle = pipeline
        .start("example.com", config(&[StageKind::LoadTest], 2, 30))
        .unwrap();

    // Leave the stream unread until the run has filled its event buffer.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    handle.stop.send(true).unwrap();

    let mut events = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(5), handle.events.recv())
        .await
        .expect("stream closed after stop")
    {
        events.push(event);
    }

    assert!(events.len() > 64, "buffer never filled: {} events", events.len());
    assert!(!events.iter().any(|e| matches!(e, Event::Final { .. })));
    match events.last() {
        Some(Event::Failure { error, .. }) => assert_eq!(error, "cancelled"),
        other => panic!("expected cancellation notice, got {:?}", other),
    }
    assert_eq!(pipeline.tracker().in_flight(), 0);
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let (pipeline, _provider) = pipeline(ScriptedProvider::new(), ProbeMode::Simulated);
    let a = pipeline.run("example.com", config(&[StageKind::Mobile], 1, 1)).unwrap();
    let b = pipeline
        .run("localhost:8080", config(&[StageKind::LoadTime], 1, 1))
        .unwrap();

    let (a, b) = tokio::join!(a.collect::<Vec<_>>(), b.collect::<Vec<_>>());
    assert_monotonic_to_100(&a);
    assert_monotonic_to_100(&b);
    assert_eq!(final_report(&a).url, "https://example.com/");
    assert_eq!(final_report(&b).url, "http://localhost:8080/");
    assert!(final_report(&a).metrics.load_time.is_none());
    assert!(final_report(&b).metrics.mobile_score.is_none());
}
