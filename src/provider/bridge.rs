use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use super::http::classify_reqwest_error;
use super::{
    BrowserProfile, DeviceProfile, DocumentFacts, HeadOutcome, HttpProvider, NavigationTimings,
    PageMetricsProvider, PageSnapshot, ResourceStats, WebVitals,
};
use crate::config::BRIDGE_COLLECTION_WINDOW_MS;
use crate::error::ProviderError;

/// Provider backed by an external browser-automation bridge.
///
/// The bridge drives a real browser: `POST {base}/navigate` loads the page
/// under the requested device profile, observes paint and layout-shift
/// entries for a bounded collection window and answers with
///
/// ```text
/// { "success": true, "data": {
///     "status": 200,
///     "navigation": { "ttfbMs", "domInteractiveMs", "domContentLoadedMs", "domCompleteMs", "loadEventMs" },
///     "paint": [ { "name": "first-contentful-paint", "startTime": 412.0 } ],
///     "resources": [ { "transferSize": 1024, "duration": 80.0 } ],
///     "vitals": { "lcp": 900.0, "fid": null, "cls": 0.02 },
///     "document": { ...DocumentFacts... },
///     "viewportWidth": 375 } }
/// ```
///
/// HEAD probes do not need a browser and go straight over HTTP.
pub struct BridgeProvider {
    base: String,
    client: reqwest::Client,
    http: HttpProvider,
    collection_window: Duration,
}

impl BridgeProvider {
    pub fn new(base: impl Into<String>, client: reqwest::Client) -> Self {
        let base: String = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: HttpProvider::with_client(client.clone()),
            client,
            collection_window: Duration::from_millis(BRIDGE_COLLECTION_WINDOW_MS),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

impl PageMetricsProvider for BridgeProvider {
    fn name(&self) -> &'static str {
        "bridge"
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        let resp = self
            .client
            .get(self.endpoint("/health"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("bridge unreachable: {}", e)))?;

        if !resp.status().is_success() {
            return Err(ProviderError::Unavailable(format!(
                "bridge health returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn head(
        &self,
        url: &Url,
        browser: BrowserProfile,
        timeout: Duration,
    ) -> Result<HeadOutcome, ProviderError> {
        self.http.head(url, browser, timeout).await
    }

    async fn navigate(
        &self,
        url: &Url,
        device: DeviceProfile,
        timeout: Duration,
    ) -> Result<PageSnapshot, ProviderError> {
        let start = Instant::now();
        let resp = self
            .client
            .post(self.endpoint("/navigate"))
            .json(&serde_json::json!({
                "url": url.as_str(),
                "device": device,
                "viewportWidth": device.viewport_width(),
                "userAgent": device.user_agent(),
                "collectMs": self.collection_window.as_millis() as u64,
            }))
            .timeout(timeout + self.collection_window)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, timeout))?;

        if resp.status().as_u16() == 503 {
            return Err(ProviderError::Unavailable("bridge has no browser".to_string()));
        }
        if !resp.status().is_success() {
            return Err(ProviderError::Navigation(format!(
                "bridge navigate returned {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Navigation(format!("bridge response: {}", e)))?;
        let elapsed = start.elapsed();

        let data = body.get("data").cloned().unwrap_or(serde_json::Value::Null);
        if data.is_null() {
            warn!("Bridge returned no data for {}", url);
        }
        let snapshot = snapshot_from_bridge(&data, elapsed);
        debug!(
            "bridge navigate {} ({:?}) -> {} in {:?}",
            url, device, snapshot.status, elapsed
        );
        Ok(snapshot)
    }
}

/// Convert a bridge `data` payload into a snapshot. Missing sections leave
/// the corresponding fields empty.
pub fn snapshot_from_bridge(data: &serde_json::Value, elapsed: Duration) -> PageSnapshot {
    let status = data
        .get("status")
        .and_then(|s| s.as_u64())
        .map(|s| s as u16)
        .unwrap_or(200);

    let mut document: Option<DocumentFacts> = data
        .get("document")
        .and_then(|d| serde_json::from_value(d.clone()).ok());
    if let Some(doc) = document.as_mut() {
        if doc.viewport_width.is_none() {
            doc.viewport_width = data
                .get("viewportWidth")
                .and_then(|w| w.as_u64())
                .map(|w| w as u32);
        }
    }

    PageSnapshot {
        status,
        elapsed,
        timings: extract_navigation_timing(data),
        resources: extract_resource_stats(data),
        web_vitals: extract_web_vitals(data),
        document,
    }
}

/// Navigation and paint timings from the bridge payload.
fn extract_navigation_timing(data: &serde_json::Value) -> NavigationTimings {
    let nav = data.get("navigation");
    let field = |name: &str| nav.and_then(|n| n.get(name)).and_then(|v| v.as_f64());

    let paint = |entry: &str| {
        data.get("paint")
            .and_then(|p| p.as_array())
            .and_then(|arr| {
                arr.iter()
                    .find(|e| e.get("name").and_then(|n| n.as_str()) == Some(entry))
                    .and_then(|e| e.get("startTime").and_then(|v| v.as_f64()))
            })
    };

    NavigationTimings {
        ttfb_ms: field("ttfbMs"),
        dom_interactive_ms: field("domInteractiveMs"),
        dom_content_loaded_ms: field("domContentLoadedMs"),
        dom_complete_ms: field("domCompleteMs"),
        load_complete_ms: field("loadEventMs"),
        first_paint_ms: paint("first-paint"),
        first_contentful_paint_ms: paint("first-contentful-paint"),
    }
}

/// Resource count, total transfer size and slowest resource duration.
fn extract_resource_stats(data: &serde_json::Value) -> ResourceStats {
    let Some(resources) = data.get("resources").and_then(|r| r.as_array()) else {
        return ResourceStats::default();
    };

    let total_transfer_bytes: u64 = resources
        .iter()
        .filter_map(|r| r.get("transferSize").and_then(|v| v.as_u64()))
        .sum();
    let slowest_ms: f64 = resources
        .iter()
        .filter_map(|r| r.get("duration").and_then(|v| v.as_f64()))
        .fold(0.0_f64, f64::max);

    ResourceStats {
        count: resources.len() as u32,
        total_transfer_bytes,
        slowest_ms,
    }
}

fn extract_web_vitals(data: &serde_json::Value) -> Option<WebVitals> {
    let vitals = data.get("vitals")?;
    let field = |name: &str| vitals.get(name).and_then(|v| v.as_f64());
    Some(WebVitals {
        largest_contentful_paint_ms: field("lcp"),
        first_input_delay_ms: field("fid"),
        cumulative_layout_shift: field("cls"),
    })
}
