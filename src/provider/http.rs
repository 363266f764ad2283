use reqwest::header::USER_AGENT;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

use super::html::{count_subresources, scan_document};
use super::{
    BrowserProfile, DeviceProfile, HeadOutcome, NavigationTimings, PageMetricsProvider,
    PageSnapshot, ResourceStats,
};
use crate::config::NAVIGATION_TIMEOUT_SECS;
use crate::error::ProviderError;

/// Plain HTTP provider: fetches the document with reqwest and derives
/// timings and structure from the response. No paint or web-vitals data.
#[derive(Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(NAVIGATION_TIMEOUT_SECS))
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

pub(crate) fn classify_reqwest_error(e: reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Navigation(e.to_string())
    }
}

impl PageMetricsProvider for HttpProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn head(
        &self,
        url: &Url,
        browser: BrowserProfile,
        timeout: Duration,
    ) -> Result<HeadOutcome, ProviderError> {
        let start = Instant::now();
        let resp = self
            .client
            .head(url.as_str())
            .header(USER_AGENT, browser.user_agent())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, timeout))?;

        Ok(HeadOutcome {
            status: resp.status().as_u16(),
            elapsed: start.elapsed(),
        })
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
            .get(url.as_str())
            .header(USER_AGENT, device.user_agent())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, timeout))?;

        let ttfb_ms = start.elapsed().as_secs_f64() * 1000.0;
        let status = resp.status().as_u16();
        let final_url = resp.url().clone();
        let is_html = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("html"))
            .unwrap_or(true);

        let body = resp
            .text()
            .await
            .map_err(|e| classify_reqwest_error(e, timeout))?;
        let elapsed = start.elapsed();
        let total_ms = elapsed.as_secs_f64() * 1000.0;

        debug!(
            "GET {} ({:?}) -> {} in {:.0}ms, {} bytes",
            url,
            device,
            status,
            total_ms,
            body.len()
        );

        // The request was made under `device`, so that profile's viewport is
        // the width the document was served for.
        let document = is_html.then(|| {
            let mut facts = scan_document(&body, &final_url);
            facts.viewport_width = Some(device.viewport_width());
            facts
        });
        let subresources = if is_html { count_subresources(&body) } else { 0 };

        Ok(PageSnapshot {
            status,
            elapsed,
            timings: NavigationTimings {
                ttfb_ms: Some(ttfb_ms),
                load_complete_ms: Some(total_ms),
                ..Default::default()
            },
            resources: ResourceStats {
                count: subresources + 1,
                total_transfer_bytes: body.len() as u64,
                slowest_ms: total_ms,
            },
            web_vitals: None,
            document,
        })
    }
}
