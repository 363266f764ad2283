//! Page metrics providers: the capability the probes and the load generator
//! consume to navigate a URL and read back timing data.

pub mod bridge;
pub mod html;
pub mod http;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::ProviderError;

pub use bridge::BridgeProvider;
pub use http::HttpProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceProfile {
    Desktop,
    Mobile,
}

impl DeviceProfile {
    pub fn user_agent(&self) -> &'static str {
        match self {
            DeviceProfile::Desktop => BrowserProfile::Chrome.user_agent(),
            DeviceProfile::Mobile => {
                "Mozilla/5.0 (iPhone; CPU iPhone OS 14_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0 Mobile/15E148 Safari/604.1"
            }
        }
    }

    pub fn viewport_width(&self) -> u32 {
        match self {
            DeviceProfile::Desktop => 1366,
            DeviceProfile::Mobile => 375,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserProfile {
    Chrome,
    Firefox,
}

impl BrowserProfile {
    pub fn user_agent(&self) -> &'static str {
        match self {
            BrowserProfile::Chrome => {
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36"
            }
            BrowserProfile::Firefox => {
                "Mozilla/5.0 (X11; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0"
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BrowserProfile::Chrome => "chrome",
            BrowserProfile::Firefox => "firefox",
        }
    }
}

/// Result of a head-only request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadOutcome {
    pub status: u16,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationTimings {
    pub ttfb_ms: Option<f64>,
    pub dom_interactive_ms: Option<f64>,
    pub dom_content_loaded_ms: Option<f64>,
    pub dom_complete_ms: Option<f64>,
    pub load_complete_ms: Option<f64>,
    pub first_paint_ms: Option<f64>,
    pub first_contentful_paint_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStats {
    pub count: u32,
    pub total_transfer_bytes: u64,
    pub slowest_ms: f64,
}

/// Core Web Vitals collected within a bounded window. Any field may be
/// missing; FID in particular needs real user input and is usually absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebVitals {
    pub largest_contentful_paint_ms: Option<f64>,
    pub first_input_delay_ms: Option<f64>,
    pub cumulative_layout_shift: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormFacts {
    pub inputs: u32,
    pub buttons: u32,
    pub has_submit: bool,
    pub unlabeled_inputs: u32,
}

/// Structural facts about the rendered document, used by the link,
/// mobile, accessibility and form probes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentFacts {
    pub links: Vec<String>,
    pub has_viewport_meta: bool,
    pub mobile_nav_elements: u32,
    pub viewport_width: Option<u32>,
    pub forms: Vec<FormFacts>,
    pub images_total: u32,
    pub images_missing_alt: u32,
    pub inputs_without_label: u32,
    pub has_lang: bool,
    pub has_title: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageSnapshot {
    pub status: u16,
    pub elapsed: Duration,
    pub timings: NavigationTimings,
    pub resources: ResourceStats,
    pub web_vitals: Option<WebVitals>,
    pub document: Option<DocumentFacts>,
}

impl PageSnapshot {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    /// Approximate speed index: midpoint of first contentful paint and
    /// DOM completion when both are known.
    pub fn speed_index_ms(&self) -> Option<f64> {
        match (
            self.timings.first_contentful_paint_ms,
            self.timings.dom_complete_ms.or(self.timings.load_complete_ms),
        ) {
            (Some(fcp), Some(done)) => Some((fcp + done.max(fcp)) / 2.0),
            (Some(fcp), None) => Some(fcp),
            (None, Some(done)) => Some(done),
            (None, None) => None,
        }
    }
}

/// Navigate-and-measure capability. Implementations own their transport;
/// the core only relies on this contract.
pub trait PageMetricsProvider: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Fails with [`ProviderError::Unavailable`] when the provider cannot
    /// serve navigations at all.
    fn initialize(&self) -> impl Future<Output = Result<(), ProviderError>> + Send;

    fn head(
        &self,
        url: &Url,
        browser: BrowserProfile,
        timeout: Duration,
    ) -> impl Future<Output = Result<HeadOutcome, ProviderError>> + Send;

    fn navigate(
        &self,
        url: &Url,
        device: DeviceProfile,
        timeout: Duration,
    ) -> impl Future<Output = Result<PageSnapshot, ProviderError>> + Send;
}

/// The provider selected at startup.
pub enum AnyProvider {
    Http(HttpProvider),
    Bridge(BridgeProvider),
}

impl PageMetricsProvider for AnyProvider {
    fn name(&self) -> &'static str {
        match self {
            AnyProvider::Http(p) => p.name(),
            AnyProvider::Bridge(p) => p.name(),
        }
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        match self {
            AnyProvider::Http(p) => p.initialize().await,
            AnyProvider::Bridge(p) => p.initialize().await,
        }
    }

    async fn head(
        &self,
        url: &Url,
        browser: BrowserProfile,
        timeout: Duration,
    ) -> Result<HeadOutcome, ProviderError> {
        match self {
            AnyProvider::Http(p) => p.head(url, browser, timeout).await,
            AnyProvider::Bridge(p) => p.head(url, browser, timeout).await,
        }
    }

    async fn navigate(
        &self,
        url: &Url,
        device: DeviceProfile,
        timeout: Duration,
    ) -> Result<PageSnapshot, ProviderError> {
        match self {
            AnyProvider::Http(p) => p.navigate(url, device, timeout).await,
            AnyProvider::Bridge(p) => p.navigate(url, device, timeout).await,
        }
    }
}

// ============================================================================
// Resource accounting
// ============================================================================

/// Counts provider calls the core currently holds open. Every call is made
/// under a [`PageLease`], released on drop, so a cancelled future returns
/// its slot as soon as it is dropped.
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    in_flight: Arc<AtomicUsize>,
    acquired: Arc<AtomicU64>,
}

pub struct PageLease {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for PageLease {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lease(&self) -> PageLease {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.acquired.fetch_add(1, Ordering::SeqCst);
        PageLease {
            in_flight: self.in_flight.clone(),
        }
    }

    /// Await `fut` while holding a lease.
    pub async fn leased<F: Future>(&self, fut: F) -> F::Output {
        let _lease = self.lease();
        fut.await
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn total_acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_released_on_drop() {
        let tracker = ResourceTracker::new();
        let a = tracker.lease();
        let b = tracker.lease();
        assert_eq!(tracker.in_flight(), 2);
        drop(a);
        assert_eq!(tracker.in_flight(), 1);
        drop(b);
        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(tracker.total_acquired(), 2);
    }

    #[tokio::test]
    async fn test_leased_future_dropped_mid_flight() {
        let tracker = ResourceTracker::new();
        let fut = tracker.leased(tokio::time::sleep(Duration::from_secs(60)));
        let result = tokio::time::timeout(Duration::from_millis(20), fut).await;
        assert!(result.is_err());
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_speed_index_prefers_fcp_and_dom_complete() {
        let mut snapshot = PageSnapshot {
            status: 200,
            elapsed: Duration::from_millis(900),
            timings: NavigationTimings {
                first_contentful_paint_ms: Some(400.0),
                dom_complete_ms: Some(1200.0),
                ..Default::default()
            },
            resources: ResourceStats::default(),
            web_vitals: None,
            document: None,
        };
        assert_eq!(snapshot.speed_index_ms(), Some(800.0));

        snapshot.timings.dom_complete_ms = None;
        assert_eq!(snapshot.speed_index_ms(), Some(400.0));

        snapshot.timings.first_contentful_paint_ms = None;
        assert_eq!(snapshot.speed_index_ms(), None);
    }
}
