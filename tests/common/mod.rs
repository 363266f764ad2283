#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use sitepulse::config::{AssessorConfig, PipelineTuning, ProbeMode};
use sitepulse::error::ProviderError;
use sitepulse::provider::{
    BrowserProfile, DeviceProfile, DocumentFacts, HeadOutcome, NavigationTimings,
    PageMetricsProvider, PageSnapshot, ResourceStats,
};

/// In-memory provider with scripted latency and failures. Counts every call
/// and every page it currently holds open.
pub struct ScriptedProvider {
    pub head_calls: AtomicUsize,
    pub navigate_calls: AtomicUsize,
    pub open_pages: Arc<AtomicUsize>,
    latency: Duration,
    fail_every: Option<usize>,
    unavailable: bool,
    document: DocumentFacts,
    head_status: HashMap<String, u16>,
    head_failures: HashSet<String>,
}

struct OpenPage(Arc<AtomicUsize>);

impl OpenPage {
    fn open(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        OpenPage(counter.clone())
    }
}

impl Drop for OpenPage {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            head_calls: AtomicUsize::new(0),
            navigate_calls: AtomicUsize::new(0),
            open_pages: Arc::new(AtomicUsize::new(0)),
            latency: Duration::from_millis(5),
            fail_every: None,
            unavailable: false,
            document: DocumentFacts {
                has_lang: true,
                has_title: true,
                ..Default::default()
            },
            head_status: HashMap::new(),
            head_failures: HashSet::new(),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every `n`th navigation fails.
    pub fn failing_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn with_document(mut self, document: DocumentFacts) -> Self {
        self.document = document;
        self
    }

    pub fn with_head_status(mut self, url: &str, status: u16) -> Self {
        self.head_status.insert(url.to_string(), status);
        self
    }

    /// HEAD requests for `url` fail with a connection error.
    pub fn failing_head(mut self, url: &str) -> Self {
        self.head_failures.insert(url.to_string());
        self
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn navigate_calls(&self) -> usize {
        self.navigate_calls.load(Ordering::SeqCst)
    }

    pub fn open_pages(&self) -> usize {
        self.open_pages.load(Ordering::SeqCst)
    }
}

impl PageMetricsProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        if self.unavailable {
            return Err(ProviderError::Unavailable("no browser installed".to_string()));
        }
        Ok(())
    }

    async fn head(
        &self,
        url: &Url,
        _browser: BrowserProfile,
        _timeout: Duration,
    ) -> Result<HeadOutcome, ProviderError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        if self.head_failures.contains(url.as_str()) {
            return Err(ProviderError::Navigation("connection refused".to_string()));
        }
        Ok(HeadOutcome {
            status: self.head_status.get(url.as_str()).copied().unwrap_or(200),
            elapsed: self.latency,
        })
    }

    async fn navigate(
        &self,
        _url: &Url,
        device: DeviceProfile,
        _timeout: Duration,
    ) -> Result<PageSnapshot, ProviderError> {
        if self.unavailable {
            return Err(ProviderError::Unavailable("no browser installed".to_string()));
        }
        let n = self.navigate_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let _page = OpenPage::open(&self.open_pages);
        tokio::time::sleep(self.latency).await;

        if matches!(self.fail_every, Some(every) if n % every == 0) {
            return Err(ProviderError::Navigation("connection reset".to_string()));
        }

        let mut document = self.document.clone();
        document.viewport_width = Some(device.viewport_width());
        Ok(PageSnapshot {
            status: 200,
            elapsed: self.latency,
            timings: NavigationTimings {
                ttfb_ms: Some(20.0),
                first_contentful_paint_ms: Some(300.0),
                dom_complete_ms: Some(700.0),
                ..Default::default()
            },
            resources: ResourceStats {
                count: 12,
                total_transfer_bytes: 48_000,
                slowest_ms: 90.0,
            },
            web_vitals: None,
            document: Some(document),
        })
    }
}

pub fn fast_tuning() -> PipelineTuning {
    PipelineTuning {
        head_timeout: Duration::from_secs(1),
        navigation_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_millis(200),
        batch_pause: Duration::from_millis(10),
        update_delay: Duration::from_millis(1),
    }
}

pub fn test_config(mode: ProbeMode) -> AssessorConfig {
    AssessorConfig {
        probe_mode: mode,
        tuning: fast_tuning(),
        ..AssessorConfig::default()
    }
}
