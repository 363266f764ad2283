//! Concurrent load generator: waves of simultaneous navigations against one
//! URL for a bounded duration, reduced to throughput and latency figures.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

use crate::error::{AssessError, ProviderError};
use crate::provider::{DeviceProfile, PageMetricsProvider, ResourceTracker};

#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Success { latency: Duration },
    Failure { reason: String, latency: Duration },
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Success { .. })
    }
}

/// One wave of virtual users. Dropped once its outcomes are recorded.
#[derive(Debug, Clone)]
pub struct LoadTestBatch {
    pub size: u32,
    pub issued_at: DateTime<Utc>,
    pub outcomes: Vec<RequestOutcome>,
}

impl LoadTestBatch {
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTestSummary {
    pub total: u32,
    pub successful: u32,
    pub failed: u32,
    /// Percentage of successful requests, 0 when nothing was sent.
    pub success_rate: f64,
    /// Latencies are in seconds over successful requests only; `None` when
    /// there were none.
    pub avg_latency: Option<f64>,
    pub min_latency: Option<f64>,
    pub median_latency: Option<f64>,
    pub max_latency: Option<f64>,
    pub batches: u32,
    pub concurrency: u32,
    pub duration_secs: u64,
}

/// Aggregate counters that survive the batches.
#[derive(Debug, Default)]
pub struct LoadRecorder {
    total: u32,
    failed: u32,
    batches: u32,
    latencies: Vec<f64>,
}

impl LoadRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, batch: &LoadTestBatch) {
        self.batches += 1;
        for outcome in &batch.outcomes {
            self.total += 1;
            match outcome {
                RequestOutcome::Success { latency } => self.latencies.push(latency.as_secs_f64()),
                RequestOutcome::Failure { .. } => self.failed += 1,
            }
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn failed(&self) -> u32 {
        self.failed
    }

    pub fn batches(&self) -> u32 {
        self.batches
    }

    pub fn summary(&self, concurrency: u32, duration_secs: u64) -> LoadTestSummary {
        let mut sorted = self.latencies.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let successful = sorted.len() as u32;
        let avg_latency =
            (!sorted.is_empty()).then(|| sorted.iter().sum::<f64>() / sorted.len() as f64);
        let median_latency = match sorted.len() {
            0 => None,
            n if n % 2 == 1 => Some(sorted[n / 2]),
            n => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
        };
        let success_rate = if self.total == 0 {
            0.0
        } else {
            successful as f64 / self.total as f64 * 100.0
        };

        LoadTestSummary {
            total: self.total,
            successful,
            failed: self.failed,
            success_rate,
            avg_latency,
            min_latency: sorted.first().copied(),
            median_latency,
            max_latency: sorted.last().copied(),
            batches: self.batches,
            concurrency,
            duration_secs,
        }
    }
}

/// Issues navigations through a provider. Virtual users cycle through
/// `devices`.
pub struct LoadGenerator<'a, P: PageMetricsProvider> {
    provider: &'a P,
    tracker: &'a ResourceTracker,
    navigation_timeout: Duration,
    batch_pause: Duration,
    devices: Vec<DeviceProfile>,
}

impl<'a, P: PageMetricsProvider> LoadGenerator<'a, P> {
    pub fn new(
        provider: &'a P,
        tracker: &'a ResourceTracker,
        navigation_timeout: Duration,
        batch_pause: Duration,
    ) -> Self {
        Self {
            provider,
            tracker,
            navigation_timeout,
            batch_pause,
            devices: vec![DeviceProfile::Desktop],
        }
    }

    pub fn with_devices(mut self, devices: Vec<DeviceProfile>) -> Self {
        if !devices.is_empty() {
            self.devices = devices;
        }
        self
    }

    /// Launch exactly `concurrency` navigations and wait for all of them to
    /// settle. Individual failures are recorded, never propagated.
    pub async fn run_batch(&self, url: &Url, concurrency: u32) -> LoadTestBatch {
        let issued_at = Utc::now();
        let requests = (0..concurrency as usize).map(|i| {
            let device = self.devices[i % self.devices.len()];
            self.request(url, device)
        });
        let outcomes = join_all(requests).await;

        LoadTestBatch {
            size: concurrency,
            issued_at,
            outcomes,
        }
    }

    async fn request(&self, url: &Url, device: DeviceProfile) -> RequestOutcome {
        let start = Instant::now();
        let navigation = self
            .tracker
            .leased(self.provider.navigate(url, device, self.navigation_timeout));
        let result = match tokio::time::timeout(self.navigation_timeout, navigation).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.navigation_timeout)),
        };
        let latency = start.elapsed();

        match result {
            Ok(snapshot) if snapshot.is_success() => RequestOutcome::Success { latency },
            Ok(snapshot) => RequestOutcome::Failure {
                reason: format!("HTTP {}", snapshot.status),
                latency,
            },
            Err(e) => RequestOutcome::Failure {
                reason: e.to_string(),
                latency,
            },
        }
    }

    /// Initialize the provider and prepare a run. Fails only when the
    /// provider cannot serve navigations at all.
    pub async fn start<'r>(
        &'r self,
        url: &'r Url,
        concurrency: u32,
        duration: Duration,
    ) -> Result<LoadRun<'r, 'a, P>, AssessError> {
        self.provider
            .initialize()
            .await
            .map_err(|e| AssessError::ProviderUnavailable(e.to_string()))?;
        info!(
            "Load test on {} via {}: {} users for {:?}",
            url,
            self.provider.name(),
            concurrency,
            duration
        );

        Ok(LoadRun {
            generator: self,
            url,
            concurrency,
            duration,
            started: Instant::now(),
            recorder: LoadRecorder::new(),
        })
    }

    /// Run batches until the duration has elapsed.
    pub async fn run(
        &self,
        url: &Url,
        concurrency: u32,
        duration: Duration,
    ) -> Result<LoadTestSummary, AssessError> {
        let mut run = self.start(url, concurrency, duration).await?;
        while run.next_batch().await.is_some() {}
        Ok(run.summary())
    }
}

/// A load test in progress, advanced one batch at a time.
pub struct LoadRun<'r, 'a, P: PageMetricsProvider> {
    generator: &'r LoadGenerator<'a, P>,
    url: &'r Url,
    concurrency: u32,
    duration: Duration,
    started: Instant,
    recorder: LoadRecorder,
}

impl<P: PageMetricsProvider> LoadRun<'_, '_, P> {
    /// Run the next batch, or `None` once the duration has elapsed. The
    /// fixed pause sits between batches, never after the last one.
    pub async fn next_batch(&mut self) -> Option<LoadTestBatch> {
        if self.started.elapsed() >= self.duration {
            return None;
        }
        if self.recorder.batches() > 0 {
            tokio::time::sleep(self.generator.batch_pause).await;
            if self.started.elapsed() >= self.duration {
                return None;
            }
        }

        let batch = self.generator.run_batch(self.url, self.concurrency).await;
        debug!(
            "Batch {} settled: {} of {} failed",
            self.recorder.batches() + 1,
            batch.failed(),
            batch.size
        );
        self.recorder.record(&batch);
        Some(batch)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Share of the duration used so far, in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        let total = self.duration.as_secs_f64();
        if total <= 0.0 {
            return 1.0;
        }
        (self.elapsed().as_secs_f64() / total).min(1.0)
    }

    pub fn recorder(&self) -> &LoadRecorder {
        &self.recorder
    }

    pub fn summary(&self) -> LoadTestSummary {
        self.recorder
            .summary(self.concurrency, self.duration.as_secs())
    }
}
