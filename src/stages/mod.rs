//! Probe stages. Each stage is a weighted unit of the pipeline that consumes
//! the page metrics provider and produces a typed partial result.

pub mod accessibility;
pub mod forms;
pub mod links;
pub mod load_time;
pub mod mobile;

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;
use url::Url;

use crate::config::{PipelineTuning, ProbeMode};
use crate::error::{AssessError, ProviderError};
use crate::events::{metrics, Metrics};
use crate::load_generator::LoadTestSummary;
use crate::pipeline::context::RunContext;
use crate::provider::{
    BrowserProfile, DeviceProfile, HeadOutcome, PageMetricsProvider, PageSnapshot,
    ResourceTracker,
};
use crate::scoring::AssessmentMetrics;

use accessibility::AccessibilityResult;
use forms::FormResult;
use links::LinkReport;
use load_time::LoadTimeResult;
use mobile::MobileResult;

/// Stage kinds in execution precedence order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    #[serde(alias = "loadTime", alias = "load-time")]
    LoadTime,
    #[serde(alias = "linkIntegrity", alias = "link-integrity", alias = "links")]
    LinkIntegrity,
    #[serde(alias = "mobile_test")]
    Mobile,
    #[serde(alias = "loadTest", alias = "load-test")]
    LoadTest,
    Accessibility,
    #[serde(alias = "interactions")]
    Forms,
}

impl StageKind {
    pub const ALL: [StageKind; 6] = [
        StageKind::LoadTime,
        StageKind::LinkIntegrity,
        StageKind::Mobile,
        StageKind::LoadTest,
        StageKind::Accessibility,
        StageKind::Forms,
    ];

    /// Weight before renormalization over the enabled set.
    pub fn base_weight(&self) -> u32 {
        match self {
            StageKind::LoadTime => 15,
            StageKind::LinkIntegrity => 15,
            StageKind::Mobile => 15,
            StageKind::LoadTest => 45,
            StageKind::Accessibility => 5,
            StageKind::Forms => 5,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StageKind::LoadTime => "load time",
            StageKind::LinkIntegrity => "link integrity",
            StageKind::Mobile => "mobile responsiveness",
            StageKind::LoadTest => "load test",
            StageKind::Accessibility => "accessibility",
            StageKind::Forms => "forms",
        }
    }

    pub fn default_set() -> BTreeSet<StageKind> {
        [
            StageKind::LoadTime,
            StageKind::LinkIntegrity,
            StageKind::Mobile,
            StageKind::LoadTest,
        ]
        .into_iter()
        .collect()
    }
}

impl std::str::FromStr for StageKind {
    type Err = AssessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_string()))
            .map_err(|_| AssessError::Validation(format!("unknown stage '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Order the enabled stages by precedence and assign integer weights that
/// sum to exactly 100 (largest-remainder apportionment of base weights).
pub fn plan(enabled: &BTreeSet<StageKind>) -> Vec<(StageKind, u8)> {
    let kinds: Vec<StageKind> = StageKind::ALL
        .into_iter()
        .filter(|k| enabled.contains(k))
        .collect();
    if kinds.is_empty() {
        return Vec::new();
    }

    let total: u32 = kinds.iter().map(|k| k.base_weight()).sum();
    let mut weights: Vec<u32> = kinds
        .iter()
        .map(|k| k.base_weight() * 100 / total)
        .collect();
    let assigned: u32 = weights.iter().sum();

    let mut by_remainder: Vec<usize> = (0..kinds.len()).collect();
    // Stable sort keeps precedence order among equal remainders.
    by_remainder.sort_by_key(|&i| std::cmp::Reverse(kinds[i].base_weight() * 100 % total));
    for &i in by_remainder.iter().take((100 - assigned) as usize) {
        weights[i] += 1;
    }

    kinds
        .into_iter()
        .zip(weights)
        .map(|(k, w)| (k, w as u8))
        .collect()
}

/// What every stage gets to work with besides the run context.
pub struct StageEnv<'a, P: PageMetricsProvider> {
    pub provider: &'a P,
    pub tracker: &'a ResourceTracker,
    pub tuning: &'a PipelineTuning,
    pub mode: ProbeMode,
}

impl<'a, P: PageMetricsProvider> StageEnv<'a, P> {
    /// Navigate under a lease with a hard per-operation timeout.
    pub async fn navigate(&self, url: &Url, device: DeviceProfile) -> Result<PageSnapshot, ProviderError> {
        let limit = self.tuning.navigation_timeout;
        bounded(
            limit,
            self.tracker
                .leased(self.provider.navigate(url, device, limit)),
        )
        .await
    }

    pub async fn head(&self, url: &Url, browser: BrowserProfile) -> Result<HeadOutcome, ProviderError> {
        let limit = self.tuning.head_timeout;
        bounded(limit, self.tracker.leased(self.provider.head(url, browser, limit))).await
    }

    pub async fn pause(&self) {
        tokio::time::sleep(self.tuning.update_delay).await;
    }
}

async fn bounded<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = Result<T, ProviderError>>,
) -> Result<T, ProviderError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(limit)),
    }
}

/// Typed result of one completed stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    LoadTime(LoadTimeResult),
    LinkIntegrity(LinkReport),
    Mobile(MobileResult),
    LoadTest(LoadTestSummary),
    Accessibility(AccessibilityResult),
    Forms(FormResult),
}

impl StageOutcome {
    /// Fold this result into the metrics bundle handed to scoring.
    pub fn apply(self, bundle: &mut AssessmentMetrics) {
        match self {
            StageOutcome::LoadTime(r) => bundle.load_time = Some(r),
            StageOutcome::LinkIntegrity(r) => bundle.links = Some(r),
            StageOutcome::Mobile(r) => bundle.mobile = Some(r),
            StageOutcome::LoadTest(r) => bundle.load_test = Some(r),
            StageOutcome::Accessibility(r) => bundle.accessibility = Some(r),
            StageOutcome::Forms(r) => bundle.forms = Some(r),
        }
    }

    /// Metric fields published when the stage completes.
    pub fn completion_metrics(&self) -> Metrics {
        match self {
            StageOutcome::LoadTime(r) => metrics(json!({
                "loadTime": r.seconds,
                "loadTimeDegraded": r.degraded,
            })),
            StageOutcome::LinkIntegrity(r) => metrics(json!({
                "linksChecked": r.checked,
                "brokenLinks": r.broken.iter().map(|b| b.url.clone()).collect::<Vec<_>>(),
            })),
            StageOutcome::Mobile(r) => metrics(json!({ "mobileScore": r.score })),
            StageOutcome::LoadTest(r) => metrics(json!({
                "totalRequests": r.total,
                "failedRequests": r.failed,
                "avgLatency": r.avg_latency,
                "maxLatency": r.max_latency,
            })),
            StageOutcome::Accessibility(r) => metrics(json!({
                "accessibilityViolations": r.violation_count(),
            })),
            StageOutcome::Forms(r) => metrics(json!({
                "formsChecked": r.forms_checked,
                "formsWithoutSubmit": r.forms_without_submit,
            })),
        }
    }
}

/// Dispatch one stage.
pub async fn run_stage<P: PageMetricsProvider>(
    env: &StageEnv<'_, P>,
    kind: StageKind,
    ctx: &mut RunContext,
) -> Result<StageOutcome, AssessError> {
    match kind {
        StageKind::LoadTime => load_time::measure(env, ctx).await.map(StageOutcome::LoadTime),
        StageKind::LinkIntegrity => links::scan(env, ctx).await.map(StageOutcome::LinkIntegrity),
        StageKind::Mobile => mobile::probe(env, ctx).await.map(StageOutcome::Mobile),
        StageKind::LoadTest => load_test::run(env, ctx).await.map(StageOutcome::LoadTest),
        StageKind::Accessibility => accessibility::audit(env, ctx)
            .await
            .map(StageOutcome::Accessibility),
        StageKind::Forms => forms::probe(env, ctx).await.map(StageOutcome::Forms),
    }
}
