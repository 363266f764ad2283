use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use super::request::TestConfig;
use crate::error::AssessError;
use crate::events::{Emitter, Event, Metrics};
use crate::provider::{PageSnapshot, WebVitals};
use crate::scoring::Report;
use crate::stages::{StageKind, StageStatus};
use crate::target::TargetUrl;

/// Externally observable state of a run, published on every progress change.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub id: String,
    pub url: String,
    pub progress: u8,
    pub status: String,
    pub stage: Option<StageKind>,
    pub started_at: DateTime<Utc>,
    pub finished: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSlot {
    pub kind: StageKind,
    pub weight: u8,
    pub status: StageStatus,
}

/// Page-level figures picked up from the first successful full navigation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageProfile {
    pub speed_index_ms: Option<f64>,
    pub page_requests: Option<u32>,
    pub web_vitals: Option<WebVitals>,
}

/// Everything one run owns: progress, the accumulated metrics snapshot,
/// stage bookkeeping and the sending half of its event stream. Never shared
/// between runs.
pub struct RunContext {
    id: String,
    target: TargetUrl,
    config: TestConfig,
    progress: u8,
    status: String,
    metrics: Metrics,
    stages: Vec<StageSlot>,
    current: Option<usize>,
    base: u8,
    page: PageProfile,
    emitter: Emitter,
    status_tx: watch::Sender<RunStatus>,
}

impl RunContext {
    pub fn new(
        id: String,
        target: TargetUrl,
        config: TestConfig,
        plan: &[(StageKind, u8)],
        emitter: Emitter,
    ) -> (Self, watch::Receiver<RunStatus>) {
        let status = "Queued".to_string();
        let (status_tx, status_rx) = watch::channel(RunStatus {
            id: id.clone(),
            url: target.to_string(),
            progress: 0,
            status: status.clone(),
            stage: None,
            started_at: Utc::now(),
            finished: false,
        });

        let stages = plan
            .iter()
            .map(|(kind, weight)| StageSlot {
                kind: *kind,
                weight: *weight,
                status: StageStatus::Pending,
            })
            .collect();

        let ctx = Self {
            id,
            target,
            config,
            progress: 0,
            status,
            metrics: Metrics::new(),
            stages,
            current: None,
            base: 0,
            page: PageProfile::default(),
            emitter,
            status_tx,
        };
        (ctx, status_rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &TargetUrl {
        &self.target
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn stages(&self) -> &[StageSlot] {
        &self.stages
    }

    pub fn page_profile(&self) -> &PageProfile {
        &self.page
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    /// Mark the stage running and announce it at the current percentage.
    pub async fn begin_stage(&mut self, kind: StageKind) -> Result<(), AssessError> {
        let idx = self
            .stages
            .iter()
            .position(|s| s.kind == kind)
            .ok_or_else(|| AssessError::Other(format!("stage {:?} is not planned", kind)))?;
        self.stages[idx].status = StageStatus::Running;
        self.current = Some(idx);

        let status = format!("Running {} check...", kind.label());
        self.emit_progress(self.base, status, Metrics::new()).await
    }

    /// Intermediate progress within the running stage. `fraction` is the
    /// share of the stage done; the percentage never exceeds the stage's
    /// upper bound and never regresses.
    pub async fn report(
        &mut self,
        fraction: f64,
        status: impl Into<String>,
        delta: Metrics,
    ) -> Result<(), AssessError> {
        let weight = self.current.map(|i| self.stages[i].weight).unwrap_or(0);
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let within = (weight as f64 * fraction).floor() as u8;
        let percent = (self.base + within.min(weight)).min(100);
        self.emit_progress(percent, status.into(), delta).await
    }

    /// Partial metric update without a progress change.
    pub async fn publish(&mut self, delta: Metrics) -> Result<(), AssessError> {
        self.merge(&delta);
        self.emitter.send(Event::Metrics { metrics: delta }).await
    }

    /// Close the running stage: its full weight is credited and the
    /// completion metrics are published with the new cumulative percentage.
    pub async fn complete_stage(&mut self, delta: Metrics) -> Result<(), AssessError> {
        let Some(idx) = self.current.take() else {
            return Ok(());
        };
        let slot = &mut self.stages[idx];
        slot.status = StageStatus::Completed;
        let kind = slot.kind;
        self.base = (self.base + slot.weight).min(100);
        if self.stages.iter().all(|s| s.status == StageStatus::Completed) {
            self.base = 100;
        }

        let status = format!("Completed {} check", kind.label());
        self.emit_progress(self.base, status, delta).await
    }

    pub fn fail_stage(&mut self) {
        if let Some(idx) = self.current.take() {
            self.stages[idx].status = StageStatus::Failed;
        }
    }

    /// Remember page-level figures from a full navigation; first one wins.
    pub fn observe_snapshot(&mut self, snapshot: &PageSnapshot) {
        if !snapshot.is_success() {
            return;
        }
        if self.page.speed_index_ms.is_none() {
            self.page.speed_index_ms = snapshot.speed_index_ms();
        }
        if self.page.page_requests.is_none() && snapshot.resources.count > 0 {
            self.page.page_requests = Some(snapshot.resources.count);
        }
        if self.page.web_vitals.is_none() {
            self.page.web_vitals = snapshot.web_vitals.clone();
        }
    }

    /// Emit the terminal report.
    pub async fn finish(&mut self, report: Report) -> Result<(), AssessError> {
        self.progress = 100;
        self.status = "Assessment complete".to_string();
        self.publish_status(true);
        self.emitter
            .send(Event::Final {
                progress: 100,
                status: self.status.clone(),
                results: Box::new(report),
            })
            .await
    }

    /// Emit the terminal failure.
    pub async fn fail(&mut self, err: &AssessError) {
        self.status = format!("Failed: {}", err);
        self.publish_status(true);
        let _ = self.emitter.send(Event::failure(err)).await;
    }

    /// Record the run as aborted without emitting anything.
    pub fn abort(&mut self, reason: &str) {
        self.fail_stage();
        self.status = format!("Aborted: {}", reason);
        self.publish_status(true);
    }

    async fn emit_progress(
        &mut self,
        percent: u8,
        status: String,
        delta: Metrics,
    ) -> Result<(), AssessError> {
        self.progress = self.progress.max(percent);
        self.status = status;
        self.merge(&delta);
        self.publish_status(false);
        self.emitter
            .send(Event::Progress {
                progress: self.progress,
                status: self.status.clone(),
                metrics: delta,
            })
            .await
    }

    fn merge(&mut self, delta: &Metrics) {
        for (k, v) in delta {
            self.metrics.insert(k.clone(), v.clone());
        }
    }

    fn publish_status(&self, finished: bool) {
        let stage = self.current.map(|i| self.stages[i].kind);
        self.status_tx.send_modify(|s| {
            s.progress = self.progress;
            s.status = self.status.clone();
            s.stage = stage;
            s.finished = finished;
        });
    }
}
